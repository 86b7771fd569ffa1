//! Kernel-persisted message queue with priority tags.
//!
//! # Selector semantics
//! ```text
//! s == 0  → oldest message, any tag
//! s  > 0  → oldest message whose tag == s
//! s  < 0  → smallest tag <= |s|; equal tags in arrival order
//! ```
//! Messages with equal tags always come out in the order they were sent.
//! Nothing orders messages across different tags beyond the selector rule.

use std::marker::PhantomData;
use std::mem;
use std::ptr;

use libc::{c_int, c_long};
use nix::errno::Errno;

use crate::ipc::error::IpcError;
use crate::ipc::key::ResourceKey;
use crate::ipc::IPC_MODE;

/// `msgrcv` flag: copy the message at an ordinal position instead of removing it.
const MSG_COPY: c_int = 0o40000;

const TAG_SIZE: usize = mem::size_of::<c_long>();

/// Which message [`PriorityQueue::receive`] takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    /// Oldest message of any tag.
    Any,
    /// Oldest message carrying exactly this tag. Tags below 1 select 1,
    /// matching what [`PriorityQueue::send`] stores.
    Tag(i64),
    /// Smallest tag not above this bound; oldest first among equals. A bound
    /// below 1 matches nothing.
    AtMost(i64),
}

impl Selector {
    /// The `msgtyp` argument for `msgrcv`, or `None` if no tag can qualify.
    fn as_msgtyp(self) -> Option<c_long> {
        match self {
            Selector::Any => Some(0),
            Selector::Tag(tag) => Some(tag.max(1) as c_long),
            Selector::AtMost(bound) if bound <= 0 => None,
            Selector::AtMost(bound) => Some(-(bound as c_long)),
        }
    }
}

impl From<i64> for Selector {
    fn from(s: i64) -> Self {
        match s {
            0 => Selector::Any,
            s if s > 0 => Selector::Tag(s),
            s => Selector::AtMost(s.saturating_neg()),
        }
    }
}

/// A received payload together with its tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Message<T> {
    pub tag: i64,
    pub value: T,
}

/// Handle to a System V message queue carrying `T` payloads.
///
/// `T` must be plain data; it is copied byte for byte through the kernel.
#[derive(Debug)]
pub struct PriorityQueue<T: Copy> {
    id: c_int,
    key: ResourceKey,
    creator: bool,
    _marker: PhantomData<T>,
}

impl<T: Copy> PriorityQueue<T> {
    /// Create the queue for `key`.
    pub fn create(key: ResourceKey) -> Result<Self, IpcError> {
        let id = unsafe { libc::msgget(key.as_raw(), libc::IPC_CREAT | libc::IPC_EXCL | IPC_MODE) };
        if id == -1 {
            return Err(IpcError::last("msgget", key));
        }
        tracing::debug!(key = %key, msqid = id, "Message queue created");
        Ok(Self::from_id(id, key, true))
    }

    /// Attach to an existing queue.
    pub fn attach(key: ResourceKey) -> Result<Self, IpcError> {
        let id = unsafe { libc::msgget(key.as_raw(), 0) };
        if id == -1 {
            return Err(IpcError::last("msgget", key));
        }
        tracing::debug!(key = %key, msqid = id, "Message queue attached");
        Ok(Self::from_id(id, key, false))
    }

    /// Whether a queue currently exists for `key`.
    pub fn exists(key: ResourceKey) -> bool {
        unsafe { libc::msgget(key.as_raw(), 0) != -1 }
    }

    fn from_id(id: c_int, key: ResourceKey, creator: bool) -> Self {
        Self {
            id,
            key,
            creator,
            _marker: PhantomData,
        }
    }

    /// Enqueue `value` under `tag`. Tags below 1 are sent as 1.
    ///
    /// Blocks while the queue is full.
    pub fn send(&self, value: T, tag: i64) -> Result<(), IpcError> {
        let tag = if tag <= 0 { 1 } else { tag };
        let mut buf = vec![0u8; TAG_SIZE + mem::size_of::<T>()];

        // The kernel reads a `long` tag followed by exactly `size_of::<T>()`
        // payload bytes, independent of T's alignment.
        unsafe {
            ptr::write_unaligned(buf.as_mut_ptr().cast::<c_long>(), tag as c_long);
            ptr::write_unaligned(buf.as_mut_ptr().add(TAG_SIZE).cast::<T>(), value);
        }

        if unsafe { libc::msgsnd(self.id, buf.as_ptr().cast(), mem::size_of::<T>(), 0) } == -1 {
            return Err(IpcError::last_on_object("msgsnd", self.key));
        }
        Ok(())
    }

    /// Remove and return the message chosen by `selector`.
    ///
    /// Blocks until one qualifies unless `non_blocking` is set, in which case
    /// [`IpcError::NoMatch`] is returned instead. A selector no tag can
    /// satisfy returns [`IpcError::NoMatch`] without waiting.
    pub fn receive(&self, selector: impl Into<Selector>, non_blocking: bool) -> Result<T, IpcError> {
        self.receive_message(selector, non_blocking).map(|m| m.value)
    }

    /// Same as [`PriorityQueue::receive`], keeping the tag.
    pub fn receive_message(&self, selector: impl Into<Selector>, non_blocking: bool) -> Result<Message<T>, IpcError> {
        let msgtyp = selector.into().as_msgtyp().ok_or(IpcError::NoMatch)?;
        let flags = if non_blocking { libc::IPC_NOWAIT } else { 0 };
        self.msgrcv(msgtyp, flags, "msgrcv")
    }

    /// Copy the message at `ordinal` (0 = oldest) without removing it.
    ///
    /// Never blocks. Requires a kernel built with checkpoint/restore support,
    /// otherwise the call reports `ENOSYS`.
    pub fn peek(&self, ordinal: usize) -> Result<T, IpcError> {
        let ordinal = c_long::try_from(ordinal).map_err(|_| IpcError::NoMatch)?;
        self.msgrcv(ordinal, libc::IPC_NOWAIT | MSG_COPY, "msgrcv(MSG_COPY)")
            .map(|m| m.value)
    }

    /// Number of messages currently queued.
    pub fn count(&self) -> Result<usize, IpcError> {
        let mut ds: libc::msqid_ds = unsafe { mem::zeroed() };
        if unsafe { libc::msgctl(self.id, libc::IPC_STAT, &mut ds) } == -1 {
            return Err(IpcError::last_on_object("msgctl(IPC_STAT)", self.key));
        }
        Ok(ds.msg_qnum as usize)
    }

    pub fn is_empty(&self) -> Result<bool, IpcError> {
        Ok(self.count()? == 0)
    }

    pub fn has_message(&self) -> Result<bool, IpcError> {
        Ok(self.count()? > 0)
    }

    /// Remove the queue for everyone. Blocked receivers and senders wake with
    /// [`IpcError::InterruptedByDestruction`].
    pub fn destroy(self) -> Result<(), IpcError> {
        if unsafe { libc::msgctl(self.id, libc::IPC_RMID, ptr::null_mut()) } == -1 {
            return Err(IpcError::last_on_object("msgctl(IPC_RMID)", self.key));
        }
        tracing::debug!(key = %self.key, msqid = self.id, "Message queue destroyed");
        Ok(())
    }

    pub fn key(&self) -> ResourceKey {
        self.key
    }

    pub fn is_creator(&self) -> bool {
        self.creator
    }

    fn msgrcv(&self, msgtyp: c_long, flags: c_int, op: &'static str) -> Result<Message<T>, IpcError> {
        let mut buf = vec![0u8; TAG_SIZE + mem::size_of::<T>()];

        let received = unsafe { libc::msgrcv(self.id, buf.as_mut_ptr().cast(), mem::size_of::<T>(), msgtyp, flags) };
        if received == -1 {
            return Err(IpcError::last_on_object(op, self.key));
        }
        if received as usize != mem::size_of::<T>() {
            return Err(IpcError::Os { op, errno: Errno::EBADMSG });
        }

        let (tag, value) = unsafe {
            (
                ptr::read_unaligned(buf.as_ptr().cast::<c_long>()),
                ptr::read_unaligned(buf.as_ptr().add(TAG_SIZE).cast::<T>()),
            )
        };
        Ok(Message { tag: tag as i64, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_key() -> (tempfile::TempDir, ResourceKey) {
        let dir = tempfile::tempdir().unwrap();
        let key = ResourceKey::new(dir.path(), 31).unwrap();
        (dir, key)
    }

    #[test]
    fn selector_from_integer() {
        assert_eq!(Selector::from(0), Selector::Any);
        assert_eq!(Selector::from(3), Selector::Tag(3));
        assert_eq!(Selector::from(-4), Selector::AtMost(4));
        assert_eq!(Selector::AtMost(4).as_msgtyp(), Some(-4));
    }

    #[test]
    fn out_of_range_selectors_keep_their_meaning() {
        assert_eq!(Selector::AtMost(0).as_msgtyp(), None);
        assert_eq!(Selector::AtMost(-3).as_msgtyp(), None);
        assert_eq!(Selector::Tag(0).as_msgtyp(), Some(1));
        assert_eq!(Selector::Tag(-7).as_msgtyp(), Some(1));

        let (_dir, key) = fresh_key();
        let q = PriorityQueue::<u8>::create(key).unwrap();
        q.send(50, 5).unwrap();
        q.send(30, 3).unwrap();

        assert!(matches!(q.receive_message(Selector::AtMost(0), true), Err(IpcError::NoMatch)));
        assert!(matches!(q.receive_message(Selector::AtMost(-3), false), Err(IpcError::NoMatch)));
        assert!(matches!(q.receive_message(Selector::Tag(0), true), Err(IpcError::NoMatch)));
        assert_eq!(q.count().unwrap(), 2);

        q.send(10, 0).unwrap();
        assert_eq!(q.receive_message(Selector::Tag(0), true).unwrap(), Message { tag: 1, value: 10 });
        q.destroy().unwrap();
    }

    #[test]
    fn create_attach_lifecycle() {
        let (_dir, key) = fresh_key();
        assert!(matches!(PriorityQueue::<u32>::attach(key), Err(IpcError::NotFound(_))));

        let q = PriorityQueue::<u32>::create(key).unwrap();
        assert!(matches!(PriorityQueue::<u32>::create(key), Err(IpcError::AlreadyExists(_))));
        assert!(PriorityQueue::<u32>::exists(key));

        q.destroy().unwrap();
        assert!(!PriorityQueue::<u32>::exists(key));
    }

    #[test]
    fn selector_law() {
        let (_dir, key) = fresh_key();
        let q = PriorityQueue::<i32>::create(key).unwrap();
        for tag in [5, 4, 3, 2, 1] {
            q.send(tag as i32 * 10, tag).unwrap();
        }

        assert_eq!(q.receive(0, true).unwrap(), 50);
        assert_eq!(q.receive(3, true).unwrap(), 30);
        assert_eq!(q.receive(1, true).unwrap(), 10);
        assert_eq!(q.receive(-4, true).unwrap(), 20);
        assert_eq!(q.receive(0, true).unwrap(), 40);
        assert!(q.is_empty().unwrap());
        q.destroy().unwrap();
    }

    #[test]
    fn at_most_breaks_ties_by_arrival() {
        let (_dir, key) = fresh_key();
        let q = PriorityQueue::<u8>::create(key).unwrap();
        q.send(1, 3).unwrap();
        q.send(2, 2).unwrap();
        q.send(3, 2).unwrap();
        q.send(4, 9).unwrap();

        let first = q.receive_message(Selector::AtMost(5), true).unwrap();
        assert_eq!(first, Message { tag: 2, value: 2 });
        assert_eq!(q.receive(Selector::AtMost(5), true).unwrap(), 3);
        assert_eq!(q.receive(Selector::AtMost(5), true).unwrap(), 1);
        assert!(matches!(q.receive(Selector::AtMost(5), true), Err(IpcError::NoMatch)));
        assert_eq!(q.count().unwrap(), 1);
        q.destroy().unwrap();
    }

    #[test]
    fn non_positive_tag_normalized() {
        let (_dir, key) = fresh_key();
        let q = PriorityQueue::<u16>::create(key).unwrap();
        q.send(7, 0).unwrap();
        q.send(8, -12).unwrap();

        assert_eq!(q.receive_message(Selector::Tag(1), true).unwrap().value, 7);
        assert_eq!(q.receive_message(Selector::Tag(1), true).unwrap().value, 8);
        q.destroy().unwrap();
    }

    #[test]
    fn missing_exact_tag_is_no_match() {
        let (_dir, key) = fresh_key();
        let q = PriorityQueue::<u64>::create(key).unwrap();
        q.send(1, 2).unwrap();
        assert!(matches!(q.receive(Selector::Tag(5), true), Err(IpcError::NoMatch)));
        assert!(q.has_message().unwrap());
        q.destroy().unwrap();
    }
}
