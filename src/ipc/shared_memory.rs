//! Kernel-persisted shared memory segment typed as an array of `T`.
//!
//! # Lifetime
//! Detach and destroy are independent. Dropping a [`SharedSegment`] detaches
//! this process's mapping only; the kernel object and its contents persist
//! until one process calls [`SharedSegment::destroy`].
//!
//! # Synchronization
//! The segment carries no lock. Every access that must be consistent across
//! processes has to be bracketed by a [`Semaphore`](crate::ipc::Semaphore)
//! decrement/increment. Reads and writes are volatile so nothing is cached on
//! the process side.
//!
//! `T` must be plain data: no references, no heap pointers, nothing whose
//! meaning depends on the address space it was written from.

use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop};
use std::ops::{Index, IndexMut};
use std::ptr::{self, NonNull};

use libc::c_int;
use nix::errno::Errno;

use crate::ipc::error::IpcError;
use crate::ipc::key::ResourceKey;
use crate::ipc::IPC_MODE;

/// `shm_perm.mode` bit set once `IPC_RMID` was issued on a still-attached segment.
const SHM_DEST: u32 = 0o1000;

/// Handle to a System V shared memory segment attached in this process.
#[derive(Debug)]
pub struct SharedSegment<T: Copy> {
    id: c_int,
    key: ResourceKey,
    base: NonNull<T>,
    len: usize,
    creator: bool,
    _marker: PhantomData<T>,
}

impl<T: Copy> SharedSegment<T> {
    /// Create a zero-filled segment of `len` elements and attach to it.
    pub fn create(key: ResourceKey, len: usize) -> Result<Self, IpcError> {
        let size = match len.checked_mul(mem::size_of::<T>()) {
            Some(size) if size > 0 => size,
            _ => return Err(IpcError::Os { op: "shmget", errno: Errno::EINVAL }),
        };

        let id = unsafe { libc::shmget(key.as_raw(), size, libc::IPC_CREAT | libc::IPC_EXCL | IPC_MODE) };
        if id == -1 {
            return Err(IpcError::last("shmget", key));
        }

        match Self::map(id, key, len, true) {
            Ok(segment) => {
                tracing::debug!(key = %key, shmid = id, len, "Shared segment created");
                Ok(segment)
            }
            Err(e) => {
                unsafe { libc::shmctl(id, libc::IPC_RMID, ptr::null_mut()) };
                Err(e)
            }
        }
    }

    /// Attach to an existing segment. The element count is derived from the
    /// segment's size.
    pub fn attach(key: ResourceKey) -> Result<Self, IpcError> {
        let id = unsafe { libc::shmget(key.as_raw(), 0, 0) };
        if id == -1 {
            return Err(IpcError::last("shmget", key));
        }

        let ds = stat(id, key)?;
        let len = ds.shm_segsz as usize / mem::size_of::<T>().max(1);

        let segment = Self::map(id, key, len, false)?;
        tracing::debug!(key = %key, shmid = id, len, "Shared segment attached");
        Ok(segment)
    }

    /// Whether a segment currently exists for `key`.
    pub fn exists(key: ResourceKey) -> bool {
        unsafe { libc::shmget(key.as_raw(), 0, 0) != -1 }
    }

    fn map(id: c_int, key: ResourceKey, len: usize, creator: bool) -> Result<Self, IpcError> {
        let addr = unsafe { libc::shmat(id, ptr::null(), 0) };
        if addr as isize == -1 {
            return Err(IpcError::last_on_object("shmat", key));
        }

        let base = NonNull::new(addr.cast::<T>()).ok_or(IpcError::Os { op: "shmat", errno: Errno::EFAULT })?;
        Ok(Self {
            id,
            key,
            base,
            len,
            creator,
            _marker: PhantomData,
        })
    }

    /// Number of `T` slots in the segment.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn key(&self) -> ResourceKey {
        self.key
    }

    pub fn id(&self) -> c_int {
        self.id
    }

    pub fn is_creator(&self) -> bool {
        self.creator
    }

    /// Copy of the element at `index`.
    ///
    /// # Panics
    /// If `index` is out of bounds.
    pub fn read_one(&self, index: usize) -> T {
        self.check(index, 1);
        unsafe { self.read_unchecked(index) }
    }

    /// Copies of `count` elements starting at `start`.
    ///
    /// # Panics
    /// If the range leaves the segment.
    pub fn read_many(&self, start: usize, count: usize) -> Vec<T> {
        self.check(start, count);
        (start..start + count).map(|i| unsafe { self.read_unchecked(i) }).collect()
    }

    /// Store `value` at `index`.
    ///
    /// # Panics
    /// If `index` is out of bounds.
    pub fn write_one(&mut self, value: T, index: usize) {
        self.check(index, 1);
        unsafe { self.write_unchecked(value, index) }
    }

    /// Store `values` starting at `start`.
    ///
    /// # Panics
    /// If the range leaves the segment.
    pub fn write_many(&mut self, values: &[T], start: usize) {
        self.check(start, values.len());
        for (offset, value) in values.iter().enumerate() {
            unsafe { self.write_unchecked(*value, start + offset) }
        }
    }

    /// Checked read that also notices a segment destroyed by another process.
    ///
    /// Costs one `shmctl` per call, so it suits callers that may outlive the
    /// segment's owner rather than hot loops.
    pub fn try_read_one(&self, index: usize) -> Result<T, IpcError> {
        if index >= self.len {
            return Err(IpcError::IndexOutOfBounds { index, len: self.len });
        }
        if self.is_destroyed()? {
            return Err(IpcError::InterruptedByDestruction);
        }
        Ok(unsafe { self.read_unchecked(index) })
    }

    /// True once some process destroyed the segment. This mapping stays
    /// readable until it is dropped, but nobody can attach any more.
    pub fn is_destroyed(&self) -> Result<bool, IpcError> {
        match stat(self.id, self.key) {
            Ok(ds) => Ok(ds.shm_perm.mode as u32 & SHM_DEST != 0),
            Err(IpcError::NotFound(_)) => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Read without a bounds check.
    ///
    /// # Safety
    /// `index` must be less than [`SharedSegment::len`].
    pub unsafe fn read_unchecked(&self, index: usize) -> T {
        ptr::read_volatile(self.base.as_ptr().add(index))
    }

    /// Write without a bounds check.
    ///
    /// # Safety
    /// `index` must be less than [`SharedSegment::len`].
    pub unsafe fn write_unchecked(&mut self, value: T, index: usize) {
        ptr::write_volatile(self.base.as_ptr().add(index), value)
    }

    /// Detach this mapping and remove the kernel object.
    ///
    /// Must be issued by one process, after every other attacher detached.
    /// Attachers that are still mapped keep their memory until they drop, but
    /// [`SharedSegment::try_read_one`] reports the destruction to them.
    pub fn destroy(self) -> Result<(), IpcError> {
        let this = ManuallyDrop::new(self);

        if unsafe { libc::shmdt(this.base.as_ptr().cast()) } == -1 {
            tracing::warn!(key = %this.key, error = %Errno::last(), "Failed to detach shared segment");
        }
        if unsafe { libc::shmctl(this.id, libc::IPC_RMID, ptr::null_mut()) } == -1 {
            return Err(IpcError::last_on_object("shmctl(IPC_RMID)", this.key));
        }

        tracing::debug!(key = %this.key, shmid = this.id, "Shared segment destroyed");
        Ok(())
    }

    fn check(&self, start: usize, count: usize) {
        let end = start.checked_add(count);
        assert!(
            matches!(end, Some(end) if end <= self.len),
            "range {start}..{start}+{count} out of bounds for segment of {} elements",
            self.len
        );
    }
}

impl<T: Copy> Index<usize> for SharedSegment<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        self.check(index, 1);
        unsafe { &*self.base.as_ptr().add(index) }
    }
}

impl<T: Copy> IndexMut<usize> for SharedSegment<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        self.check(index, 1);
        unsafe { &mut *self.base.as_ptr().add(index) }
    }
}

impl<T: Copy> Drop for SharedSegment<T> {
    fn drop(&mut self) {
        if unsafe { libc::shmdt(self.base.as_ptr().cast()) } == -1 {
            tracing::warn!(key = %self.key, error = %Errno::last(), "Failed to detach shared segment");
        }
    }
}

fn stat(id: c_int, key: ResourceKey) -> Result<libc::shmid_ds, IpcError> {
    let mut ds: libc::shmid_ds = unsafe { mem::zeroed() };
    if unsafe { libc::shmctl(id, libc::IPC_STAT, &mut ds) } == -1 {
        return Err(IpcError::last_on_object("shmctl(IPC_STAT)", key));
    }
    Ok(ds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    #[repr(C)]
    struct Reading {
        id: u32,
        celsius: f32,
        label: [u8; 8],
    }

    fn fresh_key() -> (tempfile::TempDir, ResourceKey) {
        let dir = tempfile::tempdir().unwrap();
        let key = ResourceKey::new(dir.path(), 21).unwrap();
        (dir, key)
    }

    #[test]
    fn create_attach_lifecycle() {
        let (_dir, key) = fresh_key();
        assert!(matches!(SharedSegment::<u64>::attach(key), Err(IpcError::NotFound(_))));

        let seg = SharedSegment::<u64>::create(key, 16).unwrap();
        assert!(SharedSegment::<u64>::exists(key));
        assert!(matches!(SharedSegment::<u64>::create(key, 16), Err(IpcError::AlreadyExists(_))));

        let other = SharedSegment::<u64>::attach(key).unwrap();
        assert_eq!(other.len(), 16);
        assert!(!other.is_creator());

        drop(other);
        seg.destroy().unwrap();
        assert!(!SharedSegment::<u64>::exists(key));
    }

    #[test]
    fn zero_length_rejected() {
        let (_dir, key) = fresh_key();
        assert!(matches!(SharedSegment::<u32>::create(key, 0), Err(IpcError::Os { .. })));
    }

    #[test]
    fn new_segment_is_zeroed() {
        let (_dir, key) = fresh_key();
        let seg = SharedSegment::<u32>::create(key, 4).unwrap();
        assert_eq!(seg.read_many(0, 4), vec![0, 0, 0, 0]);
        seg.destroy().unwrap();
    }

    #[test]
    fn struct_round_trip_is_a_copy() {
        let (_dir, key) = fresh_key();
        let mut seg = SharedSegment::<Reading>::create(key, 2).unwrap();
        let value = Reading { id: 7, celsius: 21.5, label: *b"kitchen\0" };

        seg.write_one(value, 1);
        let mut copy = seg.read_one(1);
        assert_eq!(copy, value);

        copy.id = 99;
        assert_eq!(seg.read_one(1).id, 7);
        seg.destroy().unwrap();
    }

    #[test]
    fn writes_visible_through_other_attachment() {
        let (_dir, key) = fresh_key();
        let mut seg = SharedSegment::<i32>::create(key, 5).unwrap();
        let other = SharedSegment::<i32>::attach(key).unwrap();

        seg.write_many(&[1, 2, 3], 2);
        assert_eq!(other.read_many(2, 3), vec![1, 2, 3]);

        seg[0] += 40;
        seg[0] += 2;
        assert_eq!(other[0], 42);

        drop(other);
        seg.destroy().unwrap();
    }

    #[test]
    fn try_read_reports_destruction() {
        let (_dir, key) = fresh_key();
        let seg = SharedSegment::<u8>::create(key, 8).unwrap();
        let other = SharedSegment::<u8>::attach(key).unwrap();

        assert_eq!(other.try_read_one(3).unwrap(), 0);
        assert!(matches!(other.try_read_one(8), Err(IpcError::IndexOutOfBounds { index: 8, len: 8 })));

        seg.destroy().unwrap();
        assert!(matches!(other.try_read_one(0), Err(IpcError::InterruptedByDestruction)));
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn read_past_end_panics() {
        let (_dir, key) = fresh_key();
        let seg = SharedSegment::<u16>::create(key, 2).unwrap();
        let other = SharedSegment::<u16>::attach(key).unwrap();
        seg.destroy().unwrap();
        let _ = other.read_one(2);
    }
}
