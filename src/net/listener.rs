//! TCP listener for the fork-per-connection server.
//!
//! # Responsibilities
//! - Bind to the configured address with a configurable backlog
//! - Wait for a pending connection with a chosen signal mask in effect
//! - Accept without retrying on `EINTR`, so signals reach the accept loop

use std::io;
use std::net::{SocketAddr, TcpStream};
use std::os::fd::AsRawFd;
use std::ptr;

use nix::sys::signal::SigSet;
use socket2::{Domain, Socket, Type};

use crate::net::connection::Connection;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(io::Error),
    /// Failed to wait for or accept a connection.
    Accept(io::Error),
    /// A signal arrived while waiting.
    Interrupted,
}

impl ListenerError {
    /// Whether the accept loop should simply go around again.
    pub fn is_transient(&self) -> bool {
        match self {
            ListenerError::Interrupted => true,
            ListenerError::Accept(e) => matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::ConnectionAborted | io::ErrorKind::Interrupted
            ),
            ListenerError::Bind(_) => false,
        }
    }
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
            ListenerError::Interrupted => write!(f, "Interrupted by signal"),
        }
    }
}

impl std::error::Error for ListenerError {}

/// A bound, listening TCP socket.
#[derive(Debug)]
pub struct Listener {
    inner: Socket,
    local_addr: SocketAddr,
    backlog: i32,
}

impl Listener {
    /// Bind to `address` and start listening with `backlog` pending slots.
    pub fn bind(address: &str, backlog: i32) -> Result<Self, ListenerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ListenerError::Bind(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None).map_err(ListenerError::Bind)?;
        socket.set_reuse_address(true).map_err(ListenerError::Bind)?;
        socket.bind(&addr.into()).map_err(ListenerError::Bind)?;
        socket.listen(backlog).map_err(ListenerError::Bind)?;
        // Readiness comes from `wait_readable`; a connection that vanished
        // between the two calls must not leave accept hanging.
        socket.set_nonblocking(true).map_err(ListenerError::Bind)?;

        let local_addr = socket
            .local_addr()
            .map_err(ListenerError::Bind)?
            .as_socket()
            .ok_or_else(|| ListenerError::Bind(io::Error::new(io::ErrorKind::Unsupported, "not an inet socket")))?;

        tracing::info!(
            address = %local_addr,
            backlog,
            "Listener bound"
        );

        Ok(Self {
            inner: socket,
            local_addr,
            backlog,
        })
    }

    /// Change the pending-connection queue length of the live socket.
    pub fn set_backlog(&mut self, backlog: i32) -> Result<(), ListenerError> {
        if backlog == self.backlog {
            return Ok(());
        }
        self.inner.listen(backlog).map_err(ListenerError::Bind)?;
        tracing::info!(old = self.backlog, new = backlog, "Listener backlog changed");
        self.backlog = backlog;
        Ok(())
    }

    /// Block until a connection is pending, with `mask` as the signal mask
    /// for the duration of the wait.
    ///
    /// The mask swap and the wait are one atomic step, so a signal that is
    /// blocked outside this call cannot slip in between a flag check and the
    /// wait: it interrupts the wait instead.
    pub fn wait_readable(&self, mask: &SigSet) -> Result<(), ListenerError> {
        let mut fds = libc::pollfd {
            fd: self.inner.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };

        if unsafe { libc::ppoll(&mut fds, 1, ptr::null(), mask.as_ref()) } == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Err(ListenerError::Interrupted);
            }
            return Err(ListenerError::Accept(err));
        }
        Ok(())
    }

    /// Accept one pending connection. Never retries on `EINTR`.
    pub fn accept(&self) -> Result<Connection, ListenerError> {
        let (socket, addr) = match self.inner.accept() {
            Ok(pair) => pair,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Err(ListenerError::Interrupted),
            Err(e) => return Err(ListenerError::Accept(e)),
        };
        socket.set_nonblocking(false).map_err(ListenerError::Accept)?;

        let peer = addr.as_socket();
        let conn = Connection::new(TcpStream::from(socket), peer);

        tracing::debug!(
            connection_id = %conn.id(),
            peer_addr = ?peer,
            "Connection accepted"
        );
        Ok(conn)
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn backlog(&self) -> i32 {
        self.backlog
    }
}
