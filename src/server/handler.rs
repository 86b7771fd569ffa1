//! Per-connection application callbacks.

use std::io::{self, Write};

use crate::net::Connection;
use crate::server::state::SharedState;

/// Application logic for one connection, run inside the forked child.
///
/// Returning from [`ConnectionHandler::handle`] ends the child with exit code 0.
pub trait ConnectionHandler {
    fn handle(&mut self, conn: &mut Connection, state: &SharedState);

    /// Called instead of `handle` when the server is at `max_clients`.
    fn refuse(&mut self, conn: &mut Connection) {
        let _ = conn;
    }
}

impl<F> ConnectionHandler for F
where
    F: FnMut(&mut Connection, &SharedState),
{
    fn handle(&mut self, conn: &mut Connection, state: &SharedState) {
        self(conn, state)
    }
}

/// Greets with the live tunables, then echoes until the peer closes.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl EchoHandler {
    fn serve(&self, conn: &mut Connection, state: &SharedState) -> io::Result<()> {
        match state.tunables() {
            Ok(t) => writeln!(
                conn,
                "hello backlog={} max_clients={} read_timeout_ms={}",
                t.backlog, t.max_clients, t.read_timeout_ms
            )?,
            Err(e) => writeln!(conn, "hello (state unavailable: {})", e)?,
        }

        let mut buf = [0u8; 4096];
        loop {
            let n = conn.receive(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            conn.write_all(&buf[..n])?;
        }
    }
}

impl ConnectionHandler for EchoHandler {
    fn handle(&mut self, conn: &mut Connection, state: &SharedState) {
        if let Err(e) = self.serve(conn, state) {
            tracing::debug!(connection_id = %conn.id(), error = %e, "Echo session ended with error");
        }
    }

    fn refuse(&mut self, conn: &mut Connection) {
        if let Err(e) = conn.write_all(b"busy\n") {
            tracing::debug!(connection_id = %conn.id(), error = %e, "Refusal notice not delivered");
        }
    }
}
