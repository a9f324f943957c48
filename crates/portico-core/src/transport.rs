//! Connection transport abstraction.
//!
//! A [`Transport`] is one accepted connection as seen by the request reader
//! and the protocol handler: a blocking byte stream that can be shut down.
//! Plain TCP and secure sessions look the same from the engine's side.
//!
//! # Implementors
//!
//! - `TcpTransport` (portico-module): plain `TcpStream`.
//! - Whatever a [`SecureLayer`] returns from `accept()`.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::RawFd;

/// An accepted connection.
///
/// **Contract:**
/// - `shutdown()` is idempotent and best-effort (both directions).
/// - `as_raw_fd()` reports the underlying socket even for secure sessions.
pub trait Transport: Read + Write + Send {
    /// Shut down both directions. Safe to call more than once.
    fn shutdown(&mut self);

    /// Underlying socket descriptor.
    fn as_raw_fd(&self) -> RawFd;

    /// Remote address, if the socket still has one.
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Switch the socket between blocking and non-blocking mode.
    fn set_blocking(&mut self, blocking: bool) -> io::Result<()>;
}

/// Opaque secure-session setup (TLS).
///
/// Runs on the handler task, so a slow handshake never stalls the
/// multiplexer.
pub trait SecureLayer: Send + Sync {
    /// Wrap a freshly accepted stream, performing the handshake.
    fn accept(&self, stream: TcpStream) -> io::Result<Box<dyn Transport>>;
}
