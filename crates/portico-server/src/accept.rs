//! Accept pipeline: listener readiness into connection contexts.
//!
//! `accept_burst` pulls connections off a non-blocking listener and hands
//! each one to a [`ConnectionSink`]. Any error ends the burst: `EAGAIN`
//! silently, everything else with a debug line naming the errno.

use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use tracing::debug;

use crate::connection::ConnectionContext;
use crate::server::Shared;

/// Receives freshly accepted connections.
pub(crate) trait ConnectionSink {
    fn deliver(&self, conn: ConnectionContext);
}

/// How many connections one readiness wake may accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AcceptLimit {
    /// Descriptor-set design: one accept per wake.
    One,
    /// Edge-triggered design: drain the backlog.
    UntilWouldBlock,
}

/// Why a burst ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AcceptStop {
    WouldBlock,
    Limit,
    ShuttingDown,
    Failed(Option<i32>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AcceptSummary {
    pub accepted: usize,
    /// Closed right after accept (shutdown, or no peer address).
    pub rejected: usize,
    pub stop: AcceptStop,
}

pub(crate) fn accept_burst(
    listener: &TcpListener,
    shutdown: &AtomicBool,
    server: &Weak<Shared>,
    limit: AcceptLimit,
    sink: &dyn ConnectionSink,
) -> AcceptSummary {
    accept_checked(listener, shutdown, server, limit, sink, TcpStream::peer_addr)
}

/// `accept_burst` with the post-accept peer lookup supplied by the caller.
fn accept_checked<P>(
    listener: &TcpListener,
    shutdown: &AtomicBool,
    server: &Weak<Shared>,
    limit: AcceptLimit,
    sink: &dyn ConnectionSink,
    peer_of: P,
) -> AcceptSummary
where
    P: Fn(&TcpStream) -> io::Result<SocketAddr>,
{
    let mut summary = AcceptSummary {
        accepted: 0,
        rejected: 0,
        stop: AcceptStop::WouldBlock,
    };

    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                if shutdown.load(Ordering::Acquire) {
                    debug!(%peer, "[accept] shutting down, closing new connection");
                    let _ = stream.shutdown(Shutdown::Both);
                    summary.rejected += 1;
                    summary.stop = AcceptStop::ShuttingDown;
                    break;
                }
                match peer_of(&stream) {
                    Ok(_) => {
                        summary.accepted += 1;
                        sink.deliver(ConnectionContext::new(stream, peer, server.clone()));
                    }
                    Err(err) => {
                        debug!(%peer, %err, "[accept] getpeername failed, closing");
                        summary.rejected += 1;
                    }
                }
                // counts rejected connections too
                if limit == AcceptLimit::One {
                    summary.stop = AcceptStop::Limit;
                    break;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                summary.stop = AcceptStop::WouldBlock;
                break;
            }
            Err(err) => {
                log_accept_error(&err);
                summary.stop = AcceptStop::Failed(err.raw_os_error());
                break;
            }
        }
    }
    summary
}

fn log_accept_error(err: &io::Error) {
    let meaning = match err.raw_os_error() {
        Some(libc::EBADF) => "the listening descriptor is not an open file descriptor",
        Some(libc::ECONNABORTED) => "a connection has been aborted",
        Some(libc::EINTR) => "the call was interrupted by a signal before a connection arrived",
        Some(libc::EINVAL) => "the socket is not listening for connections",
        Some(libc::ENFILE) => "the system limit on open files has been reached",
        Some(libc::EMFILE) => "the per-process limit on open file descriptors has been reached",
        Some(libc::ENOTSOCK) => "the descriptor references a file, not a socket",
        Some(libc::EOPNOTSUPP) => "the referenced socket is not of type SOCK_STREAM",
        _ => "unclassified accept failure",
    };
    debug!(%err, "[accept] {}", meaning);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct Recording(Mutex<Vec<ConnectionContext>>);

    impl ConnectionSink for Recording {
        fn deliver(&self, conn: ConnectionContext) {
            self.0.lock().unwrap().push(conn);
        }
    }

    impl Recording {
        fn len(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }

    fn listener() -> TcpListener {
        let l = TcpListener::bind("127.0.0.1:0").unwrap();
        l.set_nonblocking(true).unwrap();
        l
    }

    fn connect(l: &TcpListener, n: usize) -> Vec<TcpStream> {
        let addr = l.local_addr().unwrap();
        let clients = (0..n).map(|_| TcpStream::connect(addr).unwrap()).collect();
        // let the handshakes land in the accept queue
        thread::sleep(Duration::from_millis(50));
        clients
    }

    #[test]
    fn test_no_pending_connection() {
        let l = listener();
        let sink = Recording::default();
        let summary = accept_burst(
            &l,
            &AtomicBool::new(false),
            &Weak::new(),
            AcceptLimit::UntilWouldBlock,
            &sink,
        );
        assert_eq!(summary.stop, AcceptStop::WouldBlock);
        assert_eq!(summary.accepted, 0);
        assert_eq!(sink.len(), 0);
    }

    #[test]
    fn test_drains_backlog() {
        let l = listener();
        let _clients = connect(&l, 3);
        let sink = Recording::default();
        let summary = accept_burst(
            &l,
            &AtomicBool::new(false),
            &Weak::new(),
            AcceptLimit::UntilWouldBlock,
            &sink,
        );
        assert_eq!(summary.accepted, 3);
        assert_eq!(summary.stop, AcceptStop::WouldBlock);
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn test_one_per_wake() {
        let l = listener();
        let _clients = connect(&l, 2);
        let sink = Recording::default();
        let shutdown = AtomicBool::new(false);
        let first = accept_burst(&l, &shutdown, &Weak::new(), AcceptLimit::One, &sink);
        assert_eq!((first.accepted, first.stop), (1, AcceptStop::Limit));
        let second = accept_burst(&l, &shutdown, &Weak::new(), AcceptLimit::One, &sink);
        assert_eq!(second.accepted, 1);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_closes_during_shutdown() {
        let l = listener();
        let mut clients = connect(&l, 1);
        let sink = Recording::default();
        let summary = accept_burst(
            &l,
            &AtomicBool::new(true),
            &Weak::new(),
            AcceptLimit::UntilWouldBlock,
            &sink,
        );
        assert_eq!(summary.stop, AcceptStop::ShuttingDown);
        assert_eq!(summary.rejected, 1);
        assert_eq!(sink.len(), 0);

        // client sees the close
        use std::io::Read;
        let mut buf = [0u8; 8];
        clients[0]
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(clients[0].read(&mut buf).unwrap_or(0), 0);
    }

    #[test]
    fn test_rejected_connection_ends_single_accept() {
        let l = listener();
        let _clients = connect(&l, 2);
        let sink = Recording::default();
        let shutdown = AtomicBool::new(false);
        let no_peer = |_: &TcpStream| -> io::Result<SocketAddr> {
            Err(io::Error::from_raw_os_error(libc::ENOTCONN))
        };

        let first = accept_checked(&l, &shutdown, &Weak::new(), AcceptLimit::One, &sink, no_peer);
        assert_eq!((first.accepted, first.rejected), (0, 1));
        assert_eq!(first.stop, AcceptStop::Limit);
        assert_eq!(sink.len(), 0);

        // the second connection is still queued for the next wake
        let second = accept_burst(&l, &shutdown, &Weak::new(), AcceptLimit::One, &sink);
        assert_eq!((second.accepted, second.rejected), (1, 0));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_rejected_connection_keeps_draining_backlog() {
        let l = listener();
        let _clients = connect(&l, 3);
        let sink = Recording::default();
        let no_peer = |_: &TcpStream| -> io::Result<SocketAddr> {
            Err(io::Error::from_raw_os_error(libc::ENOTCONN))
        };
        let summary = accept_checked(
            &l,
            &AtomicBool::new(false),
            &Weak::new(),
            AcceptLimit::UntilWouldBlock,
            &sink,
            no_peer,
        );
        assert_eq!((summary.accepted, summary.rejected), (0, 3));
        assert_eq!(summary.stop, AcceptStop::WouldBlock);
    }
}
