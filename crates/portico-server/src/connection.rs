//! Connection context and the per-connection process task.

use std::fmt;
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Weak;

use portico_core::protocol::{RequestContext, WriteType};
use portico_core::request::Request;
use portico_core::transport::Transport;
use tracing::{debug, trace};

use crate::governor::AdmissionGuard;
use crate::server::Shared;

/// One accepted connection, from accept until its handler task finishes.
///
/// Owns the socket and at most one in-progress request. Never reused.
pub struct ConnectionContext {
    stream: TcpStream,
    peer: SocketAddr,
    request: Option<Request>,
    server: Weak<Shared>,
}

impl ConnectionContext {
    pub(crate) fn new(stream: TcpStream, peer: SocketAddr, server: Weak<Shared>) -> Self {
        Self {
            stream,
            peer,
            request: None,
            server,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("fd", &self.raw_fd())
            .field("peer", &self.peer)
            .field("request", &self.request.as_ref().map(Request::received))
            .finish()
    }
}

/// Process task body: frame one request, hand it to the protocol handler,
/// write the response, close.
///
/// The admission slot is held until this returns.
pub(crate) fn process(ctx: ConnectionContext, _admission: AdmissionGuard) {
    let ConnectionContext {
        stream,
        peer,
        mut request,
        server,
    } = ctx;

    let Some(shared) = server.upgrade() else {
        debug!(%peer, "[process] server gone, closing connection");
        return;
    };

    let mut transport = match shared.open_transport(stream) {
        Ok(t) => t,
        Err(err) => {
            debug!(%peer, %err, "[process] transport setup failed");
            shared.stats.record_abandoned();
            return;
        }
    };

    match shared.reader.read_request(transport.as_mut(), &mut request) {
        Ok(()) => {
            if let Some(req) = request.take() {
                respond(&shared, transport.as_mut(), &req, peer);
                shared.stats.record_completed();
            }
        }
        Err(err) => {
            debug!(%peer, %err, "[process] abandoning connection");
            shared.stats.record_abandoned();
        }
    }

    transport.shutdown();
}

fn respond(shared: &Shared, transport: &mut dyn Transport, request: &Request, peer: SocketAddr) {
    let response = {
        let mut cx = RequestContext::new(
            request,
            &mut *transport,
            &shared.registry,
            shared.is_shutting_down(),
        );
        shared.handler.handle(&mut cx)
    };

    let Some(response) = response else {
        trace!(%peer, "[process] handler returned no response");
        return;
    };
    match response.write_type {
        WriteType::FreeOnly => {}
        WriteType::WriteAndFree => {
            let written = transport
                .write_all(&response.bytes)
                .and_then(|()| transport.flush());
            if let Err(err) = written {
                debug!(%peer, %err, "[process] response write failed");
            }
        }
    }
}
