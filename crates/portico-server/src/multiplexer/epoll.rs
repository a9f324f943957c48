//! Edge-triggered multiplexer (epoll).
//!
//! Tokens: `0` is the listener (`EPOLLIN | EPOLLET`), `1` the control pipe
//! (`EPOLLIN`), everything from `2` up a pending connection in the
//! [`ConnectionTable`]. A connection is registered once, and on its first
//! read-readiness it leaves the table and epoll before its process task is
//! submitted, so it is dispatched at most once.

use std::collections::HashMap;
use std::io;
use std::mem;
use std::net::TcpListener;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use portico_core::config::{AcceptMode, Backend};
use portico_core::error::{Result, ServerError};
use portico_core::executor::Task;
use tracing::{debug, error, info, trace, warn};

use super::Multiplexer;
use crate::accept::{accept_burst, AcceptLimit, ConnectionSink};
use crate::connection::ConnectionContext;
use crate::server::Shared;

const LISTENER_TOKEN: u64 = 0;
const CONTROL_TOKEN: u64 = 1;
const FIRST_CONNECTION_TOKEN: u64 = 2;

const EPOLLIN: u32 = libc::EPOLLIN as u32;
const EPOLLET: u32 = libc::EPOLLET as u32;
const ERROR_EVENTS: u32 = (libc::EPOLLERR | libc::EPOLLHUP | libc::EPOLLRDHUP) as u32;

/// Error, hangup, or anything without read-readiness.
#[inline]
fn is_error(events: u32) -> bool {
    events & ERROR_EVENTS != 0 || events & EPOLLIN == 0
}

/// The epoll instance plus the connections registered with it.
pub(crate) struct ConnectionTable {
    epfd: OwnedFd,
    pending: Mutex<HashMap<u64, ConnectionContext>>,
    next_token: AtomicU64,
}

impl ConnectionTable {
    fn new() -> io::Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            epfd: unsafe { OwnedFd::from_raw_fd(fd) },
            pending: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(FIRST_CONNECTION_TOKEN),
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32, token: u64) -> io::Result<()> {
        let mut event = libc::epoll_event { events, u64: token };
        let rc = unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn add(&self, fd: RawFd, events: u32, token: u64) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, events, token)
    }

    fn delete(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, 0, 0)
    }

    /// Park `conn` until its first read-readiness.
    fn register(&self, conn: ConnectionContext) -> io::Result<u64> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let fd = conn.raw_fd();
        // in the table before epoll can report it
        self.lock().insert(token, conn);
        if let Err(err) = self.add(fd, EPOLLIN | EPOLLET, token) {
            self.lock().remove(&token);
            return Err(err);
        }
        Ok(token)
    }

    /// Remove a connection from the table and from epoll.
    fn take(&self, token: u64) -> Option<ConnectionContext> {
        let conn = self.lock().remove(&token)?;
        if let Err(err) = self.delete(conn.raw_fd()) {
            debug!(token, %err, "[epoll] deregistering connection failed");
        }
        Some(conn)
    }

    fn wait(&self, events: &mut [libc::epoll_event]) -> io::Result<usize> {
        let max = events.len().min(libc::c_int::MAX as usize) as libc::c_int;
        let rc = unsafe { libc::epoll_wait(self.epfd.as_raw_fd(), events.as_mut_ptr(), max, -1) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(rc as usize)
    }

    /// Close every connection still waiting for data.
    fn close_pending(&self) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        for (_, conn) in &drained {
            let _ = self.delete(conn.raw_fd());
        }
        drained.len()
    }

    fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, ConnectionContext>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ConnectionSink for ConnectionTable {
    fn deliver(&self, conn: ConnectionContext) {
        let peer = conn.peer();
        match self.register(conn) {
            Ok(token) => trace!(%peer, token, "[epoll] connection registered"),
            Err(err) => warn!(%peer, %err, "[epoll] cannot register connection, closing"),
        }
    }
}

pub(crate) struct EpollMultiplexer {
    shared: Arc<Shared>,
    listener: Arc<TcpListener>,
    table: Arc<ConnectionTable>,
    events: Vec<libc::epoll_event>,
    listen_fd: RawFd,
    control_fd: RawFd,
    closed: bool,
}

impl EpollMultiplexer {
    pub(crate) fn new(shared: Arc<Shared>, listener: Arc<TcpListener>) -> Result<Self> {
        let table = ConnectionTable::new().map_err(ServerError::Multiplexer)?;
        let listen_fd = listener.as_raw_fd();
        let control_fd = shared.control.read_fd().ok_or_else(|| {
            ServerError::ControlPipe(io::Error::new(io::ErrorKind::NotConnected, "control pipe is closed"))
        })?;

        table
            .add(listen_fd, EPOLLIN | EPOLLET, LISTENER_TOKEN)
            .map_err(ServerError::Multiplexer)?;
        table
            .add(control_fd, EPOLLIN, CONTROL_TOKEN)
            .map_err(ServerError::Multiplexer)?;

        let events = vec![libc::epoll_event { events: 0, u64: 0 }; shared.config.max_poll.max(1)];
        Ok(Self {
            shared,
            listener,
            table: Arc::new(table),
            events,
            listen_fd,
            control_fd,
            closed: false,
        })
    }

    fn on_listener_ready(&self) {
        match self.shared.config.accept_mode {
            AcceptMode::Inline => {
                let summary = accept_burst(
                    &self.listener,
                    self.shared.shutdown_flag(),
                    &Arc::downgrade(&self.shared),
                    AcceptLimit::UntilWouldBlock,
                    &*self.table,
                );
                self.shared.stats.record_accepted(summary.accepted);
            }
            AcceptMode::Dedicated => self.submit_accept_phase(),
        }
    }

    /// Two-phase acceptance: an admitted task drains the backlog and
    /// registers what it accepts.
    fn submit_accept_phase(&self) {
        let admission = self.shared.governor.acquire();
        let shared = Arc::clone(&self.shared);
        let listener = Arc::clone(&self.listener);
        let table = Arc::clone(&self.table);
        let task: Task = Box::new(move || {
            let _admission = admission;
            let summary = accept_burst(
                &listener,
                shared.shutdown_flag(),
                &Arc::downgrade(&shared),
                AcceptLimit::UntilWouldBlock,
                &*table,
            );
            shared.stats.record_accepted(summary.accepted);
            trace!(?summary, "[epoll] accept phase done");
        });
        if let Err(err) = self.shared.executor.submit(task) {
            warn!(%err, executor = self.shared.executor.name(), "[epoll] cannot submit accept task");
        }
    }

    fn on_connection_ready(&self, token: u64) {
        let Some(conn) = self.table.take(token) else {
            trace!(token, "[epoll] event for a connection no longer pending");
            return;
        };
        if self.shared.is_shutting_down() {
            debug!(peer = %conn.peer(), "[epoll] shutting down, closing connection");
            return;
        }
        self.shared.dispatch_connection(conn);
    }
}

impl Multiplexer for EpollMultiplexer {
    fn backend(&self) -> Backend {
        Backend::EdgeTriggered
    }

    fn run(&mut self) -> Result<()> {
        info!(
            max_poll = self.events.len(),
            accept = %self.shared.config.accept_mode,
            "[epoll] waiting for connections"
        );

        'poll: while !self.shared.is_shutting_down() {
            let n = match self.table.wait(&mut self.events) {
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!(%err, "[epoll] epoll_wait failed");
                    break;
                }
            };

            for event in self.events[..n].iter().copied() {
                let token = event.u64;
                let flags = event.events;

                if is_error(flags) {
                    match token {
                        LISTENER_TOKEN => {
                            error!(flags, "[epoll] listening socket went away");
                            break 'poll;
                        }
                        CONTROL_TOKEN => {
                            warn!(flags, "[epoll] control pipe hung up");
                            self.shared.begin_shutdown();
                            break 'poll;
                        }
                        _ => {
                            if let Some(conn) = self.table.take(token) {
                                warn!(peer = %conn.peer(), flags, "[epoll] connection error or hangup, closing");
                                self.shared.stats.record_abandoned();
                            }
                        }
                    }
                    continue;
                }

                match token {
                    CONTROL_TOKEN => {
                        if self.shared.handle_control() {
                            break 'poll;
                        }
                    }
                    LISTENER_TOKEN => {
                        if !self.shared.is_shutting_down() {
                            self.on_listener_ready();
                        }
                    }
                    _ => self.on_connection_ready(token),
                }
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if mem::replace(&mut self.closed, true) {
            return;
        }
        let closed = self.table.close_pending();
        if let Err(err) = self.table.delete(self.listen_fd) {
            error!(%err, "[epoll] cannot deregister listening socket");
        }
        if let Err(err) = self.table.delete(self.control_fd) {
            debug!(%err, "[epoll] cannot deregister control pipe");
        }
        self.events = Vec::new();
        debug!(closed_pending = closed, still_pending = self.table.pending(), "[epoll] released");
    }
}
