//! Descriptor-set multiplexer (select(2)).
//!
//! Each iteration builds a fresh read set holding the listener and the
//! control-pipe read end and blocks without a timeout. A ready listener
//! yields exactly one accept, dispatched straight to a handler task.

use std::io;
use std::mem;
use std::net::TcpListener;
use std::os::fd::{AsRawFd, RawFd};
use std::ptr;
use std::sync::Arc;

use portico_core::config::Backend;
use portico_core::error::{Result, ServerError};
use tracing::{debug, error, info};

use super::Multiplexer;
use crate::accept::{accept_burst, AcceptLimit};
use crate::server::{DispatchSink, Shared};

pub(crate) struct SelectMultiplexer {
    shared: Arc<Shared>,
    listener: Arc<TcpListener>,
    listen_fd: RawFd,
    control_fd: RawFd,
    closed: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Readiness {
    listener: bool,
    control: bool,
}

impl SelectMultiplexer {
    pub(crate) fn new(shared: Arc<Shared>, listener: Arc<TcpListener>) -> Result<Self> {
        let listen_fd = listener.as_raw_fd();
        let control_fd = shared.control.read_fd().ok_or_else(|| {
            ServerError::ControlPipe(io::Error::new(io::ErrorKind::NotConnected, "control pipe is closed"))
        })?;
        for fd in [listen_fd, control_fd] {
            if fd < 0 || fd as usize >= libc::FD_SETSIZE as usize {
                return Err(ServerError::Multiplexer(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("descriptor {fd} does not fit in an fd_set"),
                )));
            }
        }
        Ok(Self {
            shared,
            listener,
            listen_fd,
            control_fd,
            closed: false,
        })
    }

    fn wait(&self) -> io::Result<Readiness> {
        unsafe {
            let mut read_set: libc::fd_set = mem::zeroed();
            libc::FD_ZERO(&mut read_set);
            libc::FD_SET(self.listen_fd, &mut read_set);
            libc::FD_SET(self.control_fd, &mut read_set);

            let nfds = self.listen_fd.max(self.control_fd) + 1;
            let rc = libc::select(
                nfds,
                &mut read_set,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
            );
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Readiness {
                listener: libc::FD_ISSET(self.listen_fd, &read_set),
                control: libc::FD_ISSET(self.control_fd, &read_set),
            })
        }
    }
}

impl Multiplexer for SelectMultiplexer {
    fn backend(&self) -> Backend {
        Backend::DescriptorSet
    }

    fn run(&mut self) -> Result<()> {
        info!(listen_fd = self.listen_fd, "[select] waiting for connections");
        let server = Arc::downgrade(&self.shared);

        while !self.shared.is_shutting_down() {
            let ready = match self.wait() {
                Ok(ready) => ready,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!(%err, "[select] select failed");
                    break;
                }
            };

            if ready.control && self.shared.handle_control() {
                break;
            }
            if ready.listener && !self.shared.is_shutting_down() {
                let summary = accept_burst(
                    &self.listener,
                    self.shared.shutdown_flag(),
                    &server,
                    AcceptLimit::One,
                    &DispatchSink(&self.shared),
                );
                self.shared.stats.record_accepted(summary.accepted);
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if !mem::replace(&mut self.closed, true) {
            debug!(listen_fd = self.listen_fd, "[select] closing");
        }
    }
}
