//! `ControlPipe`: self-pipe used to wake the readiness loop.
//!
//! The multiplexer watches the read end alongside the listening socket.
//! Writing [`SHUTDOWN_TOKEN`] to the write end asks the loop to stop; any
//! other byte only wakes it. Both ends are non-blocking and close-on-exec,
//! and both are closed exactly once.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::signal;

/// Byte that requests shutdown.
pub const SHUTDOWN_TOKEN: u8 = b'q';

/// What a drain of the read end found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipeDrain {
    /// Bytes consumed.
    pub bytes: usize,
    /// A shutdown token was among them.
    pub shutdown_requested: bool,
    /// Every writer is gone.
    pub hangup: bool,
}

impl PipeDrain {
    /// The loop should stop.
    pub fn wants_shutdown(&self) -> bool {
        self.shutdown_requested || self.hangup
    }
}

pub struct ControlPipe {
    read: Mutex<Option<File>>,
    write: Mutex<Option<File>>,
    read_fd: RawFd,
    write_fd: RawFd,
}

impl ControlPipe {
    /// Create a new non-blocking pipe pair. The pipe OWNS both fds.
    pub fn create() -> io::Result<Self> {
        let (read, write) = open_pipe()?;
        let read_fd = read.as_raw_fd();
        let write_fd = write.as_raw_fd();
        debug!(read_fd, write_fd, "[control] pipe created");
        Ok(Self {
            read: Mutex::new(Some(File::from(read))),
            write: Mutex::new(Some(File::from(write))),
            read_fd,
            write_fd,
        })
    }

    /// Read end, for readiness registration. `None` once closed.
    pub fn read_fd(&self) -> Option<RawFd> {
        lock(&self.read).as_ref().map(|_| self.read_fd)
    }

    /// Write end, for the signal handler. `None` once closed.
    pub fn write_fd(&self) -> Option<RawFd> {
        lock(&self.write).as_ref().map(|_| self.write_fd)
    }

    /// Ask the readiness loop to stop.
    ///
    /// Returns `Ok(false)` when the pipe is already closed.
    pub fn notify_shutdown(&self) -> io::Result<bool> {
        self.send(SHUTDOWN_TOKEN)
    }

    /// Write one control byte.
    pub fn send(&self, byte: u8) -> io::Result<bool> {
        let mut guard = lock(&self.write);
        let Some(file) = guard.as_mut() else {
            debug!(byte, "[control] pipe already closed, ignoring");
            return Ok(false);
        };
        loop {
            match file.write(&[byte]) {
                Ok(_) => return Ok(true),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // EAGAIN: pipe is full, so the reader already has a wake-up
                // pending.
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(e) => return Err(e),
            }
        }
    }

    /// Consume everything currently readable.
    pub fn drain(&self) -> PipeDrain {
        let mut result = PipeDrain::default();
        let mut guard = lock(&self.read);
        let Some(file) = guard.as_mut() else {
            result.hangup = true;
            return result;
        };
        let mut buf = [0u8; 64];
        loop {
            match file.read(&mut buf) {
                Ok(0) => {
                    result.hangup = true;
                    break;
                }
                Ok(n) => {
                    result.bytes += n;
                    if buf[..n].contains(&SHUTDOWN_TOKEN) {
                        result.shutdown_requested = true;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!(error = %e, "[control] read failed");
                    break;
                }
            }
        }
        result
    }

    /// Close both ends. Returns `false` if they were already closed.
    pub fn close(&self) -> bool {
        let write = lock(&self.write).take();
        let read = lock(&self.read).take();
        if write.is_some() {
            signal::detach(self.write_fd);
        }
        let closed = write.is_some() || read.is_some();
        drop(write);
        drop(read);
        if closed {
            debug!("[control] pipe closed");
        }
        closed
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.write).is_none() && lock(&self.read).is_none()
    }
}

impl Drop for ControlPipe {
    fn drop(&mut self) {
        self.close();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))] {
        fn open_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
            use nix::fcntl::OFlag;
            nix::unistd::pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC).map_err(io::Error::from)
        }
    } else {
        fn open_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
            let (read, write) = nix::unistd::pipe().map_err(io::Error::from)?;
            for fd in [read.as_raw_fd(), write.as_raw_fd()] {
                unsafe {
                    let flags = libc::fcntl(fd, libc::F_GETFL);
                    if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
                        return Err(io::Error::last_os_error());
                    }
                    libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
                }
            }
            Ok((read, write))
        }
    }
}
