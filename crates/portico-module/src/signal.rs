//! SIGINT/SIGTERM → control-pipe wiring.
//!
//! The handler only performs one `write(2)` of the shutdown token to the
//! registered pipe, which is async-signal-safe. The most recent
//! [`install`] wins; [`detach`] runs before the pipe's write end closes.

use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use nix::sys::signal::{sigaction, signal, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing::debug;

use crate::control_pipe::{ControlPipe, SHUTDOWN_TOKEN};

/// Write end the handler targets; -1 when detached.
static SIGNAL_PIPE: AtomicI32 = AtomicI32::new(-1);

/// Handlers between loading `SIGNAL_PIPE` and finishing their write.
/// `detach` waits for zero so the descriptor cannot be closed and reused
/// under a pending write.
static IN_HANDLER: AtomicUsize = AtomicUsize::new(0);

extern "C" fn on_shutdown_signal(_sig: libc::c_int) {
    IN_HANDLER.fetch_add(1, Ordering::SeqCst);
    let fd = SIGNAL_PIPE.load(Ordering::SeqCst);
    if fd >= 0 {
        let token = SHUTDOWN_TOKEN;
        unsafe {
            libc::write(fd, &token as *const u8 as *const libc::c_void, 1);
        }
    }
    IN_HANDLER.fetch_sub(1, Ordering::SeqCst);
}

/// Route SIGINT and SIGTERM to `pipe`, and ignore SIGPIPE so a vanished
/// client surfaces as `EPIPE` on write instead of killing the process.
pub fn install(pipe: &ControlPipe) -> io::Result<()> {
    let fd = pipe.write_fd().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotConnected, "control pipe is closed")
    })?;
    SIGNAL_PIPE.store(fd, Ordering::Release);

    let mut mask = SigSet::empty();
    mask.add(Signal::SIGINT);
    mask.add(Signal::SIGTERM);
    let action = SigAction::new(
        SigHandler::Handler(on_shutdown_signal),
        SaFlags::empty(),
        mask,
    );
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        unsafe { sigaction(sig, &action) }.map_err(io::Error::from)?;
    }
    unsafe { signal(Signal::SIGPIPE, SigHandler::SigIgn) }.map_err(io::Error::from)?;

    debug!(fd, "[signal] SIGINT/SIGTERM routed to control pipe");
    Ok(())
}

/// Stop targeting `fd`. No-op if another pipe has been installed since.
///
/// Returns once no handler can still write to `fd`; call before closing it.
pub fn detach(fd: RawFd) {
    if SIGNAL_PIPE
        .compare_exchange(fd, -1, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return;
    }
    while IN_HANDLER.load(Ordering::SeqCst) > 0 {
        std::thread::yield_now();
    }
}

/// Currently targeted write end, if any.
pub fn attached_fd() -> Option<RawFd> {
    let fd = SIGNAL_PIPE.load(Ordering::Acquire);
    (fd >= 0).then_some(fd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // both tests drive the process-wide target
    static SERIAL: Mutex<()> = Mutex::new(());

    #[test]
    fn test_install_and_detach_on_close() {
        let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        let pipe = ControlPipe::create().unwrap();
        install(&pipe).unwrap();
        assert_eq!(attached_fd(), pipe.write_fd());

        // handler body, invoked directly
        on_shutdown_signal(libc::SIGTERM);
        assert!(pipe.drain().shutdown_requested);

        pipe.close();
        assert_eq!(attached_fd(), None);
        assert!(install(&pipe).is_err());
    }

    #[test]
    fn test_detach_waits_for_running_handler() {
        use std::thread;
        use std::time::{Duration, Instant};

        let _serial = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
        let pipe = ControlPipe::create().unwrap();
        let fd = pipe.write_fd().unwrap();
        SIGNAL_PIPE.store(fd, Ordering::SeqCst);

        // a handler that has loaded the fd but not yet returned
        IN_HANDLER.fetch_add(1, Ordering::SeqCst);
        let finisher = thread::spawn(|| {
            thread::sleep(Duration::from_millis(50));
            IN_HANDLER.fetch_sub(1, Ordering::SeqCst);
        });

        let started = Instant::now();
        detach(fd);
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(attached_fd(), None);
        finisher.join().unwrap();
    }
}
