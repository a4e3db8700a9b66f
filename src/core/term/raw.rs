//! Caller-side terminal state
//!
//! Raw-mode switching for the wrapper's own terminal, window geometry
//! queries, and the SIGWINCH flag consumed by the relay loop.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

use nix::pty::Winsize;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::termios::{cfmakeraw, tcgetattr, tcsetattr, SetArg, Termios};
use tracing::debug;

static SIGWINCH_RECEIVED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigwinch(_: libc::c_int) {
    SIGWINCH_RECEIVED.store(true, Ordering::SeqCst);
}

/// Install the SIGWINCH handler
///
/// The handler only sets a flag; the relay loop picks it up through
/// [`take_resize_pending`] on its next iteration, so a resize can never
/// abort the session.
pub fn watch_resize() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(handle_sigwinch),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe { sigaction(Signal::SIGWINCH, &action) }?;
    Ok(())
}

/// Consume a pending resize notification
pub fn take_resize_pending() -> bool {
    SIGWINCH_RECEIVED.swap(false, Ordering::SeqCst)
}

/// Window geometry of a terminal descriptor, if it has one
pub fn window_size<F: AsFd>(fd: &F) -> Option<Winsize> {
    let mut ws: Winsize = unsafe { std::mem::zeroed() };
    let ret = unsafe {
        libc::ioctl(
            fd.as_fd().as_raw_fd(),
            libc::TIOCGWINSZ as libc::c_ulong,
            &mut ws,
        )
    };
    if ret == -1 || ws.ws_row == 0 || ws.ws_col == 0 {
        return None;
    }
    Some(ws)
}

/// Best-effort geometry update; failure is cosmetic, not an error
pub fn set_window_size<F: AsFd>(fd: &F, ws: &Winsize) {
    let ret = unsafe {
        libc::ioctl(
            fd.as_fd().as_raw_fd(),
            libc::TIOCSWINSZ as libc::c_ulong,
            ws,
        )
    };
    if ret == -1 {
        debug!(
            "TIOCSWINSZ failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

/// Scoped raw-mode switch for the wrapper's terminal
///
/// Holds the attributes captured before the switch and restores them on
/// drop, so every exit path (normal return, timeout, error) leaves the
/// caller's shell the way it was found.
pub struct RawModeGuard {
    fd: RawFd,
    saved: Termios,
}

impl RawModeGuard {
    /// Snapshot the descriptor's attributes and switch it to raw mode
    pub fn enter<F: AsFd>(fd: &F) -> nix::Result<Self> {
        let saved = tcgetattr(fd)?;
        let mut raw = saved.clone();
        cfmakeraw(&mut raw);
        tcsetattr(fd, SetArg::TCSADRAIN, &raw)?;
        Ok(Self {
            fd: fd.as_fd().as_raw_fd(),
            saved,
        })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        // The descriptor outlives the guard: it is the caller's stdin (or a
        // test PTY) held open for the whole session.
        let fd = unsafe { BorrowedFd::borrow_raw(self.fd) };
        if let Err(err) = tcsetattr(fd, SetArg::TCSADRAIN, &self.saved) {
            debug!("failed to restore terminal attributes: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::pty::openpty;

    #[test]
    fn test_window_size_roundtrip() {
        let pty = openpty(None, None).unwrap();
        let ws = Winsize {
            ws_row: 40,
            ws_col: 120,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        set_window_size(&pty.master, &ws);

        let got = window_size(&pty.slave).unwrap();
        assert_eq!(got.ws_row, 40);
        assert_eq!(got.ws_col, 120);
    }

    #[test]
    fn test_window_size_none_for_non_terminal() {
        let file = std::fs::File::open("/dev/null").unwrap();
        assert!(window_size(&file).is_none());
    }

    #[test]
    fn test_raw_mode_guard_restores_attributes() {
        let pty = openpty(None, None).unwrap();
        let before = tcgetattr(&pty.slave).unwrap();

        {
            let _guard = RawModeGuard::enter(&pty.slave).unwrap();
            let during = tcgetattr(&pty.slave).unwrap();
            // Raw mode clears canonical input processing
            assert_ne!(during.local_flags, before.local_flags);
        }

        let after = tcgetattr(&pty.slave).unwrap();
        assert_eq!(after.local_flags, before.local_flags);
        assert_eq!(after.input_flags, before.input_flags);
        assert_eq!(after.output_flags, before.output_flags);
    }
}
