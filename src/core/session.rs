//! Relay session
//!
//! One child, one PTY, one pass through a poll-driven event loop that
//! shuttles bytes between the child's terminal and the caller's streams.

use std::ffi::OsString;
use std::io::Write;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::Signal;
use nix::unistd::{isatty, read};
use thiserror::Error;
use tracing::{debug, info, trace};

use super::pty::{exit_code_from_status, Pty, PtyError};
use super::term::raw;
use super::term::{EscapeFilter, RawModeGuard};

/// Exit code reported when the wall-clock limit kills the child
pub const TIMEOUT_EXIT_CODE: i32 = 124;

const POLL_INTERVAL_MS: u16 = 100;
const READ_BUF_SIZE: usize = 4096;
const TERM_GRACE: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Pty(#[from] PtyError),

    #[error("poll failed: {0}")]
    Poll(#[source] Errno),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Everything one relay run needs to know
pub struct SessionOptions {
    /// Target program
    pub program: String,
    /// Arguments passed through verbatim
    pub args: Vec<String>,
    /// Working directory for the child
    pub cwd: Option<PathBuf>,
    /// Wall-clock limit; None runs to completion
    pub timeout: Option<Duration>,
    /// Environment handed to the child
    pub env: Vec<(OsString, OsString)>,
    /// Strip escape sequences from child output
    pub strip_escapes: bool,
}

/// A single supervised run of the target program
pub struct Session {
    opts: SessionOptions,
}

impl Session {
    pub fn new(opts: SessionOptions) -> Self {
        Self { opts }
    }

    /// Run the child against the wrapper's own standard streams
    pub fn run(&self) -> Result<i32> {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        self.run_with_io(Some(stdin.as_fd()), &mut stdout)
    }

    /// Relay between an explicit caller input descriptor and output writer.
    ///
    /// Only a terminal-attached input joins the relay: it is switched to raw
    /// mode for the duration and its bytes are forwarded to the child
    /// unfiltered. A non-terminal input is ignored entirely, matching how
    /// the wrapper behaves under automation.
    fn run_with_io<W: Write>(
        &self,
        caller_input: Option<BorrowedFd<'_>>,
        output: &mut W,
    ) -> Result<i32> {
        let mut input = caller_input.filter(|fd| isatty(fd).unwrap_or(false));
        let winsize = input.as_ref().and_then(raw::window_size);

        let mut pty = Pty::spawn(
            &self.opts.program,
            &self.opts.args,
            self.opts.cwd.as_deref(),
            &self.opts.env,
            winsize.as_ref(),
        )?;

        let mut raw_guard = None;
        if let Some(fd) = input {
            match RawModeGuard::enter(&fd) {
                Ok(guard) => {
                    raw_guard = Some(guard);
                    if let Err(err) = raw::watch_resize() {
                        debug!("failed to install resize handler: {}", err);
                    }
                }
                Err(err) => {
                    // Without raw mode the caller's terminal would echo and
                    // line-buffer; drop the input side, keep relaying output
                    debug!("failed to enter raw mode: {}", err);
                    input = None;
                }
            }
        }

        let result = self.relay_loop(&mut pty, input, output);

        // Controller closes with the Pty; the guard puts the caller's
        // terminal back on every path, error or not
        drop(raw_guard);
        result
    }

    fn relay_loop<W: Write>(
        &self,
        pty: &mut Pty,
        mut input: Option<BorrowedFd<'_>>,
        output: &mut W,
    ) -> Result<i32> {
        let started = Instant::now();
        let mut filter = self.opts.strip_escapes.then(EscapeFilter::new);
        let mut buf = [0u8; READ_BUF_SIZE];

        let status = loop {
            if let Some(limit) = self.opts.timeout {
                if started.elapsed() > limit {
                    info!(elapsed = ?started.elapsed(), "timeout exceeded, terminating child group");
                    self.terminate_group(pty);
                    return Ok(TIMEOUT_EXIT_CODE);
                }
            }

            if raw::take_resize_pending() {
                if let Some(fd) = input {
                    if let Some(ws) = raw::window_size(&fd) {
                        pty.resize(&ws);
                    }
                }
            }

            let (controller_ready, input_ready) = {
                let mut poll_fds = Vec::with_capacity(2);
                poll_fds.push(PollFd::new(pty.controller(), PollFlags::POLLIN));
                if let Some(fd) = input {
                    poll_fds.push(PollFd::new(fd, PollFlags::POLLIN));
                }

                match poll(&mut poll_fds, PollTimeout::from(POLL_INTERVAL_MS)) {
                    Ok(0) => (false, false),
                    Ok(_) => {
                        let ready = |pfd: &PollFd<'_>| {
                            pfd.revents().map_or(false, |r| {
                                r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP)
                            })
                        };
                        (ready(&poll_fds[0]), poll_fds.get(1).map_or(false, ready))
                    }
                    Err(Errno::EINTR) => continue,
                    Err(err) => return Err(SessionError::Poll(err)),
                }
            };

            if controller_ready {
                match pty.read(&mut buf) {
                    Ok(n) if n > 0 => {
                        trace!(bytes = n, "child output");
                        forward_output(&mut filter, &buf[..n], output);
                    }
                    // A drained or closed subordinate reads as empty; it only
                    // ends the session once the child is gone
                    Ok(_) | Err(Errno::EIO) => {
                        if let Some(status) = pty.try_wait()? {
                            break status;
                        }
                    }
                    Err(Errno::EAGAIN) => {}
                    Err(err) => {
                        debug!("controller read failed: {}", err);
                        if let Some(status) = pty.try_wait()? {
                            break status;
                        }
                    }
                }
            }

            if input_ready {
                if let Some(fd) = input {
                    match read(fd, &mut buf) {
                        Ok(0) | Err(Errno::EIO) => {
                            // Caller input is gone; stop watching it but keep
                            // relaying child output
                            debug!("caller input closed");
                            input = None;
                        }
                        Ok(n) => {
                            if let Err(err) = pty.write_all(&buf[..n]) {
                                debug!("forward to child failed: {}", err);
                            }
                        }
                        Err(Errno::EAGAIN) | Err(Errno::EINTR) => {}
                        Err(err) => {
                            debug!("caller input read failed: {}", err);
                        }
                    }
                }
            }

            if let Some(status) = pty.try_wait()? {
                // Catch output produced between the last poll and exit
                drain_controller(pty, &mut filter, &mut buf, output);
                break status;
            }
        };

        let code = exit_code_from_status(status);
        debug!(code, "child exited");
        Ok(code)
    }

    /// SIGTERM the group, give it a grace period, then escalate to SIGKILL
    fn terminate_group(&self, pty: &mut Pty) {
        pty.signal_group(Signal::SIGTERM);
        if wait_for_exit(pty, TERM_GRACE) {
            return;
        }
        debug!("child ignored SIGTERM, escalating to SIGKILL");
        pty.signal_group(Signal::SIGKILL);
        // SIGKILL cannot be ignored; reap so no zombie outlives the session
        if let Err(err) = pty.wait() {
            debug!("failed to reap child after SIGKILL: {}", err);
        }
    }
}

fn wait_for_exit(pty: &mut Pty, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        match pty.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => std::thread::sleep(Duration::from_millis(50)),
            Err(_) => return true,
        }
    }
    false
}

fn forward_output<W: Write>(filter: &mut Option<EscapeFilter>, data: &[u8], output: &mut W) {
    match filter {
        Some(f) => write_chunk(output, &f.feed(data)),
        None => write_chunk(output, data),
    }
}

fn write_chunk<W: Write>(output: &mut W, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    // Output hiccups never abort the relay; the child's exit code is still
    // the contract
    if let Err(err) = output.write_all(data).and_then(|()| output.flush()) {
        debug!("caller output write failed: {}", err);
    }
}

fn drain_controller<W: Write>(
    pty: &Pty,
    filter: &mut Option<EscapeFilter>,
    buf: &mut [u8],
    output: &mut W,
) {
    loop {
        match pty.read(buf) {
            Ok(n) if n > 0 => forward_output(filter, &buf[..n], output),
            // Empty, would-block, or EIO: nothing left to collect
            Ok(_) | Err(_) => break,
        }
    }
}
