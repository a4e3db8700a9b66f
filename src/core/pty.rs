//! Unix PTY wrapper
//!
//! Allocates a pseudo-terminal pair and spawns a child process attached to
//! the subordinate end as its controlling terminal. The parent keeps only
//! the non-blocking controller descriptor.

use std::ffi::OsString;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::{openpty, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{read, write, Pid};
use thiserror::Error;
use tracing::debug;

use super::term::raw::set_window_size;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("failed to allocate pseudo-terminal: {0}")]
    Allocate(#[source] Errno),

    #[error("failed to configure controller descriptor: {0}")]
    Configure(#[source] Errno),

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to wait for child: {0}")]
    Wait(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, PtyError>;

/// A pseudo-terminal pair with a child process on its subordinate end
pub struct Pty {
    master: OwnedFd,
    child: Child,
}

impl Pty {
    /// Allocate a PTY pair and spawn `program` attached to the subordinate.
    ///
    /// The child becomes the leader of a new session with the subordinate as
    /// its controlling terminal, so one group signal later reaches it and
    /// anything it spawned. The given environment replaces the child's
    /// inherited one wholesale.
    pub fn spawn(
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
        env: &[(OsString, OsString)],
        winsize: Option<&Winsize>,
    ) -> Result<Self> {
        let pty = openpty(winsize, None).map_err(PtyError::Allocate)?;

        let slave_fd = pty.slave.as_raw_fd();
        let master_fd = pty.master.as_raw_fd();

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        cmd.env_clear();
        for (key, value) in env {
            cmd.env(key, value);
        }

        // SAFETY: the closure runs in the child between fork() and exec().
        // Everything in it is async-signal-safe (setsid, ioctl, dup2, close),
        // and both fds are plain i32s captured by value.
        let child = unsafe {
            cmd.pre_exec(move || {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                if libc::ioctl(slave_fd, libc::TIOCSCTTY as libc::c_ulong, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                if libc::dup2(slave_fd, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                if libc::dup2(slave_fd, 1) == -1 {
                    return Err(io::Error::last_os_error());
                }
                if libc::dup2(slave_fd, 2) == -1 {
                    return Err(io::Error::last_os_error());
                }
                if slave_fd > 2 {
                    libc::close(slave_fd);
                }
                // The child must not hold the controller open, or EOF
                // detection on teardown breaks.
                libc::close(master_fd);
                Ok(())
            })
            .spawn()
            .map_err(|source| PtyError::Spawn {
                command: program.to_string(),
                source,
            })?
        };

        // The child owns the subordinate now
        drop(pty.slave);
        set_nonblocking(&pty.master)?;

        debug!(pid = child.id(), program, "spawned child on pty");

        Ok(Self {
            master: pty.master,
            child,
        })
    }

    /// Borrow the controller descriptor for polling
    pub fn controller(&self) -> BorrowedFd<'_> {
        self.master.as_fd()
    }

    /// Non-blocking read of child output
    pub fn read(&self, buf: &mut [u8]) -> std::result::Result<usize, Errno> {
        read(self.master.as_fd(), buf)
    }

    /// Write caller input to the child, retrying short writes
    pub fn write_all(&self, data: &[u8]) -> std::result::Result<(), Errno> {
        let mut written = 0;
        while written < data.len() {
            match write(&self.master, &data[written..]) {
                Ok(n) => written += n,
                Err(Errno::EAGAIN) | Err(Errno::EINTR) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Re-apply window geometry to the pair, best-effort
    pub fn resize(&self, ws: &Winsize) {
        set_window_size(&self.master, ws);
    }

    /// Check whether the child has exited, reaping it if so
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        self.child.try_wait().map_err(PtyError::Wait)
    }

    /// Block until the child exits and return its status
    pub fn wait(&mut self) -> Result<ExitStatus> {
        self.child.wait().map_err(PtyError::Wait)
    }

    /// Signal the child's whole process group, best-effort
    pub fn signal_group(&self, signal: Signal) {
        // Negative PID addresses the group; the child is its leader
        let pgid = Pid::from_raw(-(self.child.id() as i32));
        if let Err(err) = kill(pgid, signal) {
            debug!("failed to signal child group: {}", err);
        }
    }
}

/// Map a wait status onto the shell convention: exit code as-is, signal
/// deaths as 128 plus the signal number
pub fn exit_code_from_status(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    if let Some(code) = status.code() {
        code
    } else if let Some(signal) = status.signal() {
        128 + signal
    } else {
        1
    }
}

fn set_nonblocking(fd: &OwnedFd) -> Result<()> {
    let flags = fcntl(fd.as_fd(), FcntlArg::F_GETFL).map_err(PtyError::Configure)?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(fd.as_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))
        .map_err(PtyError::Configure)?;
    Ok(())
}
