//! Core relay components.
//!
//! This module contains the PTY plumbing and the event loop:
//!
//! - **pty**: pseudo-terminal allocation and child process spawning
//! - **term**: ANSI escape filtering and caller-side terminal state
//! - **session**: the poll-driven relay loop tying both together
//!
//! # Architecture
//!
//! ```text
//! Session
//! ├── Pty (controller fd + child process on the subordinate)
//! └── term
//!     ├── EscapeFilter (strips CSI/OSC/DCS from child output)
//!     └── RawModeGuard (caller terminal snapshot + restore)
//! ```

pub mod pty;
pub mod session;
pub mod term;
