//! Terminal byte-stream handling: output filtering and caller-side state.

pub mod filter;
pub mod raw;

pub use filter::EscapeFilter;
pub use raw::RawModeGuard;
