//! Process management utilities for the warden core library
//!
//! ## Platform Support
//!
//! - **Unix**: workers run in their own process group so the whole tree can be
//!   signalled on stop

#[cfg(unix)]
pub mod unix;

#[cfg(unix)]
pub use unix::*;
