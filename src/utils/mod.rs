//! Utility Module
//!
//! - [`time`]: the monotonic [`Timer`] that stamps cache use

pub mod time;

pub use time::Timer;
