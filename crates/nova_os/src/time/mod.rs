//! Temporal quantification.
//!
//! A thin re-export of the standard library's `time` module.
//!
//! See the [standard library](https://doc.rust-lang.org/std/time) for further details.

pub use core::time::{Duration, TryFromFloatSecsError};
pub use std::time::{Instant, SystemTime, SystemTimeError};
