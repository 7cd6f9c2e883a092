//! Timeline helpers.
//!
//! This module provides free-window detection between busy intervals,
//! shared by the fallback scheduler and the conflict resolver.

mod gap;

pub use gap::{first_fit, BusySpan, TimeGap, TimeGapDetector};
