//! Self-healing policy engine
//!
//! A single controller instance is shared by every session. It owns the
//! process-wide rate-limit window and the isolation latch.

mod controller;

pub use controller::{
    SelfHealingController, BASELINE_RATE_LIMIT_SECS, MAX_RATE_LIMIT_SECS, MIN_RATE_LIMIT_SECS,
};
