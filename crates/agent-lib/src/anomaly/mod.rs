//! Anomaly detection over a session's sample stream
//!
//! This module provides detection for:
//! - Absolute threshold breaches (CPU, RAM, I/O, disk)
//! - Statistical spikes (z-score against a trailing baseline)
//! - Memory leaks (sustained linear RAM growth)

mod cooldown;
mod detector;
mod leak_detector;
mod spike_detector;

pub use cooldown::CooldownTable;
pub use detector::{proposed_actions, AnomalyDetector, HISTORY_CAPACITY};
pub use leak_detector::{LeakAnomaly, LeakDetector, LEAK_WINDOW};
pub use spike_detector::{BaselineStats, SpikeAnomaly, SpikeDetector, BASELINE_WINDOW};
