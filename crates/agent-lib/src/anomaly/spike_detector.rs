//! Statistical spike detection
//!
//! Compares the newest reading against the mean and standard deviation of a
//! trailing baseline and flags readings in the elevated band whose z-score
//! exceeds a per-metric threshold.

/// Maximum number of baseline samples (newest excluded)
pub const BASELINE_WINDOW: usize = 60;

/// Lower edge of the elevated band
pub const ELEVATED_FLOOR: f64 = 85.0;

/// Readings at or above this belong to the absolute layer
pub const ABSOLUTE_CRITICAL: f64 = 95.0;

/// Below this the baseline is treated as flat
const DEGENERATE_STD_DEV: f64 = 0.001;

/// On a flat baseline, a reading this far above the mean saturates the score
const DEGENERATE_MARGIN: f64 = 5.0;

/// Mean and standard deviation of a baseline window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineStats {
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
    pub count: usize,
}

impl BaselineStats {
    /// Compute statistics with a two-pass algorithm
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let values: Vec<f64> = values.into_iter().collect();
        let count = values.len();
        if count == 0 {
            return Self {
                mean: 0.0,
                std_dev: 0.0,
                count: 0,
            };
        }

        let mean = values.iter().sum::<f64>() / count as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;

        Self {
            mean,
            std_dev: variance.sqrt(),
            count,
        }
    }

    /// Standard score of `current` against this baseline
    ///
    /// Returns `f64::INFINITY` when the baseline is flat and `current` clears
    /// it by the degenerate margin, and `0.0` for any other flat case. NaN
    /// statistics yield NaN, which never compares above a threshold.
    pub fn z_score(&self, current: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }

        if self.std_dev > DEGENERATE_STD_DEV {
            (current - self.mean) / self.std_dev
        } else if current > self.mean + DEGENERATE_MARGIN {
            f64::INFINITY
        } else {
            0.0
        }
    }
}

/// Flags elevated readings that deviate sharply from the baseline
#[derive(Debug, Clone, Copy)]
pub struct SpikeDetector {
    /// Number of standard deviations to consider a spike
    pub z_threshold: f64,
}

impl SpikeDetector {
    pub fn new(z_threshold: f64) -> Self {
        Self { z_threshold }
    }

    /// Detect a spike of `current` against `baseline`
    ///
    /// Only readings in `[ELEVATED_FLOOR, ABSOLUTE_CRITICAL)` qualify.
    pub fn detect(&self, current: f64, baseline: &BaselineStats) -> Option<SpikeAnomaly> {
        if !(ELEVATED_FLOOR..ABSOLUTE_CRITICAL).contains(&current) {
            return None;
        }

        let z_score = baseline.z_score(current);
        if z_score > self.z_threshold {
            Some(SpikeAnomaly {
                current,
                expected: baseline.mean,
                z_score,
                std_dev: baseline.std_dev,
                threshold: self.z_threshold,
            })
        } else {
            None
        }
    }
}

/// Spike details
#[derive(Debug, Clone)]
pub struct SpikeAnomaly {
    pub current: f64,
    /// Baseline mean
    pub expected: f64,
    pub z_score: f64,
    pub std_dev: f64,
    pub threshold: f64,
}

impl SpikeAnomaly {
    /// Percentage points above the baseline mean
    pub fn points_above_expected(&self) -> f64 {
        self.current - self.expected
    }
}
