//! Memory leak detection
//!
//! Fits an ordinary least-squares line to the most recent RAM readings
//! (sample index vs. percent) and reports sustained near-linear growth.

/// Number of trailing RAM readings analysed
pub const LEAK_WINDOW: usize = 25;

/// Detects memory leaks via linear regression on RAM readings
#[derive(Debug, Clone)]
pub struct LeakDetector {
    /// Number of trailing samples to fit
    pub window: usize,
    /// Latest RAM percent must be at least this
    pub min_latest: f64,
    /// Minimum rise (last - first) over the window, in percentage points
    pub min_rise: f64,
    /// Minimum fitted slope, in percentage points per sample
    pub min_slope: f64,
}

impl LeakDetector {
    pub fn new(window: usize, min_latest: f64, min_rise: f64, min_slope: f64) -> Self {
        Self {
            window,
            min_latest,
            min_rise,
            min_slope,
        }
    }

    /// Detect a leak in `ram`, ordered oldest first
    ///
    /// Only the trailing `window` readings are used. Returns `None` when fewer
    /// are available.
    pub fn detect(&self, ram: &[f64]) -> Option<LeakAnomaly> {
        if self.window < 2 || ram.len() < self.window {
            return None;
        }

        let window = &ram[ram.len() - self.window..];
        let first = window[0];
        let current = window[window.len() - 1];
        let rise = current - first;
        let slope = linear_regression_slope(window);

        let fires = current >= self.min_latest && rise >= self.min_rise && slope >= self.min_slope;
        if !fires {
            return None;
        }

        Some(LeakAnomaly {
            slope_per_sample: slope,
            rise,
            current,
            r_squared: r_squared(window, slope),
            samples_analyzed: window.len(),
        })
    }
}

impl Default for LeakDetector {
    fn default() -> Self {
        Self {
            window: LEAK_WINDOW,
            min_latest: 80.0,
            min_rise: 8.0,
            min_slope: 0.22,
        }
    }
}

/// OLS slope of `values` against their index
fn linear_regression_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if n < 2.0 {
        return 0.0;
    }

    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;

    for (i, y) in values.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }

    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator.abs() < f64::EPSILON {
        return 0.0;
    }

    (n * sum_xy - sum_x * sum_y) / denominator
}

/// Coefficient of determination for the fitted line
fn r_squared(values: &[f64], slope: f64) -> f64 {
    let n = values.len() as f64;
    if n < 2.0 {
        return 0.0;
    }

    let mean_y = values.iter().sum::<f64>() / n;
    let mean_x = (n - 1.0) / 2.0;
    let intercept = mean_y - slope * mean_x;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (i, y) in values.iter().enumerate() {
        let predicted = slope * i as f64 + intercept;
        ss_res += (y - predicted).powi(2);
        ss_tot += (y - mean_y).powi(2);
    }

    if ss_tot.abs() < f64::EPSILON {
        return 0.0;
    }

    1.0 - ss_res / ss_tot
}

/// Memory leak details
#[derive(Debug, Clone)]
pub struct LeakAnomaly {
    /// Fitted growth in percentage points per sample
    pub slope_per_sample: f64,
    /// Last minus first reading of the window
    pub rise: f64,
    /// Latest RAM percent
    pub current: f64,
    /// Goodness of the linear fit, 0.0-1.0 for sane input
    pub r_squared: f64,
    pub samples_analyzed: usize,
}
