//! Disk throughput from cumulative byte counters

use std::time::Instant;

use serde::Serialize;

const MIB: f64 = 1024.0 * 1024.0;

/// Read and write rates in MiB/s
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Throughput {
    pub read_mb_s: f64,
    pub write_mb_s: f64,
}

/// Turns successive counter readings into rates
///
/// A counter that goes backwards (agent restart) reads as zero throughput
/// for that interval.
#[derive(Debug, Default)]
pub struct ThroughputTracker {
    previous: Option<(u64, u64, Instant)>,
}

impl ThroughputTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reading; `None` until a baseline exists
    pub fn observe(&mut self, read_bytes: u64, write_bytes: u64, at: Instant) -> Option<Throughput> {
        let rates = self.previous.map(|(prev_read, prev_write, prev_at)| {
            let secs = at.saturating_duration_since(prev_at).as_secs_f64();
            if secs <= 0.0 {
                return Throughput {
                    read_mb_s: 0.0,
                    write_mb_s: 0.0,
                };
            }
            Throughput {
                read_mb_s: read_bytes.saturating_sub(prev_read) as f64 / MIB / secs,
                write_mb_s: write_bytes.saturating_sub(prev_write) as f64 / MIB / secs,
            }
        });
        self.previous = Some((read_bytes, write_bytes, at));
        rates
    }
}
