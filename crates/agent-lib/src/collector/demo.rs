//! Synthetic sample generator
//!
//! Produces plausible readings for demos and tests, optionally biased by a
//! named scenario. Never fails.

use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{Collector, HostCounters};
use crate::error::CollectionError;
use crate::models::{MetricsSample, SampleSource};

/// Shape of the synthetic stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    #[default]
    Normal,
    /// Periodic CPU bursts
    CpuSpike,
    /// RAM climbs steadily, then resets
    MemoryLeak,
    /// Disk usage creeps towards full
    DiskFill,
    /// Periodic I/O saturation
    IoStorm,
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Scenario::Normal => "normal",
            Scenario::CpuSpike => "cpu_spike",
            Scenario::MemoryLeak => "memory_leak",
            Scenario::DiskFill => "disk_fill",
            Scenario::IoStorm => "io_storm",
        };
        f.write_str(name)
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "" | "normal" => Ok(Scenario::Normal),
            "cpu_spike" => Ok(Scenario::CpuSpike),
            "memory_leak" | "leak" => Ok(Scenario::MemoryLeak),
            "disk_fill" => Ok(Scenario::DiskFill),
            "io_storm" => Ok(Scenario::IoStorm),
            other => Err(format!("unknown scenario {:?}", other)),
        }
    }
}

/// Memory size the synthetic free-memory figure is derived from
const DEMO_MEMORY_GB: f64 = 16.0;

/// Bytes moved per sample at 100% I/O
const DEMO_IO_FULL_SCALE_BYTES: f64 = 100.0 * 1024.0 * 1024.0;

#[derive(Debug)]
struct DemoState {
    tick: u64,
    ram: f64,
    disk: f64,
    last_ram: f64,
    read_bytes: u64,
    write_bytes: u64,
}

pub struct DemoCollector {
    scenario: Scenario,
    state: Mutex<DemoState>,
}

impl DemoCollector {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            state: Mutex::new(DemoState {
                tick: 0,
                ram: 55.0,
                disk: 80.0,
                last_ram: 55.0,
                read_bytes: 0,
                write_bytes: 0,
            }),
        }
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    fn next_sample(&self) -> MetricsSample {
        let mut rng = rand::thread_rng();
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.tick += 1;

        let mut cpu = rng.gen_range(18.0..42.0);
        let mut ram = rng.gen_range(40.0..52.0);
        let mut disk = rng.gen_range(55.0..58.0);
        let mut io = rng.gen_range(4.0..22.0);
        let mut errors: f64 = rng.gen_range(0.0_f64..3.0).floor();

        match self.scenario {
            Scenario::Normal => {}
            Scenario::CpuSpike => {
                if state.tick % 20 >= 17 {
                    cpu = rng.gen_range(88.0..99.5);
                    errors += 5.0;
                }
            }
            Scenario::MemoryLeak => {
                state.ram = if state.ram >= 97.0 {
                    55.0
                } else {
                    state.ram + rng.gen_range(0.6..1.1)
                };
                ram = state.ram;
            }
            Scenario::DiskFill => {
                state.disk = (state.disk + 0.35).min(99.0);
                disk = state.disk;
            }
            Scenario::IoStorm => {
                if state.tick % 15 >= 12 {
                    io = rng.gen_range(96.0..100.0);
                    errors += 2.0;
                }
            }
        }

        // Split the moved bytes 60/40 between reads and writes
        let moved = io / 100.0 * DEMO_IO_FULL_SCALE_BYTES;
        state.read_bytes += (moved * 0.6) as u64;
        state.write_bytes += (moved * 0.4) as u64;
        state.last_ram = ram;

        let round = |v: f64| (v * 100.0).round() / 100.0;
        let mut sample = MetricsSample::now(
            SampleSource::Demo,
            round(cpu),
            round(ram),
            round(disk),
            round(io),
        );
        sample.errors = errors;
        sample
    }
}

#[async_trait]
impl Collector for DemoCollector {
    async fn sample(&self) -> Result<MetricsSample, CollectionError> {
        Ok(self.next_sample())
    }

    async fn counters(&self) -> HostCounters {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let free = (100.0 - state.last_ram).clamp(0.0, 100.0) / 100.0 * DEMO_MEMORY_GB;
        HostCounters {
            memory_free_gb: Some((free * 100.0).round() / 100.0),
            io_read_bytes: Some(state.read_bytes),
            io_write_bytes: Some(state.write_bytes),
        }
    }

    fn name(&self) -> &str {
        "demo"
    }
}
