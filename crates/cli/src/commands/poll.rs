//! Poll a `/monitor` endpoint from the terminal

use std::time::{Duration, Instant};

use anyhow::Result;
use colored::Colorize;

use crate::client::{MonitorClient, MonitorPayload};
use crate::output::{color_percent, print_info, print_warning, OutputFormat};

/// Poll `client` every `interval`, `count` times or until interrupted
///
/// Failures print a warning line and polling continues.
pub async fn poll(
    client: &MonitorClient,
    interval: Duration,
    count: Option<u32>,
    format: OutputFormat,
) -> Result<u32> {
    if format == OutputFormat::Table {
        print_info(&format!("Polling {} every {:?}", client.url(), interval));
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut failures = 0;
    let mut polled = 0;
    let mut rates = DiskRates::default();

    while count.map_or(true, |c| polled < c) {
        ticker.tick().await;
        polled += 1;

        match client.poll().await {
            Ok((payload, latency)) => {
                let (read_mb_s, write_mb_s) = rates.update(&payload, Instant::now());
                print_reading(&payload, latency, read_mb_s, write_mb_s, format)?
            }
            Err(e) => {
                failures += 1;
                print_warning(&format!("poll {} failed: {:#}", polled, e));
            }
        }
    }

    Ok(failures)
}

const MIB: f64 = 1024.0 * 1024.0;

/// Disk read/write MiB/s between successive polls
///
/// The first poll, and any poll whose counters went backwards, reads 0.00.
#[derive(Debug, Default)]
struct DiskRates {
    previous: Option<(u64, u64, Instant)>,
}

impl DiskRates {
    fn update(&mut self, payload: &MonitorPayload, at: Instant) -> (f64, f64) {
        let (Some(read), Some(written)) = (payload.io_read_bytes, payload.io_write_bytes) else {
            return (0.0, 0.0);
        };

        let rates = match self.previous {
            Some((prev_read, prev_written, prev_at)) => {
                let secs = at.saturating_duration_since(prev_at).as_secs_f64();
                if secs > 0.0 {
                    (
                        read.saturating_sub(prev_read) as f64 / MIB / secs,
                        written.saturating_sub(prev_written) as f64 / MIB / secs,
                    )
                } else {
                    (0.0, 0.0)
                }
            }
            None => (0.0, 0.0),
        };
        self.previous = Some((read, written, at));
        rates
    }
}

fn print_reading(
    payload: &MonitorPayload,
    latency: Duration,
    read_mb_s: f64,
    write_mb_s: f64,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let round = |v: f64| (v * 100.0).round() / 100.0;
            let line = serde_json::json!({
                "payload": payload,
                "latency_ms": latency.as_millis() as u64,
                "read_mb_s": round(read_mb_s),
                "write_mb_s": round(write_mb_s),
            });
            println!("{}", serde_json::to_string(&line)?);
        }
        OutputFormat::Table => {
            let io = payload
                .io_percent
                .map(color_percent)
                .unwrap_or_else(|| "-".to_string());
            let free = payload
                .memory_free_gb
                .map(|gb| format!("{:.2}GB", gb))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{} cpu {}  ram {} ({} free)  disk {}  io {}  R {:.2} MB/s  W {:.2} MB/s  {}",
                payload.host.as_deref().unwrap_or("?").cyan(),
                color_percent(payload.cpu_percent),
                color_percent(payload.memory_percent),
                free,
                color_percent(payload.disk_percent),
                io,
                read_mb_s,
                write_mb_s,
                format!("{}ms", latency.as_millis()).dimmed()
            );
        }
    }
    Ok(())
}
