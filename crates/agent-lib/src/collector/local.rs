//! Linux counter collection
//!
//! Reads host-wide utilization from procfs:
//! - /proc/stat for CPU busy time between two reads
//! - /proc/meminfo for MemTotal and MemAvailable
//! - /proc/diskstats for sector throughput of whole disks
//! - statvfs on the root mount for filesystem usage

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::{Collector, HostCounters};
use crate::error::CollectionError;
use crate::models::{MetricsSample, SampleSource};

/// Gap between the two /proc/stat reads
const CPU_SAMPLE_WINDOW: Duration = Duration::from_millis(100);

/// Throughput reported as 100% I/O
const IO_FULL_SCALE_BYTES_PER_SEC: f64 = 100.0 * 1024.0 * 1024.0;

const SECTOR_BYTES: f64 = 512.0;

/// Aggregate CPU jiffies from the first line of /proc/stat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub total: u64,
    /// idle + iowait
    pub idle: u64,
}

/// Parse the aggregate `cpu` line of /proc/stat
pub fn parse_cpu_times(content: &str) -> Option<CpuTimes> {
    let line = content.lines().next()?;
    let mut parts = line.split_whitespace();
    if parts.next()? != "cpu" {
        return None;
    }

    let values: Vec<u64> = parts.map(|p| p.parse().unwrap_or(0)).collect();
    if values.len() < 4 {
        return None;
    }

    let total = values.iter().sum();
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Some(CpuTimes { total, idle })
}

/// Busy percentage between two /proc/stat readings
pub fn cpu_percent(before: CpuTimes, after: CpuTimes) -> Option<f64> {
    let total = after.total.checked_sub(before.total)?;
    if total == 0 {
        return None;
    }
    let idle = after.idle.saturating_sub(before.idle).min(total);
    Some(clamp_percent((total - idle) as f64 / total as f64 * 100.0))
}

/// MemTotal and MemAvailable in KiB
fn parse_meminfo_kib(content: &str) -> Option<(u64, u64)> {
    let mut total = None;
    let mut available = None;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("MemTotal:") => total = parts.next().and_then(|v| v.parse::<u64>().ok()),
            Some("MemAvailable:") => available = parts.next().and_then(|v| v.parse::<u64>().ok()),
            _ => {}
        }
        if total.is_some() && available.is_some() {
            break;
        }
    }

    Some((total.filter(|t| *t > 0)?, available?))
}

/// Used-memory percentage from /proc/meminfo
pub fn parse_meminfo(content: &str) -> Option<f64> {
    let (total, available) = parse_meminfo_kib(content)?;
    let used = total.saturating_sub(available);
    Some(clamp_percent(used as f64 / total as f64 * 100.0))
}

/// MemAvailable in GiB, rounded to two decimals
pub fn parse_memory_free_gb(content: &str) -> Option<f64> {
    let (_, available) = parse_meminfo_kib(content)?;
    let gib = available as f64 / (1024.0 * 1024.0);
    Some((gib * 100.0).round() / 100.0)
}

/// Whole-disk device names; partitions, loop and ram devices are skipped
fn is_whole_disk(dev: &str) -> bool {
    if dev.starts_with("loop") || dev.starts_with("ram") {
        return false;
    }
    if let Some(rest) = dev.strip_prefix("nvme") {
        return !rest.contains('p');
    }
    if dev.starts_with("sd") || dev.starts_with("vd") || dev.starts_with("xvd") {
        return !dev.ends_with(|c: char| c.is_ascii_digit());
    }
    false
}

/// Cumulative sectors across whole disks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskSectors {
    pub read: u64,
    pub written: u64,
}

impl DiskSectors {
    pub fn total(&self) -> u64 {
        self.read + self.written
    }

    pub fn read_bytes(&self) -> u64 {
        self.read.saturating_mul(SECTOR_BYTES as u64)
    }

    pub fn written_bytes(&self) -> u64 {
        self.written.saturating_mul(SECTOR_BYTES as u64)
    }
}

/// Sectors read and written across whole disks in /proc/diskstats
pub fn parse_disk_sectors(content: &str) -> DiskSectors {
    content
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 14 || !is_whole_disk(parts[2]) {
                return None;
            }
            Some(DiskSectors {
                read: parts[5].parse().ok()?,
                written: parts[9].parse().ok()?,
            })
        })
        .fold(DiskSectors::default(), |acc, d| DiskSectors {
            read: acc.read + d.read,
            written: acc.written + d.written,
        })
}

/// Total sectors read plus written across whole disks in /proc/diskstats
pub fn parse_diskstats(content: &str) -> u64 {
    parse_disk_sectors(content).total()
}

/// I/O load as a percentage of the full-scale throughput
pub fn io_percent(delta_sectors: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    let bytes_per_sec = delta_sectors as f64 * SECTOR_BYTES / secs;
    clamp_percent(bytes_per_sec / IO_FULL_SCALE_BYTES_PER_SEC * 100.0)
}

/// Used-space percentage of the filesystem holding `path`
#[cfg(unix)]
pub fn disk_usage_percent(path: &Path) -> Option<f64> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: c_path is NUL-terminated and stat is a valid out-pointer
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if ret != 0 {
        return None;
    }

    let block_size = stat.f_frsize as u64;
    let total = stat.f_blocks as u64 * block_size;
    let free = stat.f_bfree as u64 * block_size;
    if total == 0 {
        return None;
    }
    let used = total.saturating_sub(free);
    Some(clamp_percent(used as f64 / total as f64 * 100.0))
}

#[cfg(not(unix))]
pub fn disk_usage_percent(_path: &Path) -> Option<f64> {
    None
}

fn clamp_percent(v: f64) -> f64 {
    v.clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Copy)]
struct DiskSnapshot {
    sectors: u64,
    at: Instant,
}

/// Collector for host counters under procfs
///
/// The I/O percentage is a delta against this instance's previous read, so
/// every consumer that needs a meaningful rate holds its own instance.
/// [`LocalSource::build`](super::LocalSource::build) hands out one per call.
pub struct LocalCollector {
    proc_path: PathBuf,
    mount_path: PathBuf,
    cpu_window: Duration,
    previous_disk: Mutex<Option<DiskSnapshot>>,
}

impl LocalCollector {
    pub fn new() -> Self {
        Self::with_proc_path("/proc")
    }

    /// Create collector with custom proc path (for testing)
    pub fn with_proc_path(proc_path: impl Into<PathBuf>) -> Self {
        Self {
            proc_path: proc_path.into(),
            mount_path: PathBuf::from("/"),
            cpu_window: CPU_SAMPLE_WINDOW,
            previous_disk: Mutex::new(None),
        }
    }

    /// Filesystem whose usage is reported as `disk`
    pub fn with_mount_path(mut self, mount_path: impl Into<PathBuf>) -> Self {
        self.mount_path = mount_path.into();
        self
    }

    async fn read_proc(&self, name: &str) -> Result<String, CollectionError> {
        let path = self.proc_path.join(name);
        fs::read_to_string(&path).await.map_err(|e| {
            CollectionError::Unavailable(format!("failed to read {}: {}", path.display(), e))
        })
    }

    async fn read_cpu(&self) -> Result<f64, CollectionError> {
        let parse = |content: String| {
            parse_cpu_times(&content)
                .ok_or_else(|| CollectionError::Unavailable("no cpu line in stat".to_string()))
        };

        let before = parse(self.read_proc("stat").await?)?;
        tokio::time::sleep(self.cpu_window).await;
        let after = parse(self.read_proc("stat").await?)?;

        // Counters that did not advance read as idle
        Ok(cpu_percent(before, after).unwrap_or(0.0))
    }

    /// First call establishes the baseline and reports 0
    fn io_since_last(&self, sectors: u64) -> f64 {
        let now = Instant::now();
        let mut previous = self
            .previous_disk
            .lock()
            .unwrap_or_else(|p| p.into_inner());

        let io = match *previous {
            Some(prev) => io_percent(
                sectors.saturating_sub(prev.sectors),
                now.duration_since(prev.at),
            ),
            None => 0.0,
        };
        *previous = Some(DiskSnapshot { sectors, at: now });
        io
    }
}

impl Default for LocalCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for LocalCollector {
    async fn counters(&self) -> HostCounters {
        let memory_free_gb = match self.read_proc("meminfo").await {
            Ok(content) => parse_memory_free_gb(&content),
            Err(_) => None,
        };
        let (io_read_bytes, io_write_bytes) = match self.read_proc("diskstats").await {
            Ok(content) => {
                let sectors = parse_disk_sectors(&content);
                (Some(sectors.read_bytes()), Some(sectors.written_bytes()))
            }
            Err(_) => (None, None),
        };

        HostCounters {
            memory_free_gb,
            io_read_bytes,
            io_write_bytes,
        }
    }

    async fn sample(&self) -> Result<MetricsSample, CollectionError> {
        let cpu = self.read_cpu().await?;

        let ram = parse_meminfo(&self.read_proc("meminfo").await?)
            .ok_or_else(|| CollectionError::Unavailable("meminfo incomplete".to_string()))?;

        let io = match self.read_proc("diskstats").await {
            Ok(content) => self.io_since_last(parse_diskstats(&content)),
            Err(e) => {
                debug!(error = %e, "diskstats unavailable, reporting zero I/O");
                0.0
            }
        };

        let disk = disk_usage_percent(&self.mount_path).unwrap_or(0.0);

        Ok(MetricsSample::now(SampleSource::Local, cpu, ram, disk, io))
    }

    fn name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_times() {
        let content = "cpu  100 0 50 800 50 0 0 0 0 0\ncpu0 50 0 25 400 25 0 0 0 0 0\n";
        let times = parse_cpu_times(content).expect("cpu line");
        assert_eq!(times.total, 1000);
        assert_eq!(times.idle, 850);
    }

    #[test]
    fn test_parse_cpu_times_rejects_garbage() {
        assert!(parse_cpu_times("intr 1 2 3").is_none());
        assert!(parse_cpu_times("").is_none());
        assert!(parse_cpu_times("cpu 1 2").is_none());
    }

    #[test]
    fn test_cpu_percent() {
        let before = CpuTimes {
            total: 1000,
            idle: 800,
        };
        let after = CpuTimes {
            total: 1200,
            idle: 850,
        };
        let pct = cpu_percent(before, after).expect("delta");
        assert!((pct - 75.0).abs() < 1e-9);

        assert!(cpu_percent(after, after).is_none());
        assert!(cpu_percent(after, before).is_none());
    }

    #[test]
    fn test_parse_meminfo() {
        let content = "MemTotal:       16000000 kB\nMemFree:         1000000 kB\nMemAvailable:    4000000 kB\n";
        let pct = parse_meminfo(content).expect("meminfo");
        assert!((pct - 75.0).abs() < 1e-9);

        assert!(parse_meminfo("MemTotal: 0 kB\nMemAvailable: 0 kB\n").is_none());
        assert!(parse_meminfo("MemFree: 10 kB\n").is_none());
    }

    #[test]
    fn test_whole_disk_filter() {
        assert!(is_whole_disk("sda"));
        assert!(is_whole_disk("xvda"));
        assert!(is_whole_disk("nvme0n1"));
        assert!(!is_whole_disk("sda1"));
        assert!(!is_whole_disk("nvme0n1p2"));
        assert!(!is_whole_disk("loop0"));
        assert!(!is_whole_disk("ram0"));
        assert!(!is_whole_disk("dm-0"));
    }

    #[test]
    fn test_parse_diskstats() {
        let content = "\
   8       0 sda 100 0 2000 0 50 0 3000 0 0 0 0 0 0 0 0
   8       1 sda1 90 0 1800 0 40 0 2500 0 0 0 0 0 0 0 0
 259       0 nvme0n1 10 0 100 0 10 0 200 0 0 0 0 0 0 0 0
   7       0 loop0 5 0 999 0 0 0 0 0 0 0 0 0 0 0 0
";
        assert_eq!(parse_diskstats(content), 2000 + 3000 + 100 + 200);
    }

    #[test]
    fn test_memory_free_gb() {
        let content = "MemTotal:       16000000 kB\nMemAvailable:    4194304 kB\n";
        assert_eq!(parse_memory_free_gb(content), Some(4.0));
        assert!(parse_memory_free_gb("MemTotal: 10 kB\n").is_none());
    }

    #[test]
    fn test_disk_sectors_split_read_and_write() {
        let content = "\
   8       0 sda 100 0 2000 0 50 0 3000 0 0 0 0 0 0 0 0
   8       1 sda1 90 0 1800 0 40 0 2500 0 0 0 0 0 0 0 0
 259       0 nvme0n1 10 0 100 0 10 0 200 0 0 0 0 0 0 0 0
";
        let sectors = parse_disk_sectors(content);
        assert_eq!(sectors.read, 2100);
        assert_eq!(sectors.written, 3200);
        assert_eq!(sectors.read_bytes(), 2100 * 512);
        assert_eq!(sectors.written_bytes(), 3200 * 512);
        assert_eq!(parse_disk_sectors("garbage"), DiskSectors::default());
    }

    #[test]
    fn test_io_percent_scale() {
        // 204800 sectors * 512 B = 100 MiB in one second
        assert!((io_percent(204_800, Duration::from_secs(1)) - 100.0).abs() < 1e-9);
        assert!((io_percent(102_400, Duration::from_secs(1)) - 50.0).abs() < 1e-9);
        assert_eq!(io_percent(1_000_000_000, Duration::from_secs(1)), 100.0);
        assert_eq!(io_percent(100, Duration::ZERO), 0.0);
    }

    #[test]
    fn test_first_io_reading_is_zero() {
        let collector = LocalCollector::new();
        assert_eq!(collector.io_since_last(5_000), 0.0);
        assert!(collector.io_since_last(5_000) >= 0.0);
    }

    #[cfg(unix)]
    #[test]
    fn test_disk_usage_of_root() {
        let pct = disk_usage_percent(Path::new("/")).expect("root mount");
        assert!((0.0..=100.0).contains(&pct));
        assert!(disk_usage_percent(Path::new("/definitely/not/here")).is_none());
    }
}
