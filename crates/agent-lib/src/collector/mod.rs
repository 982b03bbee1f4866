//! Sample acquisition
//!
//! This module provides the collectors a session can tick against: a
//! synthetic generator, a Linux counter reader, and a collector that polls
//! a remote agent's `/monitor` endpoint. A [`CollectorProvider`] resolves the
//! session's active source to one of them.

mod demo;
mod local;
mod remote;
mod throughput;


pub use demo::{DemoCollector, Scenario};
pub use local::{
    cpu_percent, disk_usage_percent, io_percent, parse_cpu_times, parse_disk_sectors,
    parse_diskstats, parse_meminfo, parse_memory_free_gb, CpuTimes, DiskSectors, LocalCollector,
};
pub use remote::{MonitorPayload, RemoteCollector, DEFAULT_REMOTE_TIMEOUT};
pub use throughput::{Throughput, ThroughputTracker};

use crate::error::CollectionError;
use crate::models::MetricsSample;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub use async_trait::async_trait;

/// Produces one sample on demand
#[async_trait]
pub trait Collector: Send + Sync {
    /// Take a sample; may suspend on OS or network latency
    async fn sample(&self) -> Result<MetricsSample, CollectionError>;

    /// Raw host counters served alongside a sample on `/monitor`
    ///
    /// Collectors without access to host counters report none.
    async fn counters(&self) -> HostCounters {
        HostCounters::default()
    }

    /// Short name for logs
    fn name(&self) -> &str;
}

/// Cumulative host counters that do not fit a percentage
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HostCounters {
    pub memory_free_gb: Option<f64>,
    pub io_read_bytes: Option<u64>,
    pub io_write_bytes: Option<u64>,
}

/// Resolves a session source to a collector
pub trait CollectorProvider: Send + Sync {
    /// Collector for one caller; callers keep it across ticks
    fn local(&self) -> Arc<dyn Collector>;

    fn monitor(&self, url: &Url) -> Arc<dyn Collector>;
}

/// Backend used for the `local` source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalBackend {
    /// Read Linux counters under /proc
    Os,
    /// Synthetic generator
    Demo(Scenario),
}

/// Local source resolved once at startup
///
/// Each [`build`](LocalSource::build) returns a fresh collector, so sessions
/// and the `/monitor` endpoint keep independent I/O baselines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalSource {
    Os(PathBuf),
    Demo(Scenario),
}

impl LocalSource {
    /// Resolve `backend`, falling back to the generator without /proc
    pub async fn detect(backend: LocalBackend, proc_path: &Path) -> Self {
        match backend {
            LocalBackend::Os => {
                if tokio::fs::metadata(proc_path.join("stat")).await.is_ok() {
                    tracing::info!(proc = %proc_path.display(), "Using OS counter collector");
                    LocalSource::Os(proc_path.to_path_buf())
                } else {
                    tracing::warn!(
                        proc = %proc_path.display(),
                        "OS counters unavailable, falling back to synthetic samples"
                    );
                    LocalSource::Demo(Scenario::Normal)
                }
            }
            LocalBackend::Demo(scenario) => {
                tracing::info!(scenario = %scenario, "Using synthetic sample generator");
                LocalSource::Demo(scenario)
            }
        }
    }

    pub fn build(&self) -> Arc<dyn Collector> {
        match self {
            LocalSource::Os(proc_path) => Arc::new(LocalCollector::with_proc_path(proc_path)),
            LocalSource::Demo(scenario) => Arc::new(DemoCollector::new(*scenario)),
        }
    }

    /// Name of the collectors this source builds
    pub fn name(&self) -> &'static str {
        match self {
            LocalSource::Os(_) => "local",
            LocalSource::Demo(_) => "demo",
        }
    }
}

/// Create one local collector, falling back to the generator without /proc
pub async fn create_local_collector(backend: LocalBackend, proc_path: &Path) -> Arc<dyn Collector> {
    LocalSource::detect(backend, proc_path).await.build()
}

/// Provider backed by the resolved local source and a shared HTTP client
pub struct DefaultCollectorProvider {
    local: LocalSource,
    client: reqwest::Client,
    remote_timeout: Duration,
}

impl DefaultCollectorProvider {
    pub fn new(local: LocalSource, remote_timeout: Duration) -> Result<Self, CollectionError> {
        let client = reqwest::Client::builder()
            .timeout(remote_timeout)
            .build()
            .map_err(|e| CollectionError::Unavailable(format!("http client: {}", e)))?;

        Ok(Self {
            local,
            client,
            remote_timeout,
        })
    }
}

impl CollectorProvider for DefaultCollectorProvider {
    fn local(&self) -> Arc<dyn Collector> {
        self.local.build()
    }

    fn monitor(&self, url: &Url) -> Arc<dyn Collector> {
        Arc::new(RemoteCollector::with_client(
            self.client.clone(),
            url.clone(),
            self.remote_timeout,
        ))
    }
}
