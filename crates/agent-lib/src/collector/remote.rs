//! Remote agent collector
//!
//! Polls another agent's `/monitor` endpoint. Non-2xx responses, timeouts
//! and unparseable bodies are collection failures.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{Collector, HostCounters};
use crate::error::CollectionError;
use crate::models::{MetricsSample, SampleSource};

pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(5);

/// Body served by an agent's `/monitor` endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorPayload {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_free_gb: Option<f64>,
    pub disk_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io_percent: Option<f64>,
    /// Cumulative bytes read across whole disks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io_read_bytes: Option<u64>,
    /// Cumulative bytes written across whole disks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io_write_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<f64>,
    /// Milliseconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
}

impl MonitorPayload {
    pub fn from_sample(sample: &MetricsSample, host: impl Into<String>) -> Self {
        Self {
            cpu_percent: sample.cpu,
            memory_percent: sample.ram,
            memory_free_gb: None,
            disk_percent: sample.disk,
            io_percent: Some(sample.io),
            io_read_bytes: None,
            io_write_bytes: None,
            errors: Some(sample.errors),
            updated_at: Some(sample.timestamp.timestamp_millis()),
            host: Some(host.into()),
            os: Some(std::env::consts::OS.to_string()),
        }
    }

    pub fn with_counters(mut self, counters: HostCounters) -> Self {
        self.memory_free_gb = counters.memory_free_gb;
        self.io_read_bytes = counters.io_read_bytes;
        self.io_write_bytes = counters.io_write_bytes;
        self
    }

    /// Convert to a sample stamped with the local receive time
    ///
    /// Agents that do not report I/O get the request latency as a proxy,
    /// one second of latency reading as 100%.
    pub fn into_sample(self, latency: Duration) -> MetricsSample {
        let io = self
            .io_percent
            .unwrap_or_else(|| (latency.as_secs_f64() * 100.0).clamp(0.0, 100.0));

        MetricsSample {
            cpu: self.cpu_percent,
            ram: self.memory_percent,
            disk: self.disk_percent,
            io,
            errors: self.errors.unwrap_or(0.0),
            timestamp: Utc::now(),
            source: SampleSource::Monitor,
        }
    }
}

/// Collector that polls a remote `/monitor` endpoint
pub struct RemoteCollector {
    client: reqwest::Client,
    url: Url,
    timeout: Duration,
}

impl RemoteCollector {
    pub fn new(url: Url) -> Result<Self, CollectionError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REMOTE_TIMEOUT)
            .build()
            .map_err(|e| CollectionError::Unavailable(format!("http client: {}", e)))?;
        Ok(Self::with_client(client, url, DEFAULT_REMOTE_TIMEOUT))
    }

    pub fn with_client(client: reqwest::Client, url: Url, timeout: Duration) -> Self {
        Self {
            client,
            url,
            timeout,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Collector for RemoteCollector {
    async fn sample(&self) -> Result<MetricsSample, CollectionError> {
        let start = Instant::now();
        let response = self
            .client
            .get(self.url.clone())
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CollectionError::Http {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        let latency = start.elapsed();
        let payload: MonitorPayload = serde_json::from_slice(&body)
            .map_err(|e| CollectionError::MalformedBody(e.to_string()))?;

        Ok(payload.into_sample(latency))
    }

    fn name(&self) -> &str {
        "monitor"
    }
}
