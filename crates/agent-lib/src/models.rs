//! Core data models for the healwatch agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provenance of a metrics sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleSource {
    Demo,
    Local,
    Monitor,
    Ssh,
}

impl std::fmt::Display for SampleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleSource::Demo => write!(f, "demo"),
            SampleSource::Local => write!(f, "local"),
            SampleSource::Monitor => write!(f, "monitor"),
            SampleSource::Ssh => write!(f, "ssh"),
        }
    }
}

/// One resource-utilization reading
///
/// Percent fields are expected in [0,100] but nothing downstream relies on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    pub cpu: f64,
    pub ram: f64,
    pub disk: f64,
    pub io: f64,
    pub errors: f64,
    pub timestamp: DateTime<Utc>,
    pub source: SampleSource,
}

impl MetricsSample {
    /// Sample stamped with the current time
    pub fn now(source: SampleSource, cpu: f64, ram: f64, disk: f64, io: f64) -> Self {
        Self {
            cpu,
            ram,
            disk,
            io,
            errors: 0.0,
            timestamp: Utc::now(),
            source,
        }
    }
}

/// Anomaly classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CpuSpike,
    RamSpike,
    IoSpike,
    DiskFull,
    RamLeak,
    AgentUnreachable,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CpuSpike => "cpu_spike",
            EventKind::RamSpike => "ram_spike",
            EventKind::IoSpike => "io_spike",
            EventKind::DiskFull => "disk_full",
            EventKind::RamLeak => "ram_leak",
            EventKind::AgentUnreachable => "agent_unreachable",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warn => write!(f, "warn"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Mitigation the detector recommends
///
/// Only `EnableRateLimit` and `IsolateNode` change controller state. The
/// restart and load-balancing variants are advisory and are recorded as such
/// when executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AiAction {
    EnableRateLimit { seconds: u64 },
    IsolateNode,
    RestartService { name: String },
    RestartContainer { name: String },
    LoadBalanceHint,
}

impl AiAction {
    pub fn label(&self) -> &'static str {
        match self {
            AiAction::EnableRateLimit { .. } => "enable_rate_limit",
            AiAction::IsolateNode => "isolate_node",
            AiAction::RestartService { .. } => "restart_service",
            AiAction::RestartContainer { .. } => "restart_container",
            AiAction::LoadBalanceHint => "load_balance_hint",
        }
    }
}

/// Self-healing trust level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealMode {
    #[default]
    DryRun,
    Armed,
}

impl HealMode {
    /// Map free-form input onto a legal mode; anything but "armed" is dry-run
    pub fn normalize(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("armed") {
            HealMode::Armed
        } else {
            HealMode::DryRun
        }
    }
}

impl std::fmt::Display for HealMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealMode::DryRun => write!(f, "dry-run"),
            HealMode::Armed => write!(f, "armed"),
        }
    }
}

/// What happened to a proposed action when the controller processed it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Dry-run record, no side effect
    Simulated,
    /// Controller state was mutated
    Applied,
    /// No executable effect in this agent
    Advisory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutedAction {
    pub action: AiAction,
    pub outcome: ActionOutcome,
    pub detail: String,
}

/// Execution record attached by the self-healing controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutedRecord {
    pub mode: HealMode,
    pub actions: Vec<ExecutedAction>,
}

/// Detected anomaly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub severity: Severity,
    pub message: String,
    pub source: String,
    /// Sample that triggered the event, absent for synthesized events with no history
    pub metrics: Option<MetricsSample>,
    pub proposed_actions: Vec<AiAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed: Option<ExecutedRecord>,
}

impl AiEvent {
    pub fn new(
        kind: EventKind,
        severity: Severity,
        message: impl Into<String>,
        source: impl Into<String>,
        metrics: Option<MetricsSample>,
        proposed_actions: Vec<AiAction>,
    ) -> Self {
        let timestamp = metrics
            .as_ref()
            .map(|m| m.timestamp)
            .unwrap_or_else(Utc::now);
        Self {
            id: Uuid::new_v4(),
            timestamp,
            kind,
            severity,
            message: message.into(),
            source: source.into(),
            metrics,
            proposed_actions,
            executed: None,
        }
    }
}

/// Process-wide self-healing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfHealPolicy {
    pub enabled: bool,
    pub mode: HealMode,
    pub rate_limit_seconds: u64,
}

impl Default for SelfHealPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: HealMode::DryRun,
            rate_limit_seconds: 30,
        }
    }
}

/// Partial policy update; absent fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyUpdate {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub rate_limit_seconds: Option<f64>,
}

/// Point-in-time view of the controller published to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub enabled: bool,
    pub mode: HealMode,
    pub rate_limit_seconds: u64,
    pub rate_limited: bool,
    pub rate_limit_until: Option<DateTime<Utc>>,
    pub isolated: bool,
}
