//! Observability infrastructure for the monitoring agent
//!
//! Provides:
//! - Prometheus metrics (tick latency, collection failures, events, actions, policy state)
//! - Structured JSON logging with tracing, including the served `/monitor` readings

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::collector::{MonitorPayload, Throughput};
use crate::models::{AiEvent, PolicySnapshot, SampleSource, Severity};

/// Histogram buckets for collection latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    ticks: IntCounter,
    collection_latency_seconds: Histogram,
    collection_errors: IntCounter,
    events_detected: IntCounterVec,
    actions_executed: IntCounterVec,
    source_fallbacks: IntCounter,
    active_sessions: IntGauge,
    rate_limited: IntGauge,
    isolated: IntGauge,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            ticks: register_int_counter!(
                "healwatch_ticks_total",
                "Session ticks that attempted a collection"
            )
            .expect("Failed to register ticks_total"),

            collection_latency_seconds: register_histogram!(
                "healwatch_collection_latency_seconds",
                "Time spent taking one sample from the active collector",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register collection_latency_seconds"),

            collection_errors: register_int_counter!(
                "healwatch_collection_errors_total",
                "Samples that failed to collect"
            )
            .expect("Failed to register collection_errors_total"),

            events_detected: register_int_counter_vec!(
                "healwatch_events_detected_total",
                "Events published by sessions, by kind",
                &["kind"]
            )
            .expect("Failed to register events_detected_total"),

            actions_executed: register_int_counter_vec!(
                "healwatch_actions_executed_total",
                "Self-heal actions recorded, by mode",
                &["mode"]
            )
            .expect("Failed to register actions_executed_total"),

            source_fallbacks: register_int_counter!(
                "healwatch_source_fallbacks_total",
                "Sessions switched from a remote agent back to the local source"
            )
            .expect("Failed to register source_fallbacks_total"),

            active_sessions: register_int_gauge!(
                "healwatch_active_sessions",
                "Monitoring sessions currently open"
            )
            .expect("Failed to register active_sessions"),

            rate_limited: register_int_gauge!(
                "healwatch_rate_limited",
                "1 while the self-heal rate limit window is open"
            )
            .expect("Failed to register rate_limited"),

            isolated: register_int_gauge!(
                "healwatch_isolated",
                "1 once the node isolation latch is set"
            )
            .expect("Failed to register isolated"),
        }
    }
}

/// Monitor metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    pub fn inc_ticks(&self) {
        self.inner().ticks.inc();
    }

    pub fn observe_collection_latency(&self, duration_secs: f64) {
        self.inner().collection_latency_seconds.observe(duration_secs);
    }

    pub fn inc_collection_errors(&self) {
        self.inner().collection_errors.inc();
    }

    /// Count published events and the actions recorded on them
    pub fn record_event(&self, event: &AiEvent) {
        self.inner()
            .events_detected
            .with_label_values(&[event.kind.as_str()])
            .inc();

        if let Some(executed) = &event.executed {
            self.inner()
                .actions_executed
                .with_label_values(&[&executed.mode.to_string()])
                .inc_by(executed.actions.len() as u64);
        }
    }

    pub fn inc_source_fallbacks(&self) {
        self.inner().source_fallbacks.inc();
    }

    pub fn session_opened(&self) {
        self.inner().active_sessions.inc();
    }

    pub fn session_closed(&self) {
        self.inner().active_sessions.dec();
    }

    /// Mirror the controller's runtime state
    pub fn set_policy_state(&self, snapshot: &PolicySnapshot) {
        self.inner().rate_limited.set(snapshot.rate_limited as i64);
        self.inner().isolated.set(snapshot.isolated as i64);
    }
}

/// Structured logger for agent events
///
/// Emits the canonical event lines with consistent field names so the JSON
/// log stream can be filtered on `event`.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, local_source: &str) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            local_source = %local_source,
            "Monitoring agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Monitoring agent shutting down"
        );
    }

    pub fn log_session_opened(&self, session_id: &str) {
        info!(
            event = "session_opened",
            node = %self.node_name,
            session_id = %session_id,
            "Monitoring session opened"
        );
    }

    pub fn log_session_closed(&self, session_id: &str, ticks: u64) {
        info!(
            event = "session_closed",
            node = %self.node_name,
            session_id = %session_id,
            ticks = ticks,
            "Monitoring session closed"
        );
    }

    /// Log an emitted event; critical ones go out at warn level
    pub fn log_anomaly(&self, session_id: &str, event: &AiEvent) {
        let (cpu, ram, io) = event
            .metrics
            .as_ref()
            .map(|m| (m.cpu, m.ram, m.io))
            .unwrap_or_default();

        match event.severity {
            Severity::Critical => {
                warn!(
                    event = "anomaly_detected",
                    node = %self.node_name,
                    session_id = %session_id,
                    event_id = %event.id,
                    anomaly_type = %event.kind.as_str(),
                    severity = "critical",
                    source = %event.source,
                    cpu = cpu,
                    ram = ram,
                    io = io,
                    details = %event.message,
                    "Critical anomaly detected"
                );
            }
            _ => {
                info!(
                    event = "anomaly_detected",
                    node = %self.node_name,
                    session_id = %session_id,
                    event_id = %event.id,
                    anomaly_type = %event.kind.as_str(),
                    severity = %event.severity,
                    source = %event.source,
                    cpu = cpu,
                    ram = ram,
                    io = io,
                    details = %event.message,
                    "Anomaly detected"
                );
            }
        }
    }

    /// Log actions attached to an event by the controller
    pub fn log_actions_executed(&self, session_id: &str, event: &AiEvent) {
        if let Some(executed) = &event.executed {
            let actions: Vec<&str> = executed.actions.iter().map(|a| a.action.label()).collect();
            info!(
                event = "actions_executed",
                node = %self.node_name,
                session_id = %session_id,
                event_id = %event.id,
                mode = %executed.mode,
                actions = ?actions,
                "Self-heal actions recorded"
            );
        }
    }

    pub fn log_fallback(&self, session_id: &str, from_url: &str, failures: u32) {
        warn!(
            event = "source_fallback",
            node = %self.node_name,
            session_id = %session_id,
            from_url = %from_url,
            consecutive_failures = failures,
            to_source = %SampleSource::Local,
            "Remote agent unreachable, falling back to local source"
        );
    }

    /// Reading served on `/monitor`, with disk throughput once a baseline exists
    pub fn log_monitor_served(&self, payload: &MonitorPayload, throughput: Option<Throughput>) {
        match throughput {
            Some(rates) => info!(
                event = "monitor_served",
                node = %self.node_name,
                cpu = payload.cpu_percent,
                ram = payload.memory_percent,
                disk = payload.disk_percent,
                read_mb_s = round2(rates.read_mb_s),
                write_mb_s = round2(rates.write_mb_s),
                "Served monitor reading"
            ),
            None => info!(
                event = "monitor_served",
                node = %self.node_name,
                cpu = payload.cpu_percent,
                ram = payload.memory_percent,
                disk = payload.disk_percent,
                "Served monitor reading"
            ),
        }
    }

    pub fn log_policy_change(&self, snapshot: &PolicySnapshot) {
        info!(
            event = "policy_changed",
            node = %self.node_name,
            enabled = snapshot.enabled,
            mode = %snapshot.mode,
            rate_limit_seconds = snapshot.rate_limit_seconds,
            "Self-heal policy updated"
        );
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
