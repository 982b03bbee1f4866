//! Per-connection monitoring state machine
//!
//! A [`Session`] owns its detector and its source selection. The self-heal
//! controller is shared with every other session and injected at
//! construction.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};
use uuid::Uuid;

use super::messages::{ActiveSource, ControlMessage, StatusLevel};
use super::publisher::Publisher;
use super::registry::SessionRegistry;
use crate::anomaly::AnomalyDetector;
use crate::collector::{Collector, CollectorProvider};
use crate::error::CollectionError;
use crate::healing::SelfHealingController;
use crate::models::{AiEvent, EventKind, MetricsSample, Severity};
use crate::observability::{MonitorMetrics, StructuredLogger};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1200);
pub const DEFAULT_FALLBACK_THRESHOLD: u32 = 3;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Time between ticks
    pub tick_interval: Duration,
    /// Consecutive monitor failures before falling back to local
    pub fallback_threshold: u32,
    /// Outbound message buffer per session
    pub buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            fallback_threshold: DEFAULT_FALLBACK_THRESHOLD,
            buffer_size: 256,
        }
    }
}

/// Outcome of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickReport {
    /// Node isolated, nothing collected
    Paused,
    Collected { events: usize },
    Failed { streak: u32, fell_back: bool },
}

pub struct Session {
    id: String,
    detector: AnomalyDetector,
    source: ActiveSource,
    collector: Arc<dyn Collector>,
    error_streak: u32,
    fallback_threshold: u32,
    ticks: u64,
    controller: Arc<SelfHealingController>,
    provider: Arc<dyn CollectorProvider>,
    publisher: Arc<dyn Publisher>,
    registry: Option<Arc<SessionRegistry>>,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl Session {
    /// New session on the local source
    pub fn new(
        controller: Arc<SelfHealingController>,
        provider: Arc<dyn CollectorProvider>,
        publisher: Arc<dyn Publisher>,
        logger: StructuredLogger,
    ) -> Self {
        let collector = provider.local();
        Self {
            id: Uuid::new_v4().to_string(),
            detector: AnomalyDetector::new(),
            source: ActiveSource::Local,
            collector,
            error_streak: 0,
            fallback_threshold: DEFAULT_FALLBACK_THRESHOLD,
            ticks: 0,
            controller,
            provider,
            publisher,
            registry: None,
            metrics: MonitorMetrics::new(),
            logger,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_detector(mut self, detector: AnomalyDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_fallback_threshold(mut self, threshold: u32) -> Self {
        self.fallback_threshold = threshold.max(1);
        self
    }

    /// Keep the registry entry's source in step with this session
    pub fn with_registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &ActiveSource {
        &self.source
    }

    pub fn error_streak(&self) -> u32 {
        self.error_streak
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn detector(&self) -> &AnomalyDetector {
        &self.detector
    }

    /// Initial status and policy for a new subscriber
    pub fn announce(&self) {
        self.publisher.publish_status(
            StatusLevel::Info,
            &format!("session {} started on {} source", self.id, self.source),
        );
        self.publisher.publish_policy(&self.controller.snapshot());
    }

    /// Run one collection, detection and mitigation cycle
    pub async fn tick(&mut self) -> TickReport {
        if self.controller.is_isolated() {
            self.publisher
                .publish_status(StatusLevel::Warn, "node isolated, monitoring paused");
            return TickReport::Paused;
        }

        self.ticks += 1;
        self.metrics.inc_ticks();

        let start = Instant::now();
        let result = self.collector.sample().await;
        self.metrics
            .observe_collection_latency(start.elapsed().as_secs_f64());

        match result {
            Ok(sample) => self.on_sample(sample),
            Err(e) => self.on_failure(e),
        }
    }

    fn on_sample(&mut self, sample: MetricsSample) -> TickReport {
        self.error_streak = 0;
        self.publisher.publish_metrics(&sample);

        let source = sample.source.to_string();
        self.detector.push(sample);
        let raw = self.detector.detect(&source);
        let events = self.controller.apply(raw);
        self.publish_events(&events);

        if !events.is_empty() {
            let snapshot = self.controller.snapshot();
            self.metrics.set_policy_state(&snapshot);
            self.publisher.publish_policy(&snapshot);
        }

        TickReport::Collected {
            events: events.len(),
        }
    }

    fn on_failure(&mut self, error: CollectionError) -> TickReport {
        self.error_streak += 1;
        let streak = self.error_streak;
        self.metrics.inc_collection_errors();

        debug!(
            session_id = %self.id,
            collector = %self.collector.name(),
            streak = streak,
            error = %error,
            "Collection failed"
        );
        self.publisher.publish_status(
            StatusLevel::Error,
            &format!("collection failed ({} in a row): {}", streak, error),
        );

        let url = match &self.source {
            ActiveSource::Monitor(url) if streak >= self.fallback_threshold => url.to_string(),
            _ => {
                return TickReport::Failed {
                    streak,
                    fell_back: false,
                }
            }
        };

        self.logger.log_fallback(&self.id, &url, streak);
        self.metrics.inc_source_fallbacks();
        self.switch_source(ActiveSource::Local);

        let event = AiEvent::new(
            EventKind::AgentUnreachable,
            Severity::Warn,
            format!(
                "Agent at {} unreachable after {} attempts, switched to local source",
                url, streak
            ),
            "monitor",
            self.detector.latest().cloned(),
            Vec::new(),
        );
        self.publish_events(std::slice::from_ref(&event));

        TickReport::Failed {
            streak,
            fell_back: true,
        }
    }

    fn publish_events(&self, events: &[AiEvent]) {
        for event in events {
            self.logger.log_anomaly(&self.id, event);
            self.logger.log_actions_executed(&self.id, event);
            self.metrics.record_event(event);
            self.publisher.publish_event(event);
        }
    }

    /// Takes effect on the next tick; the error streak restarts
    pub fn switch_source(&mut self, source: ActiveSource) {
        self.collector = match &source {
            ActiveSource::Local => self.provider.local(),
            ActiveSource::Monitor(url) => self.provider.monitor(url),
        };
        self.source = source;
        self.error_streak = 0;

        if let Some(registry) = &self.registry {
            registry.update_source(&self.id, &self.source);
        }
        info!(session_id = %self.id, source = %self.source, "Session source switched");
    }

    pub fn handle_control(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::SetSource { source, url } => {
                match ActiveSource::from_request(source, url.as_deref()) {
                    Ok(source) => {
                        self.switch_source(source);
                        self.publisher.publish_status(
                            StatusLevel::Info,
                            &format!("source set to {}", self.source),
                        );
                    }
                    Err(e) => self.publisher.publish_status(StatusLevel::Error, &e.to_string()),
                }
            }
            ControlMessage::SetSelfHeal(update) => match self.controller.set_config(update) {
                Ok(_) => {
                    let snapshot = self.controller.snapshot();
                    self.logger.log_policy_change(&snapshot);
                    self.metrics.set_policy_state(&snapshot);
                    self.publisher.publish_policy(&snapshot);
                }
                Err(e) => self.publisher.publish_status(StatusLevel::Error, &e.to_string()),
            },
        }
    }

    /// Parse and apply a raw control frame; malformed input is reported and ignored
    pub fn handle_raw_control(&mut self, raw: &str) {
        match ControlMessage::parse(raw) {
            Ok(message) => self.handle_control(message),
            Err(e) => {
                debug!(session_id = %self.id, error = %e, "Ignoring control message");
                self.publisher
                    .publish_status(StatusLevel::Error, &format!("ignored: {}", e));
            }
        }
    }
}
