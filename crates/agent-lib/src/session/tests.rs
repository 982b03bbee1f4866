//! Session scenarios against scripted collectors

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use url::Url;

use super::*;
use crate::collector::{Collector, CollectorProvider};
use crate::error::CollectionError;
use crate::healing::SelfHealingController;
use crate::models::{
    AiEvent, EventKind, HealMode, MetricsSample, PolicySnapshot, SampleSource, SelfHealPolicy,
    Severity,
};
use crate::observability::StructuredLogger;

/// Collector that replays a script, repeating the last entry
struct ScriptedCollector {
    script: Mutex<VecDeque<Result<MetricsSample, ()>>>,
    calls: AtomicUsize,
    name: &'static str,
}

impl ScriptedCollector {
    fn new(name: &'static str, script: Vec<Result<MetricsSample, ()>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            name,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Collector for ScriptedCollector {
    async fn sample(&self) -> Result<MetricsSample, CollectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        match next {
            Some(Ok(mut sample)) => {
                sample.timestamp = chrono::Utc::now();
                Ok(sample)
            }
            _ => Err(CollectionError::Timeout),
        }
    }

    fn name(&self) -> &str {
        self.name
    }
}

struct TestProvider {
    local: Arc<ScriptedCollector>,
    monitor: Arc<ScriptedCollector>,
}

impl CollectorProvider for TestProvider {
    fn local(&self) -> Arc<dyn Collector> {
        self.local.clone()
    }

    fn monitor(&self, _url: &Url) -> Arc<dyn Collector> {
        self.monitor.clone()
    }
}

#[derive(Default)]
struct RecordingPublisher {
    messages: Mutex<Vec<SessionMessage>>,
}

impl RecordingPublisher {
    fn messages(&self) -> Vec<SessionMessage> {
        self.messages.lock().unwrap().clone()
    }

    fn events(&self) -> Vec<AiEvent> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                SessionMessage::Event(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn policies(&self) -> Vec<PolicySnapshot> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                SessionMessage::Policy(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    fn statuses(&self) -> Vec<(StatusLevel, String)> {
        self.messages()
            .into_iter()
            .filter_map(|m| match m {
                SessionMessage::Status { level, message } => Some((level, message)),
                _ => None,
            })
            .collect()
    }

    fn clear(&self) {
        self.messages.lock().unwrap().clear();
    }
}

impl Publisher for RecordingPublisher {
    fn publish_status(&self, level: StatusLevel, message: &str) {
        self.messages.lock().unwrap().push(SessionMessage::Status {
            level,
            message: message.to_string(),
        });
    }

    fn publish_metrics(&self, sample: &MetricsSample) {
        self.messages
            .lock()
            .unwrap()
            .push(SessionMessage::Metrics(sample.clone()));
    }

    fn publish_event(&self, event: &AiEvent) {
        self.messages
            .lock()
            .unwrap()
            .push(SessionMessage::Event(event.clone()));
    }

    fn publish_policy(&self, snapshot: &PolicySnapshot) {
        self.messages
            .lock()
            .unwrap()
            .push(SessionMessage::Policy(snapshot.clone()));
    }
}

fn sample(cpu: f64, ram: f64, disk: f64, io: f64) -> MetricsSample {
    MetricsSample::now(SampleSource::Local, cpu, ram, disk, io)
}

fn quiet() -> MetricsSample {
    sample(30.0, 45.0, 50.0, 10.0)
}

fn armed_controller() -> Arc<SelfHealingController> {
    Arc::new(SelfHealingController::new(SelfHealPolicy {
        enabled: true,
        mode: HealMode::Armed,
        rate_limit_seconds: 30,
    }))
}

struct Harness {
    session: Session,
    local: Arc<ScriptedCollector>,
    monitor: Arc<ScriptedCollector>,
    publisher: Arc<RecordingPublisher>,
    controller: Arc<SelfHealingController>,
}

fn harness(
    controller: Arc<SelfHealingController>,
    local: Vec<Result<MetricsSample, ()>>,
    monitor: Vec<Result<MetricsSample, ()>>,
) -> Harness {
    let local = ScriptedCollector::new("local", local);
    let monitor = ScriptedCollector::new("monitor", monitor);
    let provider = Arc::new(TestProvider {
        local: local.clone(),
        monitor: monitor.clone(),
    });
    let publisher = Arc::new(RecordingPublisher::default());
    let session = Session::new(
        controller.clone(),
        provider,
        publisher.clone(),
        StructuredLogger::new("test-node"),
    );

    Harness {
        session,
        local,
        monitor,
        publisher,
        controller,
    }
}

fn monitor_source() -> ActiveSource {
    ActiveSource::monitor(Some("http://10.0.0.9:5000/monitor")).unwrap()
}

#[tokio::test]
async fn test_successful_tick_publishes_metrics() {
    let mut h = harness(armed_controller(), vec![Ok(quiet())], vec![]);

    let report = h.session.tick().await;

    assert_eq!(report, TickReport::Collected { events: 0 });
    assert_eq!(h.session.detector().len(), 1);
    assert_eq!(h.session.ticks(), 1);
    let messages = h.publisher.messages();
    assert_eq!(messages.len(), 1);
    assert!(matches!(messages[0], SessionMessage::Metrics(_)));
}

#[tokio::test]
async fn test_monitor_failures_fall_back_once() {
    let mut h = harness(armed_controller(), vec![Ok(quiet())], vec![Err(())]);
    h.session.switch_source(monitor_source());

    assert_eq!(
        h.session.tick().await,
        TickReport::Failed {
            streak: 1,
            fell_back: false
        }
    );
    assert_eq!(
        h.session.tick().await,
        TickReport::Failed {
            streak: 2,
            fell_back: false
        }
    );
    assert_eq!(
        h.session.tick().await,
        TickReport::Failed {
            streak: 3,
            fell_back: true
        }
    );

    assert_eq!(h.session.source(), &ActiveSource::Local);
    assert_eq!(h.session.error_streak(), 0);

    let unreachable: Vec<AiEvent> = h
        .publisher
        .events()
        .into_iter()
        .filter(|e| e.kind == EventKind::AgentUnreachable)
        .collect();
    assert_eq!(unreachable.len(), 1);
    assert_eq!(unreachable[0].severity, Severity::Warn);
    assert!(unreachable[0].proposed_actions.is_empty());

    let errors = h
        .publisher
        .statuses()
        .into_iter()
        .filter(|(level, _)| *level == StatusLevel::Error)
        .count();
    assert_eq!(errors, 3);

    // Next tick reads the local collector
    assert_eq!(h.session.tick().await, TickReport::Collected { events: 0 });
    assert_eq!(h.monitor.calls(), 3);
    assert_eq!(h.local.calls(), 1);
    assert_eq!(h.publisher.events().len(), 1);
}

#[tokio::test]
async fn test_local_failures_never_fall_back() {
    let mut h = harness(armed_controller(), vec![Err(())], vec![]);

    for expected in 1..=5 {
        assert_eq!(
            h.session.tick().await,
            TickReport::Failed {
                streak: expected,
                fell_back: false
            }
        );
    }
    assert!(h.publisher.events().is_empty());
}

#[tokio::test]
async fn test_success_resets_streak() {
    let mut h = harness(
        armed_controller(),
        vec![Ok(quiet())],
        vec![Err(()), Err(()), Ok(quiet()), Err(()), Err(())],
    );
    h.session.switch_source(monitor_source());

    for _ in 0..5 {
        h.session.tick().await;
    }

    assert_eq!(h.session.source().kind(), SourceKind::Monitor);
    assert_eq!(h.session.error_streak(), 2);
    assert!(h.publisher.events().is_empty());
}

#[tokio::test]
async fn test_policy_published_after_apply() {
    let mut h = harness(armed_controller(), vec![Ok(sample(96.0, 40.0, 50.0, 10.0))], vec![]);

    let report = h.session.tick().await;
    assert_eq!(report, TickReport::Collected { events: 1 });

    let messages = h.publisher.messages();
    let event_at = messages
        .iter()
        .position(|m| matches!(m, SessionMessage::Event(_)))
        .unwrap();
    let policy_at = messages
        .iter()
        .position(|m| matches!(m, SessionMessage::Policy(_)))
        .unwrap();
    assert!(policy_at > event_at);

    let policy = &h.publisher.policies()[0];
    assert!(policy.rate_limited);
    assert!(!policy.isolated);

    let event = &h.publisher.events()[0];
    assert_eq!(event.kind, EventKind::CpuSpike);
    assert_eq!(
        event.executed.as_ref().map(|r| r.mode),
        Some(HealMode::Armed)
    );
}

#[tokio::test]
async fn test_no_policy_without_events() {
    let mut h = harness(armed_controller(), vec![Ok(quiet())], vec![]);
    for _ in 0..3 {
        h.session.tick().await;
    }
    assert!(h.publisher.policies().is_empty());
}

#[tokio::test]
async fn test_isolation_pauses_collection() {
    let mut h = harness(
        armed_controller(),
        vec![Ok(sample(30.0, 40.0, 98.0, 10.0)), Ok(quiet())],
        vec![],
    );

    assert_eq!(h.session.tick().await, TickReport::Collected { events: 1 });
    assert!(h.controller.is_isolated());
    assert!(h.publisher.policies()[0].isolated);

    h.publisher.clear();
    assert_eq!(h.session.tick().await, TickReport::Paused);
    assert_eq!(h.session.tick().await, TickReport::Paused);

    assert_eq!(h.local.calls(), 1);
    let statuses = h.publisher.statuses();
    assert_eq!(statuses.len(), 2);
    assert!(statuses.iter().all(|(level, _)| *level == StatusLevel::Warn));
}

#[tokio::test]
async fn test_dry_run_tick_keeps_controller_state() {
    let controller = Arc::new(SelfHealingController::new(SelfHealPolicy {
        enabled: true,
        mode: HealMode::DryRun,
        rate_limit_seconds: 30,
    }));
    let mut h = harness(controller, vec![Ok(sample(30.0, 40.0, 98.0, 10.0))], vec![]);

    h.session.tick().await;

    assert!(!h.controller.is_isolated());
    assert!(!h.controller.is_rate_limited());
    let event = &h.publisher.events()[0];
    assert_eq!(event.kind, EventKind::DiskFull);
    assert_eq!(
        event.executed.as_ref().map(|r| r.mode),
        Some(HealMode::DryRun)
    );
}

#[tokio::test]
async fn test_control_set_source() {
    let mut h = harness(armed_controller(), vec![Ok(quiet())], vec![Err(())]);

    h.session.switch_source(monitor_source());
    h.session.tick().await;
    assert_eq!(h.session.error_streak(), 1);

    h.session
        .handle_raw_control(r#"{"type":"set_source","source":"monitor","url":"http://10.0.0.10:5000/monitor"}"#);
    assert_eq!(h.session.error_streak(), 0);
    assert_eq!(
        h.session.source().url().map(|u| u.as_str()),
        Some("http://10.0.0.10:5000/monitor")
    );

    h.session
        .handle_raw_control(r#"{"type":"set_source","source":"local"}"#);
    assert_eq!(h.session.source(), &ActiveSource::Local);
}

#[tokio::test]
async fn test_control_rejections_leave_state() {
    let mut h = harness(armed_controller(), vec![Ok(quiet())], vec![]);

    h.session
        .handle_raw_control(r#"{"type":"set_source","source":"monitor","url":"ftp://x"}"#);
    h.session
        .handle_raw_control(r#"{"type":"set_source","source":"monitor"}"#);
    h.session.handle_raw_control("garbage");

    assert_eq!(h.session.source(), &ActiveSource::Local);
    let statuses = h.publisher.statuses();
    assert_eq!(statuses.len(), 3);
    assert!(statuses.iter().all(|(level, _)| *level == StatusLevel::Error));
}

#[tokio::test]
async fn test_control_set_self_heal() {
    let mut h = harness(
        Arc::new(SelfHealingController::default()),
        vec![Ok(quiet())],
        vec![],
    );

    h.session.handle_raw_control(
        r#"{"type":"set_self_heal","enabled":true,"mode":"armed","rate_limit_seconds":1000}"#,
    );

    let config = h.controller.config();
    assert!(config.enabled);
    assert_eq!(config.mode, HealMode::Armed);
    assert_eq!(config.rate_limit_seconds, 300);
    assert_eq!(h.publisher.policies().len(), 1);

    h.session
        .handle_raw_control(r#"{"type":"set_self_heal","rate_limit_seconds":1e400}"#);
    assert_eq!(h.controller.config().rate_limit_seconds, 300);
    assert_eq!(h.publisher.statuses().len(), 1);
}

#[tokio::test]
async fn test_registry_tracks_source() {
    let registry = Arc::new(SessionRegistry::new());
    let h = harness(armed_controller(), vec![Ok(quiet())], vec![]);
    let mut session = h.session.with_id("s-1").with_registry(registry.clone());
    registry.register(SessionInfo::new("s-1", None));

    session.switch_source(monitor_source());
    assert_eq!(registry.get("s-1").map(|s| s.source).as_deref(), Some("monitor"));
}

#[tokio::test]
async fn test_session_loop_stops_when_control_closes() {
    let h = harness(armed_controller(), vec![Ok(quiet())], vec![]);
    let config = SessionConfig {
        tick_interval: Duration::from_millis(10),
        ..SessionConfig::default()
    };
    let session_loop = SessionLoop::new(h.session, &config, StructuredLogger::new("test-node"));

    let (control_tx, control_rx) = mpsc::channel(4);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(session_loop.run(control_rx, shutdown_rx));

    tokio::time::sleep(Duration::from_millis(60)).await;
    control_tx
        .send(r#"{"type":"set_self_heal","enabled":false}"#.to_string())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(control_tx);

    let session = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("loop exits")
        .unwrap();
    assert!(session.ticks() >= 1);
    assert!(!h.controller.config().enabled);

    // Announcement comes first
    let messages = h.publisher.messages();
    assert!(matches!(messages[0], SessionMessage::Status { .. }));
    assert!(matches!(messages[1], SessionMessage::Policy(_)));
}

#[tokio::test]
async fn test_session_loop_stops_on_shutdown() {
    let h = harness(armed_controller(), vec![Ok(quiet())], vec![]);
    let session_loop = SessionLoop::new(
        h.session,
        &SessionConfig::default(),
        StructuredLogger::new("test-node"),
    );

    let (_control_tx, control_rx) = mpsc::channel::<String>(4);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(session_loop.run(control_rx, shutdown_rx));

    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown_tx.send(()).unwrap();

    let session = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("loop exits")
        .unwrap();
    // The first tick fires immediately
    assert_eq!(session.ticks(), 1);
    assert_eq!(h.local.calls(), 1);
}

#[tokio::test]
async fn test_configured_window_drives_rate_limit() {
    let controller = Arc::new(SelfHealingController::new(SelfHealPolicy {
        enabled: true,
        mode: HealMode::Armed,
        rate_limit_seconds: 300,
    }));
    let mut h = harness(controller, vec![Ok(sample(96.0, 40.0, 50.0, 10.0))], vec![]);

    let before = chrono::Utc::now();
    assert_eq!(h.session.tick().await, TickReport::Collected { events: 1 });

    let until = h.controller.rate_limit_until().expect("window opened");
    let window = until.signed_duration_since(before).num_seconds();
    assert!((299..=301).contains(&window), "window was {}s", window);
}

/// Collector that takes longer than the tick interval and tracks overlap
struct SlowCollector {
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[async_trait]
impl Collector for SlowCollector {
    async fn sample(&self) -> Result<MetricsSample, CollectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(quiet())
    }

    fn name(&self) -> &str {
        "slow"
    }
}

struct SlowProvider {
    collector: Arc<SlowCollector>,
}

impl CollectorProvider for SlowProvider {
    fn local(&self) -> Arc<dyn Collector> {
        self.collector.clone()
    }

    fn monitor(&self, _url: &Url) -> Arc<dyn Collector> {
        self.collector.clone()
    }
}

#[tokio::test]
async fn test_slow_collection_never_overlaps_ticks() {
    let collector = Arc::new(SlowCollector {
        delay: Duration::from_millis(40),
        calls: AtomicUsize::new(0),
        in_flight: AtomicUsize::new(0),
        max_in_flight: AtomicUsize::new(0),
    });
    let session = Session::new(
        armed_controller(),
        Arc::new(SlowProvider {
            collector: collector.clone(),
        }),
        Arc::new(RecordingPublisher::default()),
        StructuredLogger::new("test-node"),
    );
    let config = SessionConfig {
        tick_interval: Duration::from_millis(5),
        ..SessionConfig::default()
    };
    let session_loop = SessionLoop::new(session, &config, StructuredLogger::new("test-node"));

    let (control_tx, control_rx) = mpsc::channel::<String>(4);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(session_loop.run(control_rx, shutdown_rx));

    tokio::time::sleep(Duration::from_millis(300)).await;
    drop(control_tx);
    let session = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("loop exits")
        .unwrap();

    let calls = collector.calls.load(Ordering::SeqCst);
    assert!(calls >= 2, "only {} collections", calls);
    // 300ms of 40ms collections leaves room for at most 8
    assert!(calls <= 8, "{} collections overlapped", calls);
    assert_eq!(collector.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(session.ticks() as usize, calls);
}
