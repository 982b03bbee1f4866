//! Per-session anomaly detector
//!
//! Keeps a bounded history of samples and evaluates the newest one against
//! three rule layers: absolute thresholds, statistical spikes and the RAM
//! leak trend. Absolute and statistical spikes share one cooldown table, so a
//! kind fires at most once per tick.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

use super::cooldown::CooldownTable;
use super::leak_detector::LeakDetector;
use super::spike_detector::{BaselineStats, SpikeDetector, ABSOLUTE_CRITICAL, BASELINE_WINDOW};
use crate::models::{AiAction, AiEvent, EventKind, MetricsSample, Severity};

/// Maximum samples retained per session
pub const HISTORY_CAPACITY: usize = 120;

/// Minimum history before the statistical layer runs
const MIN_SAMPLES_FOR_STATS: usize = 8;

const DISK_WARN: f64 = 90.0;
const DISK_CRITICAL: f64 = 97.0;
const DISK_COOLDOWN_SECS: i64 = 30;

const LEAK_CRITICAL: f64 = 92.0;
const LEAK_SPACING_SECS: i64 = 20;

const DEFAULT_RESTART_TARGET: &str = "app";

/// Spike rule for one metric
struct SpikeRule {
    kind: EventKind,
    label: &'static str,
    read: fn(&MetricsSample) -> f64,
    cooldown_secs: i64,
    z_threshold: f64,
}

const SPIKE_RULES: [SpikeRule; 3] = [
    SpikeRule {
        kind: EventKind::CpuSpike,
        label: "CPU",
        read: |s| s.cpu,
        cooldown_secs: 15,
        z_threshold: 2.8,
    },
    SpikeRule {
        kind: EventKind::RamSpike,
        label: "RAM",
        read: |s| s.ram,
        cooldown_secs: 15,
        z_threshold: 2.8,
    },
    SpikeRule {
        kind: EventKind::IoSpike,
        label: "I/O",
        read: |s| s.io,
        cooldown_secs: 12,
        z_threshold: 2.6,
    },
];

/// Recommended mitigations for an event, strongest last
///
/// Rate-limit windows are proposed against the default 30s policy window.
/// The controller rescales them to the configured window when applying, so
/// a spike asks for one policy window and a critical leak for four.
pub fn proposed_actions(kind: EventKind, severity: Severity, restart_target: &str) -> Vec<AiAction> {
    let critical = severity == Severity::Critical;
    match kind {
        EventKind::CpuSpike | EventKind::RamSpike | EventKind::IoSpike => vec![
            AiAction::EnableRateLimit {
                seconds: if critical { 60 } else { 30 },
            },
            AiAction::LoadBalanceHint,
        ],
        EventKind::DiskFull if critical => vec![
            AiAction::EnableRateLimit { seconds: 60 },
            AiAction::IsolateNode,
        ],
        EventKind::DiskFull => vec![AiAction::LoadBalanceHint],
        EventKind::RamLeak if critical => vec![
            AiAction::EnableRateLimit { seconds: 120 },
            AiAction::RestartContainer {
                name: restart_target.to_string(),
            },
            AiAction::IsolateNode,
        ],
        EventKind::RamLeak => vec![
            AiAction::EnableRateLimit { seconds: 90 },
            AiAction::RestartService {
                name: restart_target.to_string(),
            },
        ],
        EventKind::AgentUnreachable => Vec::new(),
    }
}

/// Detector state owned by exactly one session
#[derive(Debug)]
pub struct AnomalyDetector {
    history: VecDeque<MetricsSample>,
    cooldowns: CooldownTable,
    last_leak: Option<DateTime<Utc>>,
    leak_detector: LeakDetector,
    restart_target: String,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl AnomalyDetector {
    pub fn new() -> Self {
        Self {
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            cooldowns: CooldownTable::new(),
            last_leak: None,
            leak_detector: LeakDetector::default(),
            restart_target: DEFAULT_RESTART_TARGET.to_string(),
        }
    }

    /// Name used in restart recommendations
    pub fn with_restart_target(mut self, target: impl Into<String>) -> Self {
        self.restart_target = target.into();
        self
    }

    /// Append a sample, evicting the oldest past capacity
    pub fn push(&mut self, sample: MetricsSample) {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn latest(&self) -> Option<&MetricsSample> {
        self.history.back()
    }

    /// Oldest first
    pub fn history(&self) -> impl Iterator<Item = &MetricsSample> {
        self.history.iter()
    }

    pub fn cooldowns(&self) -> &CooldownTable {
        &self.cooldowns
    }

    /// Evaluate the newest sample and return every rule that fired
    pub fn detect(&mut self, source: &str) -> Vec<AiEvent> {
        let Some(latest) = self.history.back().cloned() else {
            return Vec::new();
        };
        let now = latest.timestamp;
        let mut events = Vec::new();

        self.detect_absolute(&latest, now, source, &mut events);
        self.detect_statistical(&latest, now, source, &mut events);
        self.detect_leak(&latest, now, source, &mut events);

        events
    }

    fn detect_absolute(
        &mut self,
        latest: &MetricsSample,
        now: DateTime<Utc>,
        source: &str,
        events: &mut Vec<AiEvent>,
    ) {
        for rule in &SPIKE_RULES {
            let value = (rule.read)(latest);
            if value >= ABSOLUTE_CRITICAL
                && !self
                    .cooldowns
                    .is_cooling(rule.kind, now, Duration::seconds(rule.cooldown_secs))
            {
                self.cooldowns.mark(rule.kind, now);
                events.push(self.event(
                    rule.kind,
                    Severity::Critical,
                    format!(
                        "{} at {:.1}% crossed the critical threshold of {:.0}%",
                        rule.label, value, ABSOLUTE_CRITICAL
                    ),
                    source,
                    latest,
                ));
            }
        }

        let disk = latest.disk;
        if disk >= DISK_WARN
            && !self.cooldowns.is_cooling(
                EventKind::DiskFull,
                now,
                Duration::seconds(DISK_COOLDOWN_SECS),
            )
        {
            let severity = if disk >= DISK_CRITICAL {
                Severity::Critical
            } else {
                Severity::Warn
            };
            self.cooldowns.mark(EventKind::DiskFull, now);
            events.push(self.event(
                EventKind::DiskFull,
                severity,
                format!("Disk usage at {:.1}%", disk),
                source,
                latest,
            ));
        }
    }

    fn detect_statistical(
        &mut self,
        latest: &MetricsSample,
        now: DateTime<Utc>,
        source: &str,
        events: &mut Vec<AiEvent>,
    ) {
        let len = self.history.len();
        if len < MIN_SAMPLES_FOR_STATS {
            return;
        }

        let end = len - 1;
        let start = end.saturating_sub(BASELINE_WINDOW);

        for rule in &SPIKE_RULES {
            let window = Duration::seconds(rule.cooldown_secs);
            if self.cooldowns.is_cooling(rule.kind, now, window) {
                continue;
            }

            let baseline =
                BaselineStats::from_values(self.history.range(start..end).map(rule.read));
            let detector = SpikeDetector::new(rule.z_threshold);
            let Some(spike) = detector.detect((rule.read)(latest), &baseline) else {
                continue;
            };

            let severity = if spike.current >= ABSOLUTE_CRITICAL {
                Severity::Critical
            } else {
                Severity::Warn
            };
            self.cooldowns.mark(rule.kind, now);
            events.push(self.event(
                rule.kind,
                severity,
                format!(
                    "{} at {:.1}% is {:.1} pts above its baseline of {:.1}% (z={:.1})",
                    rule.label,
                    spike.current,
                    spike.points_above_expected(),
                    spike.expected,
                    spike.z_score
                ),
                source,
                latest,
            ));
        }
    }

    fn detect_leak(
        &mut self,
        latest: &MetricsSample,
        now: DateTime<Utc>,
        source: &str,
        events: &mut Vec<AiEvent>,
    ) {
        if self.history.len() < self.leak_detector.window {
            return;
        }
        if let Some(last) = self.last_leak {
            if now.signed_duration_since(last) < Duration::seconds(LEAK_SPACING_SECS) {
                return;
            }
        }

        let ram: Vec<f64> = self
            .history
            .iter()
            .skip(self.history.len() - self.leak_detector.window)
            .map(|s| s.ram)
            .collect();
        let Some(leak) = self.leak_detector.detect(&ram) else {
            return;
        };

        let severity = if leak.current >= LEAK_CRITICAL {
            Severity::Critical
        } else {
            Severity::Warn
        };
        self.last_leak = Some(now);
        events.push(self.event(
            EventKind::RamLeak,
            severity,
            format!(
                "RAM rose {:.1} pts over {} samples ({:.2} pts/sample), now {:.1}%",
                leak.rise, leak.samples_analyzed, leak.slope_per_sample, leak.current
            ),
            source,
            latest,
        ));
    }

    fn event(
        &self,
        kind: EventKind,
        severity: Severity,
        message: String,
        source: &str,
        latest: &MetricsSample,
    ) -> AiEvent {
        AiEvent::new(
            kind,
            severity,
            message,
            source,
            Some(latest.clone()),
            proposed_actions(kind, severity, &self.restart_target),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SampleSource;

    fn sample_at(t0: DateTime<Utc>, offset_ms: i64, cpu: f64, ram: f64) -> MetricsSample {
        MetricsSample {
            cpu,
            ram,
            disk: 50.0,
            io: 10.0,
            errors: 0.0,
            timestamp: t0 + Duration::milliseconds(offset_ms),
            source: SampleSource::Local,
        }
    }

    fn kinds(events: &[AiEvent]) -> Vec<EventKind> {
        events.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn test_history_bounded_and_evicts_oldest() {
        let t0 = Utc::now();
        let mut detector = AnomalyDetector::new();
        for i in 0..HISTORY_CAPACITY as i64 {
            detector.push(sample_at(t0, i * 1000, i as f64 / 10.0, 40.0));
        }
        assert_eq!(detector.len(), HISTORY_CAPACITY);

        detector.push(sample_at(t0, 999_000, 55.5, 40.0));
        assert_eq!(detector.len(), HISTORY_CAPACITY);
        assert_eq!(detector.history().next().map(|s| s.cpu), Some(0.1));
        assert_eq!(detector.latest().map(|s| s.cpu), Some(55.5));
    }

    #[test]
    fn test_detect_on_empty_history() {
        let mut detector = AnomalyDetector::new();
        assert!(detector.detect("local").is_empty());
    }

    #[test]
    fn test_absolute_cpu_spike_and_cooldown() {
        let t0 = Utc::now();
        let mut detector = AnomalyDetector::new();

        detector.push(sample_at(t0, 0, 96.0, 40.0));
        let events = detector.detect("local");
        assert_eq!(kinds(&events), vec![EventKind::CpuSpike]);
        assert_eq!(events[0].severity, Severity::Critical);
        assert_eq!(events[0].source, "local");
        assert!(!events[0].proposed_actions.is_empty());
        assert!(events[0].executed.is_none());

        detector.push(sample_at(t0, 10_000, 96.0, 40.0));
        assert!(detector.detect("local").is_empty());

        detector.push(sample_at(t0, 15_000, 96.0, 40.0));
        assert_eq!(kinds(&detector.detect("local")), vec![EventKind::CpuSpike]);
    }

    #[test]
    fn test_io_cooldown_is_shorter() {
        let t0 = Utc::now();
        let mut detector = AnomalyDetector::new();

        let mut s = sample_at(t0, 0, 30.0, 40.0);
        s.io = 97.0;
        detector.push(s.clone());
        assert_eq!(kinds(&detector.detect("local")), vec![EventKind::IoSpike]);

        s.timestamp = t0 + Duration::seconds(12);
        detector.push(s);
        assert_eq!(kinds(&detector.detect("local")), vec![EventKind::IoSpike]);
    }

    #[test]
    fn test_multiple_kinds_in_one_tick() {
        let t0 = Utc::now();
        let mut detector = AnomalyDetector::new();

        let mut s = sample_at(t0, 0, 99.0, 98.0);
        s.io = 95.0;
        s.disk = 91.0;
        detector.push(s);

        let events = detector.detect("monitor");
        assert_eq!(
            kinds(&events),
            vec![
                EventKind::CpuSpike,
                EventKind::RamSpike,
                EventKind::IoSpike,
                EventKind::DiskFull
            ]
        );
        assert_eq!(events[3].severity, Severity::Warn);
    }

    #[test]
    fn test_disk_full_critical_and_cooldown() {
        let t0 = Utc::now();
        let mut detector = AnomalyDetector::new();

        let mut s = sample_at(t0, 0, 30.0, 40.0);
        s.disk = 97.5;
        detector.push(s.clone());
        let events = detector.detect("local");
        assert_eq!(kinds(&events), vec![EventKind::DiskFull]);
        assert_eq!(events[0].severity, Severity::Critical);
        assert!(events[0].proposed_actions.contains(&AiAction::IsolateNode));

        s.timestamp = t0 + Duration::seconds(29);
        detector.push(s.clone());
        assert!(detector.detect("local").is_empty());

        s.timestamp = t0 + Duration::seconds(30);
        detector.push(s);
        assert_eq!(kinds(&detector.detect("local")), vec![EventKind::DiskFull]);
    }

    #[test]
    fn test_statistical_spike_below_absolute_threshold() {
        let t0 = Utc::now();
        let mut detector = AnomalyDetector::new();
        for (i, cpu) in [35.0, 45.0, 40.0, 38.0, 42.0, 36.0, 44.0].iter().enumerate() {
            detector.push(sample_at(t0, i as i64 * 1200, *cpu, 40.0));
            assert!(detector.detect("local").is_empty());
        }

        detector.push(sample_at(t0, 7 * 1200, 90.0, 40.0));
        let events = detector.detect("local");
        assert_eq!(kinds(&events), vec![EventKind::CpuSpike]);
        assert_eq!(events[0].severity, Severity::Warn);
        assert!(events[0].message.contains("baseline"));
    }

    #[test]
    fn test_statistical_layer_needs_eight_samples() {
        let t0 = Utc::now();
        let mut detector = AnomalyDetector::new();
        for (i, cpu) in [35.0, 45.0, 40.0, 38.0, 42.0, 36.0].iter().enumerate() {
            detector.push(sample_at(t0, i as i64 * 1200, *cpu, 40.0));
        }

        detector.push(sample_at(t0, 6 * 1200, 90.0, 40.0));
        assert!(detector.detect("local").is_empty());
    }

    #[test]
    fn test_statistical_spike_respects_absolute_cooldown() {
        let t0 = Utc::now();
        let mut detector = AnomalyDetector::new();
        for i in 0..8 {
            detector.push(sample_at(t0, i * 1200, 40.0 + (i % 3) as f64, 40.0));
        }
        detector.push(sample_at(t0, 8 * 1200, 97.0, 40.0));
        assert_eq!(kinds(&detector.detect("local")), vec![EventKind::CpuSpike]);

        detector.push(sample_at(t0, 9 * 1200, 90.0, 40.0));
        assert!(detector.detect("local").is_empty());
    }

    #[test]
    fn test_leak_fires_on_twenty_fifth_sample_only() {
        let t0 = Utc::now();
        let mut detector = AnomalyDetector::new();
        let step = 20.0 / 24.0;

        for i in 0..24 {
            detector.push(sample_at(t0, i * 1200, 30.0, 70.0 + step * i as f64));
            let events = detector.detect("local");
            assert!(
                !kinds(&events).contains(&EventKind::RamLeak),
                "no leak expected at sample {}",
                i + 1
            );
        }

        detector.push(sample_at(t0, 24 * 1200, 30.0, 90.0));
        let events = detector.detect("local");
        let leaks: Vec<_> = events
            .iter()
            .filter(|e| e.kind == EventKind::RamLeak)
            .collect();
        assert_eq!(leaks.len(), 1);
        assert_eq!(leaks[0].severity, Severity::Warn);
    }

    #[test]
    fn test_leak_spacing() {
        let t0 = Utc::now();
        let mut detector = AnomalyDetector::new();
        let mut ram = 70.0;
        let mut fired_at = Vec::new();

        for i in 0..60 {
            detector.push(sample_at(t0, i * 1200, 30.0, ram));
            if kinds(&detector.detect("local")).contains(&EventKind::RamLeak) {
                fired_at.push(i);
            }
            ram = (ram + 0.5_f64).min(94.0);
        }

        assert!(fired_at.len() >= 2);
        for pair in fired_at.windows(2) {
            // 20s spacing at 1.2s per sample
            assert!((pair[1] - pair[0]) as f64 * 1.2 >= 20.0);
        }
    }

    #[test]
    fn test_critical_leak_proposes_isolation() {
        let actions = proposed_actions(EventKind::RamLeak, Severity::Critical, "api");
        assert_eq!(actions[0], AiAction::EnableRateLimit { seconds: 120 });
        assert!(actions.contains(&AiAction::RestartContainer {
            name: "api".to_string()
        }));
        assert!(actions.contains(&AiAction::IsolateNode));
    }

    #[test]
    fn test_garbage_values_do_not_panic() {
        let t0 = Utc::now();
        let mut detector = AnomalyDetector::new();
        for i in 0..30 {
            let mut s = sample_at(t0, i * 1200, f64::NAN, -50.0);
            s.io = f64::INFINITY;
            s.disk = 1e300;
            detector.push(s);
            let events = detector.detect("local");
            assert!(events.iter().all(|e| e.kind != EventKind::CpuSpike));
        }
    }
}
