//! Shared self-healing controller
//!
//! Every operation takes the same mutex, so `apply`, `set_config` and the
//! state reads are atomic with respect to each other and the rate-limit
//! deadline never moves backwards.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::models::{
    ActionOutcome, AiAction, AiEvent, ExecutedAction, ExecutedRecord, HealMode, PolicySnapshot,
    PolicyUpdate, SelfHealPolicy,
};

pub const MIN_RATE_LIMIT_SECS: u64 = 5;
pub const MAX_RATE_LIMIT_SECS: u64 = 300;

/// Policy window that leaves proposed rate limits unscaled
pub const BASELINE_RATE_LIMIT_SECS: u64 = 30;

#[derive(Debug)]
struct ControllerState {
    policy: SelfHealPolicy,
    rate_limit_until: Option<DateTime<Utc>>,
    /// One-way latch, cleared only by a process restart
    isolated: bool,
}

impl ControllerState {
    fn is_rate_limited(&self, now: DateTime<Utc>) -> bool {
        self.rate_limit_until.map(|until| now < until).unwrap_or(false)
    }

    fn snapshot(&self, now: DateTime<Utc>) -> PolicySnapshot {
        PolicySnapshot {
            enabled: self.policy.enabled,
            mode: self.policy.mode,
            rate_limit_seconds: self.policy.rate_limit_seconds,
            rate_limited: self.is_rate_limited(now),
            rate_limit_until: self.rate_limit_until,
            isolated: self.isolated,
        }
    }

    /// Proposed window stretched by the configured rate limit
    ///
    /// Proposals are expressed against [`BASELINE_RATE_LIMIT_SECS`], so the
    /// default policy applies them unchanged.
    fn scaled_window(&self, proposed: u64) -> u64 {
        clamp_rate_limit(
            proposed.saturating_mul(self.policy.rate_limit_seconds) / BASELINE_RATE_LIMIT_SECS,
        )
    }

    fn execute(&mut self, action: &AiAction, now: DateTime<Utc>) -> ExecutedAction {
        let action = match action {
            AiAction::EnableRateLimit { seconds } => AiAction::EnableRateLimit {
                seconds: self.scaled_window(*seconds),
            },
            other => other.clone(),
        };

        if self.policy.mode == HealMode::DryRun {
            let detail = match &action {
                AiAction::EnableRateLimit { seconds } => {
                    format!("dry-run: would rate limit for {}s", seconds)
                }
                other => format!("dry-run: would {}", other.label()),
            };
            return ExecutedAction {
                action,
                outcome: ActionOutcome::Simulated,
                detail,
            };
        }

        match action {
            AiAction::EnableRateLimit { seconds } => {
                let candidate = now + Duration::seconds(seconds as i64);
                let until = match self.rate_limit_until {
                    Some(current) if current > candidate => current,
                    _ => candidate,
                };
                self.rate_limit_until = Some(until);
                ExecutedAction {
                    action,
                    outcome: ActionOutcome::Applied,
                    detail: format!("rate limited until {}", until.to_rfc3339()),
                }
            }
            AiAction::IsolateNode => {
                self.isolated = true;
                ExecutedAction {
                    action,
                    outcome: ActionOutcome::Applied,
                    detail: "node isolated".to_string(),
                }
            }
            AiAction::RestartService { ref name } | AiAction::RestartContainer { ref name } => {
                let detail = format!("advisory: restart of {} left to the operator", name);
                ExecutedAction {
                    action,
                    outcome: ActionOutcome::Advisory,
                    detail,
                }
            }
            AiAction::LoadBalanceHint => ExecutedAction {
                action,
                outcome: ActionOutcome::Advisory,
                detail: "advisory: shift traffic away from this node".to_string(),
            },
        }
    }
}

fn clamp_rate_limit(seconds: u64) -> u64 {
    seconds.clamp(MIN_RATE_LIMIT_SECS, MAX_RATE_LIMIT_SECS)
}

/// Process-wide safety switch injected into every session
#[derive(Debug)]
pub struct SelfHealingController {
    state: Mutex<ControllerState>,
}

impl Default for SelfHealingController {
    fn default() -> Self {
        Self::new(SelfHealPolicy::default())
    }
}

impl SelfHealingController {
    /// Create the controller from the initial policy
    pub fn new(mut policy: SelfHealPolicy) -> Self {
        policy.rate_limit_seconds = clamp_rate_limit(policy.rate_limit_seconds);
        Self {
            state: Mutex::new(ControllerState {
                policy,
                rate_limit_until: None,
                isolated: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        // every mutation is a single assignment, so poisoned state is still consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the current policy
    pub fn config(&self) -> SelfHealPolicy {
        self.lock().policy.clone()
    }

    /// Merge `update` into the policy
    ///
    /// Finite rate limits are rounded and clamped to [5,300]; non-finite
    /// ones reject the whole update.
    pub fn set_config(&self, update: PolicyUpdate) -> Result<SelfHealPolicy, ConfigError> {
        let rate_limit_seconds = match update.rate_limit_seconds {
            Some(raw) if !raw.is_finite() => return Err(ConfigError::InvalidRateLimit(raw)),
            Some(raw) => Some(
                raw.round()
                    .clamp(MIN_RATE_LIMIT_SECS as f64, MAX_RATE_LIMIT_SECS as f64)
                    as u64,
            ),
            None => None,
        };

        let mut state = self.lock();
        if let Some(enabled) = update.enabled {
            state.policy.enabled = enabled;
        }
        if let Some(mode) = update.mode.as_deref() {
            state.policy.mode = HealMode::normalize(mode);
        }
        if let Some(seconds) = rate_limit_seconds {
            state.policy.rate_limit_seconds = seconds;
        }

        info!(
            event = "self_heal_config_updated",
            enabled = state.policy.enabled,
            mode = %state.policy.mode,
            rate_limit_seconds = state.policy.rate_limit_seconds,
            "Self-heal policy updated"
        );
        Ok(state.policy.clone())
    }

    pub fn is_rate_limited(&self) -> bool {
        self.is_rate_limited_at(Utc::now())
    }

    pub fn is_rate_limited_at(&self, now: DateTime<Utc>) -> bool {
        self.lock().is_rate_limited(now)
    }

    pub fn rate_limit_until(&self) -> Option<DateTime<Utc>> {
        self.lock().rate_limit_until
    }

    pub fn is_isolated(&self) -> bool {
        self.lock().isolated
    }

    pub fn snapshot(&self) -> PolicySnapshot {
        self.snapshot_at(Utc::now())
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> PolicySnapshot {
        self.lock().snapshot(now)
    }

    /// Attach execution records to `events` under the current mode
    pub fn apply(&self, events: Vec<AiEvent>) -> Vec<AiEvent> {
        self.apply_at(events, Utc::now())
    }

    /// `apply` against an explicit clock
    ///
    /// Returns the input untouched when the policy is disabled. Events with
    /// no proposed actions, or that already carry a record, pass through.
    pub fn apply_at(&self, events: Vec<AiEvent>, now: DateTime<Utc>) -> Vec<AiEvent> {
        let mut state = self.lock();
        if !state.policy.enabled {
            return events;
        }

        let mode = state.policy.mode;
        events
            .into_iter()
            .map(|mut event| {
                if event.proposed_actions.is_empty() || event.executed.is_some() {
                    return event;
                }

                let actions: Vec<ExecutedAction> = event
                    .proposed_actions
                    .iter()
                    .map(|action| state.execute(action, now))
                    .collect();

                debug!(
                    event_id = %event.id,
                    kind = %event.kind,
                    mode = %mode,
                    actions = actions.len(),
                    "Recorded self-heal execution"
                );
                event.executed = Some(ExecutedRecord { mode, actions });
                event
            })
            .collect()
    }
}
