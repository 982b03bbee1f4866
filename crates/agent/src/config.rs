//! Agent configuration

use anyhow::{Context, Result};
use healwatch_lib::collector::{LocalBackend, Scenario};
use healwatch_lib::session::SessionConfig;
use healwatch_lib::{HealMode, SelfHealPolicy};
use serde::Deserialize;
use std::time::Duration;

/// Agent configuration, read from `HEALWATCH_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Port for the HTTP and WebSocket surface
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Consecutive remote failures before a session falls back to local
    #[serde(default = "default_fallback_threshold")]
    pub fallback_threshold: u32,

    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,

    /// `os` or `demo`
    #[serde(default = "default_local_backend")]
    pub local_backend: String,

    #[serde(default)]
    pub demo_scenario: Option<String>,

    #[serde(default = "default_proc_path")]
    pub proc_path: String,

    #[serde(default)]
    pub self_heal_enabled: bool,

    #[serde(default = "default_self_heal_mode")]
    pub self_heal_mode: String,

    #[serde(default = "default_rate_limit_seconds")]
    pub rate_limit_seconds: u64,

    /// Name used in restart recommendations
    #[serde(default = "default_restart_target")]
    pub restart_target: String,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    5000
}

fn default_tick_interval_ms() -> u64 {
    1200
}

fn default_fallback_threshold() -> u32 {
    3
}

fn default_remote_timeout_secs() -> u64 {
    5
}

fn default_local_backend() -> String {
    "os".to_string()
}

fn default_proc_path() -> String {
    "/proc".to_string()
}

fn default_self_heal_mode() -> String {
    "dry-run".to_string()
}

fn default_rate_limit_seconds() -> u64 {
    30
}

fn default_restart_target() -> String {
    "app".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            api_port: default_api_port(),
            tick_interval_ms: default_tick_interval_ms(),
            fallback_threshold: default_fallback_threshold(),
            remote_timeout_secs: default_remote_timeout_secs(),
            local_backend: default_local_backend(),
            demo_scenario: None,
            proc_path: default_proc_path(),
            self_heal_enabled: false,
            self_heal_mode: default_self_heal_mode(),
            rate_limit_seconds: default_rate_limit_seconds(),
            restart_target: default_restart_target(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("HEALWATCH").try_parsing(true))
            .build()
            .context("failed to read HEALWATCH_* environment")?;

        config
            .try_deserialize()
            .context("invalid HEALWATCH_* configuration")
    }

    pub fn local_backend(&self) -> Result<LocalBackend> {
        match self.local_backend.trim().to_ascii_lowercase().as_str() {
            "os" | "local" => Ok(LocalBackend::Os),
            "demo" => {
                let scenario = match self.demo_scenario.as_deref() {
                    Some(raw) => raw.parse::<Scenario>().map_err(anyhow::Error::msg)?,
                    None => Scenario::Normal,
                };
                Ok(LocalBackend::Demo(scenario))
            }
            other => anyhow::bail!("unknown local backend {:?}, expected os or demo", other),
        }
    }

    pub fn initial_policy(&self) -> SelfHealPolicy {
        SelfHealPolicy {
            enabled: self.self_heal_enabled,
            mode: HealMode::normalize(&self.self_heal_mode),
            rate_limit_seconds: self.rate_limit_seconds,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms.max(100)),
            fallback_threshold: self.fallback_threshold.max(1),
            ..SessionConfig::default()
        }
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.api_port, 5000);
        assert_eq!(config.tick_interval_ms, 1200);
        assert_eq!(config.fallback_threshold, 3);
        assert_eq!(config.local_backend().unwrap(), LocalBackend::Os);

        let policy = config.initial_policy();
        assert!(!policy.enabled);
        assert_eq!(policy.mode, HealMode::DryRun);
        assert_eq!(policy.rate_limit_seconds, 30);

        let session = config.session_config();
        assert_eq!(session.tick_interval, Duration::from_millis(1200));
        assert_eq!(session.fallback_threshold, 3);
    }

    #[test]
    fn test_demo_backend() {
        let config = AgentConfig {
            local_backend: "Demo".to_string(),
            demo_scenario: Some("memory-leak".to_string()),
            ..AgentConfig::default()
        };
        assert_eq!(
            config.local_backend().unwrap(),
            LocalBackend::Demo(Scenario::MemoryLeak)
        );

        let bad = AgentConfig {
            local_backend: "demo".to_string(),
            demo_scenario: Some("meteor".to_string()),
            ..AgentConfig::default()
        };
        assert!(bad.local_backend().is_err());

        let unknown = AgentConfig {
            local_backend: "ssh".to_string(),
            ..AgentConfig::default()
        };
        assert!(unknown.local_backend().is_err());
    }

    #[test]
    fn test_session_config_floors() {
        let config = AgentConfig {
            tick_interval_ms: 0,
            fallback_threshold: 0,
            ..AgentConfig::default()
        };
        let session = config.session_config();
        assert_eq!(session.tick_interval, Duration::from_millis(100));
        assert_eq!(session.fallback_threshold, 1);
    }

    #[test]
    fn test_armed_mode_from_env_string() {
        let config = AgentConfig {
            self_heal_enabled: true,
            self_heal_mode: " ARMED ".to_string(),
            ..AgentConfig::default()
        };
        assert_eq!(config.initial_policy().mode, HealMode::Armed);
    }
}
