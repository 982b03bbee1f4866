//! Wire messages exchanged with a session subscriber

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ConfigError, ParseError};
use crate::models::{AiEvent, MetricsSample, PolicySnapshot, PolicyUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Warn,
    Error,
}

/// Server to subscriber
///
/// Adjacently tagged because [`AiEvent`] already owns a `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SessionMessage {
    Status { level: StatusLevel, message: String },
    Metrics(MetricsSample),
    Event(AiEvent),
    Policy(PolicySnapshot),
}

impl SessionMessage {
    pub fn to_json(&self) -> String {
        // Every variant is plain data with string keys
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"type":"status","data":{{"level":"error","message":"encode failed: {}"}}}}"#,
                e
            )
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Local,
    Monitor,
}

/// Subscriber to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    SetSource {
        source: SourceKind,
        #[serde(default)]
        url: Option<String>,
    },
    SetSelfHeal(PolicyUpdate),
}

impl ControlMessage {
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ParseError::EmptyMessage);
        }
        Ok(serde_json::from_str(raw)?)
    }
}

/// Collector selection for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveSource {
    Local,
    Monitor(Url),
}

impl ActiveSource {
    /// Validate an operator-supplied agent URL
    pub fn monitor(raw: Option<&str>) -> Result<Self, ConfigError> {
        let raw = raw.map(str::trim).filter(|s| !s.is_empty());
        let raw = raw.ok_or(ConfigError::MissingUrl)?;

        let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "http" | "https" => Ok(ActiveSource::Monitor(url)),
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn from_request(source: SourceKind, url: Option<&str>) -> Result<Self, ConfigError> {
        match source {
            SourceKind::Local => Ok(ActiveSource::Local),
            SourceKind::Monitor => Self::monitor(url),
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            ActiveSource::Local => SourceKind::Local,
            ActiveSource::Monitor(_) => SourceKind::Monitor,
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            ActiveSource::Local => "local",
            ActiveSource::Monitor(_) => "monitor",
        }
    }

    pub fn url(&self) -> Option<&Url> {
        match self {
            ActiveSource::Local => None,
            ActiveSource::Monitor(url) => Some(url),
        }
    }
}

impl std::fmt::Display for ActiveSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActiveSource::Local => write!(f, "local"),
            ActiveSource::Monitor(url) => write!(f, "monitor({})", url),
        }
    }
}
