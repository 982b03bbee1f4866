//! Registry of open monitoring sessions

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::messages::ActiveSource;

/// What the operator API reports about one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_url: Option<String>,
    pub opened_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn new(id: impl Into<String>, peer: Option<String>) -> Self {
        Self {
            id: id.into(),
            peer,
            source: "local".to_string(),
            monitor_url: None,
            opened_at: Utc::now(),
        }
    }
}

/// Thread-safe registry of open sessions
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionInfo>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, info: SessionInfo) {
        self.sessions.insert(info.id.clone(), info);
    }

    pub fn unregister(&self, id: &str) -> Option<SessionInfo> {
        self.sessions.remove(id).map(|(_, v)| v)
    }

    pub fn get(&self, id: &str) -> Option<SessionInfo> {
        self.sessions.get(id).map(|r| r.clone())
    }

    pub fn update_source(&self, id: &str, source: &ActiveSource) {
        if let Some(mut entry) = self.sessions.get_mut(id) {
            entry.source = source.kind_str().to_string();
            entry.monitor_url = source.url().map(|u| u.to_string());
        }
    }

    /// Sessions ordered oldest first
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.sessions.iter().map(|r| r.value().clone()).collect();
        sessions.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
