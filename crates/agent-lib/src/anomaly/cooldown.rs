//! Per-kind event cooldowns
//!
//! Suppresses repeat events of the same kind inside a window, keyed on the
//! time the kind last fired. Entries exist only for kinds that fired.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::models::EventKind;

#[derive(Debug, Default, Clone)]
pub struct CooldownTable {
    last_fired: HashMap<EventKind, DateTime<Utc>>,
}

impl CooldownTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while `kind` fired less than `window` before `now`
    ///
    /// A clock that moved backwards counts as still cooling.
    pub fn is_cooling(&self, kind: EventKind, now: DateTime<Utc>, window: Duration) -> bool {
        self.last_fired
            .get(&kind)
            .map(|last| now.signed_duration_since(*last) < window)
            .unwrap_or(false)
    }

    /// Record that `kind` fired at `now`
    pub fn mark(&mut self, kind: EventKind, now: DateTime<Utc>) {
        self.last_fired.insert(kind, now);
    }

    pub fn last_fired(&self, kind: EventKind) -> Option<DateTime<Utc>> {
        self.last_fired.get(&kind).copied()
    }

    pub fn len(&self) -> usize {
        self.last_fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_fired.is_empty()
    }
}
