//! In-memory log tail served at `/logs`
//!
//! A tracing layer renders every event that passes the global filter as one
//! text line and appends it to a bounded ring. SSE clients get the most
//! recent lines first, then follow new ones.

use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Lines retained for late subscribers
pub const LOG_CAPACITY: usize = 800;

/// Lines replayed to a new `/logs` client
pub const REPLAY_LINES: usize = 60;

/// Lines a slow follower may fall behind before it skips ahead
const FOLLOW_BUFFER: usize = 256;

/// Bounded ring of rendered log lines with live followers
#[derive(Clone)]
pub struct LogRing {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
    tx: broadcast::Sender<String>,
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(LOG_CAPACITY)
    }
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(FOLLOW_BUFFER);
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
            tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.lines.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Append a line, evicting the oldest past capacity
    pub fn push(&self, line: String) {
        let mut lines = self.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.clone());
        // Sent under the lock so `follow` sees each line exactly once
        let _ = self.tx.send(line);
    }

    /// Up to `n` most recent lines, oldest first
    pub fn recent(&self, n: usize) -> Vec<String> {
        let lines = self.lock();
        lines.iter().skip(lines.len().saturating_sub(n)).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Backlog of up to `n` lines plus a receiver for everything after it
    pub fn follow(&self, n: usize) -> (Vec<String>, broadcast::Receiver<String>) {
        let lines = self.lock();
        let rx = self.tx.subscribe();
        let backlog = lines.iter().skip(lines.len().saturating_sub(n)).cloned().collect();
        (backlog, rx)
    }

    /// Layer feeding this ring from the tracing subscriber
    pub fn layer(&self) -> LogRingLayer {
        LogRingLayer { ring: self.clone() }
    }
}

pub struct LogRingLayer {
    ring: LogRing,
}

impl<S: Subscriber> Layer<S> for LogRingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let meta = event.metadata();
        let mut line = format!(
            "{} {:>5} {}: {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            meta.level(),
            meta.target(),
            visitor.message
        );
        line.push_str(&visitor.fields);
        self.ring.push(line);
    }
}

/// Collects the message and the remaining fields as ` key=value`
#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
