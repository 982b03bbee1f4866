//! Monitoring sessions
//!
//! One session per subscriber connection. Each tick takes a sample from the
//! session's active collector, runs the session's own detector, passes the
//! events through the shared self-heal controller and publishes the result.
//!
//! Repeated failures against a remote agent switch the session back to the
//! local source and surface as an `agent_unreachable` event.

mod messages;
mod publisher;
mod registry;
mod runner;
mod state;

#[cfg(test)]
mod tests;

pub use messages::{ActiveSource, ControlMessage, SessionMessage, SourceKind, StatusLevel};
pub use publisher::{ChannelPublisher, Publisher};
pub use registry::{SessionInfo, SessionRegistry};
pub use runner::SessionLoop;
pub use state::{
    Session, SessionConfig, TickReport, DEFAULT_FALLBACK_THRESHOLD, DEFAULT_TICK_INTERVAL,
};
