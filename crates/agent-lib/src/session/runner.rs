//! Timer-driven loop around one session

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::state::{Session, SessionConfig, TickReport};
use crate::observability::{MonitorMetrics, StructuredLogger};

/// Drives a [`Session`] until its control channel closes or shutdown fires
///
/// Ticks are awaited inside the select loop, so a slow collection delays the
/// next tick instead of overlapping it. Missed ticks are skipped.
pub struct SessionLoop {
    session: Session,
    tick_interval: Duration,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

impl SessionLoop {
    pub fn new(session: Session, config: &SessionConfig, logger: StructuredLogger) -> Self {
        Self {
            session,
            tick_interval: config.tick_interval,
            metrics: MonitorMetrics::new(),
            logger,
        }
    }

    pub async fn run(
        mut self,
        mut control_rx: mpsc::Receiver<String>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Session {
        let session_id = self.session.id().to_string();
        self.logger.log_session_opened(&session_id);
        self.metrics.session_opened();
        self.session.announce();

        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.session.tick().await {
                        TickReport::Collected { events } if events > 0 => {
                            debug!(session_id = %session_id, events = events, "Tick produced events");
                        }
                        TickReport::Failed { streak, fell_back } => {
                            debug!(
                                session_id = %session_id,
                                streak = streak,
                                fell_back = fell_back,
                                "Tick failed"
                            );
                        }
                        _ => {}
                    }
                }
                message = control_rx.recv() => {
                    match message {
                        Some(raw) => self.session.handle_raw_control(&raw),
                        None => {
                            debug!(session_id = %session_id, "Control channel closed");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!(session_id = %session_id, "Shutting down session loop");
                    break;
                }
            }
        }

        self.metrics.session_closed();
        self.logger
            .log_session_closed(&session_id, self.session.ticks());
        self.session
    }
}
