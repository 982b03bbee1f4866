//! Outbound side of a session

use tokio::sync::mpsc;
use tracing::debug;

use super::messages::{SessionMessage, StatusLevel};
use crate::models::{AiEvent, MetricsSample, PolicySnapshot};

/// Sink for everything a session reports
///
/// Delivery is best-effort. Implementations must not block the tick.
pub trait Publisher: Send + Sync {
    fn publish_status(&self, level: StatusLevel, message: &str);

    fn publish_metrics(&self, sample: &MetricsSample);

    fn publish_event(&self, event: &AiEvent);

    fn publish_policy(&self, snapshot: &PolicySnapshot);
}

/// Publisher that queues [`SessionMessage`]s for a transport task
pub struct ChannelPublisher {
    tx: mpsc::Sender<SessionMessage>,
}

impl ChannelPublisher {
    pub fn new(tx: mpsc::Sender<SessionMessage>) -> Self {
        Self { tx }
    }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<SessionMessage>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }

    fn send(&self, message: SessionMessage) {
        if let Err(e) = self.tx.try_send(message) {
            debug!(error = %e, "Dropping session message");
        }
    }

    /// True once the receiving transport has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl Publisher for ChannelPublisher {
    fn publish_status(&self, level: StatusLevel, message: &str) {
        self.send(SessionMessage::Status {
            level,
            message: message.to_string(),
        });
    }

    fn publish_metrics(&self, sample: &MetricsSample) {
        self.send(SessionMessage::Metrics(sample.clone()));
    }

    fn publish_event(&self, event: &AiEvent) {
        self.send(SessionMessage::Event(event.clone()));
    }

    fn publish_policy(&self, snapshot: &PolicySnapshot) {
        self.send(SessionMessage::Policy(snapshot.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SampleSource;

    #[tokio::test]
    async fn test_channel_publisher_forwards() {
        let (publisher, mut rx) = ChannelPublisher::channel(4);
        publisher.publish_status(StatusLevel::Info, "hello");
        publisher.publish_metrics(&MetricsSample::now(SampleSource::Demo, 1.0, 1.0, 1.0, 1.0));

        assert!(matches!(
            rx.recv().await,
            Some(SessionMessage::Status { level: StatusLevel::Info, .. })
        ));
        assert!(matches!(rx.recv().await, Some(SessionMessage::Metrics(_))));
    }

    #[tokio::test]
    async fn test_full_channel_drops_instead_of_blocking() {
        let (publisher, mut rx) = ChannelPublisher::channel(1);
        publisher.publish_status(StatusLevel::Info, "first");
        publisher.publish_status(StatusLevel::Info, "second");

        match rx.recv().await {
            Some(SessionMessage::Status { message, .. }) => assert_eq!(message, "first"),
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_receiver() {
        let (publisher, rx) = ChannelPublisher::channel(1);
        drop(rx);
        assert!(publisher.is_closed());
        publisher.publish_status(StatusLevel::Error, "nobody listening");
    }
}
