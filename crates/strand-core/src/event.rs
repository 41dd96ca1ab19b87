//! Run and step notifications for observers of a flow.
//!
//! A flow publishes `RunStarted` when a run is admitted, then per step
//! `StepStarted`, `StepRetrying` before each backoff, and `StepCompleted` or
//! `StepFailed` (with `recovered` set when the step may fail). The run ends
//! with `RunCompleted` or `RunFailed`.

use tokio::sync::broadcast;

use crate::types::FlowEvent;

/// Fan-out channel for [`FlowEvent`]s.
///
/// Publishing never blocks a run. Subscribers that fall more than `capacity`
/// events behind observe `RecvError::Lagged` and skip ahead.
pub struct EventBus {
    tx: broadcast::Sender<FlowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Send to every current subscriber. Events with no subscriber are dropped.
    pub fn publish(&self, event: FlowEvent) {
        let _ = self.tx.send(event);
    }

    /// Receive events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(FlowEvent::StepStarted {
            flow: "demo".into(),
            step: "s1".into(),
        });

        match rx.recv().await.unwrap() {
            FlowEvent::StepStarted { flow, step } => {
                assert_eq!(flow, "demo");
                assert_eq!(step, "s1");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(FlowEvent::StepStarted {
            flow: "demo".into(),
            step: "s1".into(),
        });
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for step in ["a", "b", "c"] {
            bus.publish(FlowEvent::StepStarted {
                flow: "demo".into(),
                step: step.into(),
            });
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
    }
}
