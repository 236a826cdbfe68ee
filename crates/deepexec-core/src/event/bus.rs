//! Broadcast bus for `ExecutionEvent`.
//!
//! Publishing with no active subscribers is a no-op. Slow subscribers see
//! `RecvError::Lagged` rather than blocking the engine.

use deepexec_types::event::ExecutionEvent;
use tokio::sync::broadcast;

/// Multi-consumer bus for engine lifecycle events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(id: &str) -> ExecutionEvent {
        ExecutionEvent::OperationCompleted {
            operation_id: id.to_string(),
            context_id: "ctx-test".to_string(),
            duration_ms: 1.0,
        }
    }

    #[tokio::test]
    async fn every_subscriber_receives_event() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(completed("op-1"));

        assert_eq!(rx1.recv().await.unwrap(), completed("op-1"));
        assert_eq!(rx2.recv().await.unwrap(), completed("op-1"));
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let bus = EventBus::new(4);
        bus.publish(completed("op-1"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn lagged_receiver_does_not_block_publisher() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..8 {
            bus.publish(completed(&format!("op-{i}")));
        }
        match rx.try_recv() {
            Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn clone_shares_channel() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.clone().publish(completed("op-9"));
        assert!(rx.try_recv().is_ok());
    }
}
