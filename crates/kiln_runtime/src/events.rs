//! Lifecycle events.
//!
//! Every subscriber gets its own bounded view of a broadcast channel. A slow
//! subscriber loses the oldest events rather than slowing executions down.
//! Dropping the [`EventSubscription`] unsubscribes.

use bytes::Bytes;
use kiln_core::{Execution, ExecutionId, Language};
use tokio::sync::broadcast;
use tracing::debug;

/// Something that happened to an execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    /// Record created and dispatched
    Started {
        /// Execution
        id: ExecutionId,
        /// Language
        language: Language,
    },
    /// Live output captured under the ceiling
    OutputChunk {
        /// Execution
        id: ExecutionId,
        /// Payload
        chunk: Bytes,
    },
    /// Backend finished and the record was finalized
    Completed {
        /// Terminal record
        execution: Box<Execution>,
    },
    /// Caller cancelled the execution
    Cancelled {
        /// Execution
        id: ExecutionId,
    },
}

impl ExecutionEvent {
    /// Execution the event belongs to
    #[must_use]
    pub fn execution_id(&self) -> &ExecutionId {
        match self {
            Self::Started { id, .. } | Self::OutputChunk { id, .. } | Self::Cancelled { id } => id,
            Self::Completed { execution } => &execution.id,
        }
    }

    /// Whether this is the last event of its execution
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Cancelled { .. })
    }
}

/// Publisher side
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    /// Create a bus buffering `capacity` events per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to current subscribers; no subscriber is not an error
    pub fn publish(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events published from now on
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    /// Live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Subscriber side
#[derive(Debug)]
pub struct EventSubscription {
    receiver: broadcast::Receiver<ExecutionEvent>,
}

impl EventSubscription {
    /// Next event; `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<ExecutionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already buffered
    pub fn try_recv(&mut self) -> Option<ExecutionEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(tag: &str) -> ExecutionEvent {
        ExecutionEvent::Started {
            id: ExecutionId::from(tag),
            language: Language::Wat,
        }
    }

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new(8);
        let mut sub = bus.subscribe();
        bus.publish(started("wat_1"));
        bus.publish(ExecutionEvent::Cancelled {
            id: ExecutionId::from("wat_1"),
        });

        let first = sub.recv().await.unwrap();
        assert_eq!(first.execution_id().as_str(), "wat_1");
        assert!(!first.is_terminal());
        assert!(sub.recv().await.unwrap().is_terminal());
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = EventBus::new(8);
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(started("wat_2"));
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_oldest() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();
        for i in 0..5 {
            bus.publish(started(&format!("wat_{i}")));
        }
        assert_eq!(sub.recv().await.unwrap().execution_id().as_str(), "wat_3");
    }

    #[tokio::test]
    async fn test_closed_bus_ends_stream() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();
        drop(bus);
        assert!(sub.recv().await.is_none());
    }
}
