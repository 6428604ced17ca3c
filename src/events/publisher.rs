use serde_json::Value;
use tokio::sync::broadcast;

/// Fan-out of task and step transitions to in-process listeners
///
/// Slow receivers lag and lose the oldest events; the task store, not this
/// channel, is the record of what happened.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: String,
    pub task_id: String,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Never fails; with no receiver attached the event is dropped
    pub fn publish(&self, event_name: impl Into<String>, task_id: impl Into<String>, context: Value) {
        let event = PublishedEvent {
            name: event_name.into(),
            task_id: task_id.into(),
            context,
            published_at: chrono::Utc::now(),
        };

        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            tracing::trace!(event = %event.name, task_id = %event.task_id, "Event dropped, no listeners");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
