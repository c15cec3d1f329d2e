use async_trait::async_trait;
use broker_domain::Event;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Delivers domain events to whatever is listening.
///
/// Three modes per configuration (`broker-config::EventPublisherMode`):
/// logging-only (the default, just a structured log line), synchronous
/// (subscribers run inline before the publishing call returns), and
/// asynchronous (events are handed off to an unbounded channel and
/// drained by a background task so publishing never blocks the caller).
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: Event);
}

pub struct LoggingSink;

#[async_trait]
impl EventSink for LoggingSink {
    async fn publish(&self, event: Event) {
        info!(
            event_id = %event.event_id,
            aggregate_type = ?event.aggregate_type,
            aggregate_id = %event.aggregate_id,
            event_type = %event.event_type(),
            "domain event published"
        );
    }
}

pub struct SyncSink {
    subscribers: Vec<std::sync::Arc<dyn EventSink>>,
}

impl SyncSink {
    pub fn new(subscribers: Vec<std::sync::Arc<dyn EventSink>>) -> Self {
        Self { subscribers }
    }
}

#[async_trait]
impl EventSink for SyncSink {
    async fn publish(&self, event: Event) {
        for sub in &self.subscribers {
            sub.publish(event.clone()).await;
        }
    }
}

/// Hands events to an unbounded channel; a caller-supplied background task
/// drains it. Publish failures (a full/closed channel) are logged, never
/// propagated — a slow or dead subscriber must not block the write path.
pub struct AsyncSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl AsyncSink {
    /// Returns the sink plus the receiving half; the caller spawns a task
    /// that drains the receiver with whatever downstream sink it likes.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for AsyncSink {
    async fn publish(&self, event: Event) {
        if self.tx.send(event).is_err() {
            error!("async event sink receiver dropped, event lost");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_domain::{AggregateType, EventPayload};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink(Arc<AtomicUsize>);

    #[async_trait]
    impl EventSink for CountingSink {
        async fn publish(&self, _event: Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sample_event() -> Event {
        Event::new(
            AggregateType::Request,
            "req-1".to_string(),
            1,
            EventPayload::RequestStatusChanged {
                old_status: "Pending".to_string(),
                new_status: "Creating".to_string(),
                message: None,
                machine_count: 0,
            },
        )
    }

    #[tokio::test]
    async fn sync_sink_fans_out_to_all_subscribers() {
        let counter = Arc::new(AtomicUsize::new(0));
        let sink = SyncSink::new(vec![
            Arc::new(CountingSink(counter.clone())),
            Arc::new(CountingSink(counter.clone())),
        ]);
        sink.publish(sample_event()).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn async_sink_forwards_into_channel() {
        let (sink, mut rx) = AsyncSink::channel();
        sink.publish(sample_event()).await;
        let received = rx.recv().await;
        assert!(received.is_some());
    }
}
