//! Per-submission progress events.
//!
//! The [`EventChannel`] fans progress events out to every observer of a
//! submission id. Delivery is best-effort: each subscriber has a bounded
//! queue, and a subscriber whose queue is full is dropped rather than ever
//! blocking the publisher.

use crate::models::{ModuleStatus, RiskLevel};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Default per-subscriber queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Type-specific payload of an [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    AnalysisStarted,
    ModuleComplete {
        module_id: String,
        score: Option<f64>,
        confidence: Option<f64>,
        status: ModuleStatus,
        processing_ms: u64,
    },
    Completed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        integrity_score: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        risk_level: Option<RiskLevel>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Timeout,
}

/// A timestamped progress event for one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub submission_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(submission_id: &str, kind: EventKind) -> Self {
        Self {
            submission_id: submission_id.to_string(),
            timestamp: Utc::now(),
            kind,
        }
    }

    /// True for the events that end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::Completed { .. } | EventKind::Timeout)
    }

    /// Serialize as one JSON line, the relay framing.
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

type Subscriber = (u64, mpsc::Sender<Event>);

/// In-process publish/subscribe keyed by submission id.
#[derive(Debug)]
pub struct EventChannel {
    subscribers: DashMap<String, Vec<Subscriber>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl EventChannel {
    /// Creates a channel whose subscribers each buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    /// Register a new observer for `submission_id`.
    ///
    /// Only events emitted after this call are received. Dropping the
    /// returned handle unsubscribes.
    pub fn subscribe(self: &Arc<Self>, submission_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers
            .entry(submission_id.to_string())
            .or_default()
            .push((id, tx));

        debug!(submission_id, subscriber = id, "Subscribed to events");

        Subscription {
            channel: Arc::clone(self),
            submission_id: submission_id.to_string(),
            id,
            rx,
        }
    }

    /// Timestamp `kind` and fan it out to every current subscriber without
    /// blocking. Subscribers whose queue is full or closed are pruned.
    ///
    /// Returns the number of subscribers the event was delivered to.
    pub fn emit(&self, submission_id: &str, kind: EventKind) -> usize {
        let event = Event::new(submission_id, kind);

        let Some(mut subs) = self.subscribers.get_mut(submission_id) else {
            return 0;
        };

        let mut delivered = 0;
        subs.retain(|(id, tx)| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(submission_id, subscriber = *id, "Subscriber queue full, dropping subscriber");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
        let empty = subs.is_empty();
        drop(subs);

        if empty {
            self.subscribers.remove_if(submission_id, |_, v| v.is_empty());
        }

        delivered
    }

    /// Remove one subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, submission_id: &str, subscriber_id: u64) {
        let empty = match self.subscribers.get_mut(submission_id) {
            Some(mut subs) => {
                subs.retain(|(id, _)| *id != subscriber_id);
                subs.is_empty()
            }
            None => return,
        };

        if empty {
            self.subscribers.remove_if(submission_id, |_, v| v.is_empty());
        }
        debug!(submission_id, subscriber = subscriber_id, "Unsubscribed from events");
    }

    /// Number of live subscribers for `submission_id`.
    pub fn subscriber_count(&self, submission_id: &str) -> usize {
        self.subscribers
            .get(submission_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Number of submission ids with at least one subscriber.
    pub fn active_submissions(&self) -> usize {
        self.subscribers.len()
    }

    /// Finite event stream for one new observer of `submission_id`.
    ///
    /// The subscription is taken immediately, so events emitted after this
    /// call are observed even if the stream is polled later. The stream
    /// ends after yielding `completed`, or after yielding a synthetic
    /// `timeout` when no event arrives within `timeout` (or the subscriber
    /// was pruned). Dropping the stream at any point unsubscribes.
    pub fn stream(
        self: &Arc<Self>,
        submission_id: &str,
        timeout: Duration,
    ) -> impl Stream<Item = Event> + Send + 'static {
        let mut subscription = self.subscribe(submission_id);
        let submission_id = submission_id.to_string();

        async_stream::stream! {
            loop {
                match tokio::time::timeout(timeout, subscription.recv()).await {
                    Ok(Some(event)) => {
                        let done = matches!(event.kind, EventKind::Completed { .. });
                        yield event;
                        if done {
                            break;
                        }
                    }
                    Ok(None) | Err(_) => {
                        debug!(submission_id = %submission_id, "Event stream timed out");
                        yield Event::new(&submission_id, EventKind::Timeout);
                        break;
                    }
                }
            }
            drop(subscription);
        }
    }
}

/// Handle for one observer. Unsubscribes on drop.
#[derive(Debug)]
pub struct Subscription {
    channel: Arc<EventChannel>,
    submission_id: String,
    id: u64,
    rx: mpsc::Receiver<Event>,
}

impl Subscription {
    /// Next event, or `None` once the subscriber has been pruned.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Next already-queued event, without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    pub fn submission_id(&self) -> &str {
        &self.submission_id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.channel.unsubscribe(&self.submission_id, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn completed(score: f64) -> EventKind {
        EventKind::Completed {
            integrity_score: Some(score),
            risk_level: Some(RiskLevel::Low),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_emit_without_subscribers() {
        let channel = Arc::new(EventChannel::default());
        assert_eq!(channel.emit("s1", EventKind::AnalysisStarted), 0);
        assert_eq!(channel.active_submissions(), 0);
    }

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers() {
        let channel = Arc::new(EventChannel::default());
        let mut a = channel.subscribe("s1");
        let mut b = channel.subscribe("s1");
        let mut other = channel.subscribe("s2");

        assert_eq!(channel.emit("s1", EventKind::AnalysisStarted), 2);

        assert_eq!(a.recv().await.unwrap().kind, EventKind::AnalysisStarted);
        let got = b.recv().await.unwrap();
        assert_eq!(got.submission_id, "s1");
        assert!(other.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let channel = Arc::new(EventChannel::default());
        let sub = channel.subscribe("s1");
        assert_eq!(channel.subscriber_count("s1"), 1);
        drop(sub);
        assert_eq!(channel.subscriber_count("s1"), 0);
        assert_eq!(channel.active_submissions(), 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_pruned_without_blocking() {
        let channel = Arc::new(EventChannel::new(2));
        let mut slow = channel.subscribe("s1");
        let mut fast = channel.subscribe("s1");

        assert_eq!(channel.emit("s1", EventKind::AnalysisStarted), 2);
        assert!(fast.recv().await.is_some());
        assert_eq!(channel.emit("s1", EventKind::Timeout), 2);
        assert!(fast.recv().await.is_some());

        // slow has 2 queued events, the third overflows it.
        assert_eq!(channel.emit("s1", completed(0.1)), 1);
        assert_eq!(channel.subscriber_count("s1"), 1);

        // Buffered events are still readable, then the queue closes.
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_none());
        assert!(fast.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_stream_ends_on_completed() {
        let channel = Arc::new(EventChannel::default());
        let stream = channel.stream("s1", Duration::from_secs(5));

        channel.emit("s1", EventKind::AnalysisStarted);
        channel.emit(
            "s1",
            EventKind::ModuleComplete {
                module_id: "a".to_string(),
                score: Some(0.2),
                confidence: Some(0.8),
                status: ModuleStatus::Done,
                processing_ms: 3,
            },
        );
        channel.emit("s1", completed(0.2));
        channel.emit("s1", EventKind::AnalysisStarted);

        let events: Vec<Event> = stream.collect().await;
        assert_eq!(events.len(), 3);
        assert!(matches!(events[2].kind, EventKind::Completed { .. }));
        assert_eq!(channel.subscriber_count("s1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_without_completed_yields_single_timeout() {
        let channel = Arc::new(EventChannel::default());
        let stream = channel.stream("s1", Duration::from_secs(30));
        channel.emit("s1", EventKind::AnalysisStarted);

        let events: Vec<Event> = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::AnalysisStarted);
        assert_eq!(events[1].kind, EventKind::Timeout);
        assert_eq!(events[1].submission_id, "s1");
        assert_eq!(channel.subscriber_count("s1"), 0);
    }

    #[tokio::test]
    async fn test_stream_cancellation_unsubscribes() {
        let channel = Arc::new(EventChannel::default());
        let stream = channel.stream("s1", Duration::from_secs(30));
        assert_eq!(channel.subscriber_count("s1"), 1);

        let mut stream = tokio_test::task::spawn(stream);
        tokio_test::assert_pending!(stream.poll_next());

        channel.emit("s1", EventKind::AnalysisStarted);
        let first = tokio_test::assert_ready!(stream.poll_next());
        assert_eq!(first.map(|e| e.kind), Some(EventKind::AnalysisStarted));

        drop(stream);
        assert_eq!(channel.subscriber_count("s1"), 0);
    }

    #[tokio::test]
    async fn test_event_json_shape() {
        let event = Event::new(
            "s1",
            EventKind::ModuleComplete {
                module_id: "plagiarism".to_string(),
                score: Some(0.5),
                confidence: Some(0.6),
                status: ModuleStatus::Error,
                processing_ms: 12,
            },
        );
        let value: serde_json::Value =
            serde_json::from_str(&event.to_json_line().unwrap()).unwrap();
        assert_eq!(value["type"], "module_complete");
        assert_eq!(value["submission_id"], "s1");
        assert_eq!(value["status"], "error");
        assert!(value["timestamp"].is_string());

        let back: Event = serde_json::from_value(value).unwrap();
        assert_eq!(back.kind, event.kind);
        assert!(!back.is_terminal());
        assert!(Event::new("s1", EventKind::Timeout).is_terminal());
    }
}
