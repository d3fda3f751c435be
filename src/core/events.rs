//! Typed publish/subscribe event bus.
//!
//! Events carry a dotted type (`command.started`), whose first segment is the
//! category, and an optional correlation id. Subscribers pick one of three
//! match modes; matching happens in [`EventFilter::matches`].

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::util::clock::now_ms;

/// Broadcast buffer per subscriber before lagging receivers skip events.
const CHANNEL_CAPACITY: usize = 256;

/// An observability event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique event id.
    pub id: String,
    /// Dotted event type, e.g. `prewarm.ready`.
    pub event_type: String,
    /// Ties together events from one logical operation.
    pub correlation_id: Option<String>,
    /// Emission time (ms since epoch).
    pub timestamp_ms: u128,
    /// Event body.
    pub payload: Value,
}

impl Event {
    /// Build an event stamped now.
    pub fn new(event_type: impl Into<String>, correlation_id: Option<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            correlation_id,
            timestamp_ms: now_ms(),
            payload,
        }
    }

    /// Category: the segment before the first `.`.
    pub fn category(&self) -> &str {
        self.event_type
            .split_once('.')
            .map_or(self.event_type.as_str(), |(category, _)| category)
    }
}

/// Subscription match mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    /// Every event.
    All,
    /// Exactly this event type.
    Exact(String),
    /// Every event in a category; `"command"` and `"command.*"` are equivalent.
    Category(String),
    /// Every event with this correlation id.
    Correlation(String),
}

impl EventFilter {
    /// Whether `event` passes this filter.
    pub fn matches(&self, event: &Event) -> bool {
        match self {
            Self::All => true,
            Self::Exact(event_type) => event.event_type == *event_type,
            Self::Category(category) => {
                let category = category.strip_suffix(".*").unwrap_or(category);
                event.category() == category
            }
            Self::Correlation(id) => event.correlation_id.as_deref() == Some(id.as_str()),
        }
    }
}

/// Receiving side of a filtered subscription.
pub struct EventSubscriber {
    filter: EventFilter,
    rx: broadcast::Receiver<Event>,
}

impl EventSubscriber {
    /// Next matching event, or `None` once the bus is dropped.
    /// Events missed because the subscriber lagged are skipped.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event already buffered, without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}

/// Event bus with a bounded in-memory history.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    history: Mutex<VecDeque<Event>>,
    max_history: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl EventBus {
    /// Create a bus that remembers the last `max_history` events.
    pub fn new(max_history: usize) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(max_history.min(1024))),
            max_history,
        }
    }

    /// Publish an event to every subscriber.
    pub fn publish(&self, event: Event) {
        {
            let mut history = self.history.lock();
            if history.len() >= self.max_history {
                history.pop_front();
            }
            if self.max_history > 0 {
                history.push_back(event.clone());
            }
        }
        // No receivers is not an error.
        let _ = self.tx.send(event);
    }

    /// Build and publish an event.
    pub fn emit(&self, event_type: &str, correlation_id: Option<&str>, payload: Value) {
        self.publish(Event::new(event_type, correlation_id.map(str::to_owned), payload));
    }

    /// Subscribe with a filter.
    pub fn subscribe(&self, filter: EventFilter) -> EventSubscriber {
        EventSubscriber {
            filter,
            rx: self.tx.subscribe(),
        }
    }

    /// Most recent `limit` events matching `filter`, oldest first.
    pub fn recent(&self, filter: &EventFilter, limit: usize) -> Vec<Event> {
        let history = self.history.lock();
        let mut matched: Vec<Event> = history
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect();
        matched.reverse();
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_modes() {
        let event = Event::new("command.started", Some("corr-1".into()), json!({}));
        assert_eq!(event.category(), "command");
        assert!(EventFilter::All.matches(&event));
        assert!(EventFilter::Exact("command.started".into()).matches(&event));
        assert!(!EventFilter::Exact("command".into()).matches(&event));
        assert!(EventFilter::Category("command".into()).matches(&event));
        assert!(EventFilter::Category("command.*".into()).matches(&event));
        assert!(!EventFilter::Category("prewarm".into()).matches(&event));
        assert!(EventFilter::Correlation("corr-1".into()).matches(&event));
        assert!(!EventFilter::Correlation("corr-2".into()).matches(&event));
    }

    #[tokio::test]
    async fn test_subscriber_only_sees_matching_events() {
        let bus = EventBus::default();
        let mut by_corr = bus.subscribe(EventFilter::Correlation("abc".into()));
        bus.emit("prewarm.ready", None, json!({}));
        bus.emit("command.started", Some("abc"), json!({"n": 1}));
        bus.emit("command.started", Some("xyz"), json!({"n": 2}));
        bus.emit("command.completed", Some("abc"), json!({"n": 3}));

        let first = by_corr.recv().await.unwrap();
        let second = by_corr.recv().await.unwrap();
        assert_eq!(first.event_type, "command.started");
        assert_eq!(second.event_type, "command.completed");
        assert!(by_corr.try_recv().is_none());
    }

    #[test]
    fn test_history_is_bounded() {
        let bus = EventBus::new(2);
        for i in 0..4 {
            bus.emit("prewarm.ready", None, json!({ "i": i }));
        }
        let recent = bus.recent(&EventFilter::All, 10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].payload, json!({ "i": 2 }));
        assert_eq!(recent[1].payload, json!({ "i": 3 }));
    }
}
