//! In-process lifecycle event bus.
//!
//! Topics are `(project_id, subject_id or "*")`; subscribing with no subject
//! is the project-wide wildcard. Emit dispatches to exact-subject and
//! wildcard subscribers through non-blocking unbounded sends, so emitters
//! never stall on a slow consumer; dead subscribers are pruned on the next
//! send failure.
//!
//! This bus is deliberately process-local. Its surface (subscribe/emit) is
//! the exact boundary where an external broker would be substituted for
//! horizontal scale — nothing else in the crate knows the bus is local.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// A memory lifecycle event as delivered to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    pub data: serde_json::Value,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TopicKey {
    project_id: String,
    /// `None` is the project-wide wildcard.
    subject_id: Option<String>,
}

type SubscriberMap = HashMap<TopicKey, HashMap<u64, UnboundedSender<Arc<LifecycleEvent>>>>;

/// Topic-keyed pub/sub registry.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    subscribers: Mutex<SubscriberMap>,
    next_id: AtomicU64,
}

/// A live subscription. Dropping it unsubscribes exactly once.
pub struct Subscription {
    pub events: UnboundedReceiver<Arc<LifecycleEvent>>,
    _guard: SubscriptionGuard,
}

struct SubscriptionGuard {
    bus: EventBus,
    topic: TopicKey,
    id: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.bus.remove(&self.topic, self.id);
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for a subject, or for the whole project when
    /// `subject_id` is `None`.
    pub fn subscribe(&self, project_id: &str, subject_id: Option<&str>) -> Subscription {
        let topic = TopicKey {
            project_id: project_id.to_string(),
            subject_id: subject_id.map(str::to_string),
        };
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut subs = self.inner.subscribers.lock().expect("bus lock");
        subs.entry(topic.clone()).or_default().insert(id, tx);

        Subscription {
            events: rx,
            _guard: SubscriptionGuard {
                bus: self.clone(),
                topic,
                id,
            },
        }
    }

    /// Construct and dispatch an event to exact-subject and project-wildcard
    /// subscribers. One dead subscriber never halts fan-out to the others.
    pub fn emit(
        &self,
        project_id: &str,
        subject_id: Option<&str>,
        event_type: &str,
        data: serde_json::Value,
    ) {
        let event = Arc::new(LifecycleEvent {
            event_type: event_type.to_string(),
            project_id: project_id.to_string(),
            subject_id: subject_id.map(str::to_string),
            data,
            timestamp: chrono::Utc::now().to_rfc3339(),
        });

        let mut topics = vec![TopicKey {
            project_id: project_id.to_string(),
            subject_id: None,
        }];
        if let Some(subject) = subject_id {
            topics.push(TopicKey {
                project_id: project_id.to_string(),
                subject_id: Some(subject.to_string()),
            });
        }

        let mut dead: Vec<(TopicKey, u64)> = Vec::new();
        {
            let subs = self.inner.subscribers.lock().expect("bus lock");
            for topic in &topics {
                if let Some(entries) = subs.get(topic) {
                    for (id, tx) in entries {
                        if tx.send(event.clone()).is_err() {
                            dead.push((topic.clone(), *id));
                        }
                    }
                }
            }
        }

        for (topic, id) in dead {
            self.remove(&topic, id);
        }
    }

    fn remove(&self, topic: &TopicKey, id: u64) {
        let mut subs = self.inner.subscribers.lock().expect("bus lock");
        if let Some(entries) = subs.get_mut(topic) {
            entries.remove(&id);
            if entries.is_empty() {
                subs.remove(topic);
            }
        }
    }

    /// Current number of live subscribers (debug aid).
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .map(|m| m.values().map(|v| v.len()).sum())
            .unwrap_or(0)
    }
}
