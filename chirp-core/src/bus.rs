use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};

use crate::error::BusError;

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self { topic: topic.into(), payload: payload.into(), retain: false }
    }

    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

pub type MessageStream = Box<dyn Stream<Item = Message> + Unpin + Send>;

/// Broker session used by the bridge.
///
/// Subscriptions are session-wide: every stream returned by [`Bus::incoming`]
/// sees every message matching any active filter.
#[async_trait]
pub trait Bus: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes, retain: bool) -> Result<()>;
    async fn subscribe(&self, filter: &str) -> Result<()>;
    async fn unsubscribe(&self, filter: &str) -> Result<()>;
    fn incoming(&self) -> Result<MessageStream>;
    /// Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// Broker stand-in with retained-message semantics, used by tests and
/// local runs.
#[derive(Clone)]
pub struct InMemoryBus {
    tx: Arc<broadcast::Sender<Message>>,
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    filters: BTreeSet<String>,
    retained: BTreeMap<String, Bytes>,
    published: Vec<Message>,
    closed: bool,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        let (tx, _rx) = broadcast::channel(4096);
        Self { tx: Arc::new(tx), inner: Arc::default() }
    }
}

impl InMemoryBus {
    /// Drains the log of everything published so far.
    pub fn take_published(&self) -> Vec<Message> {
        match self.inner.lock() {
            Ok(mut g) => std::mem::take(&mut g.published),
            Err(_) => Vec::new(),
        }
    }

    pub fn retained(&self, topic: &str) -> Option<Bytes> {
        self.inner.lock().ok().and_then(|g| g.retained.get(topic).cloned())
    }

    pub fn retained_topics(&self) -> Vec<String> {
        self.inner.lock().map(|g| g.retained.keys().cloned().collect()).unwrap_or_default()
    }

    pub fn is_subscribed(&self, filter: &str) -> bool {
        self.inner.lock().map(|g| g.filters.contains(filter)).unwrap_or(false)
    }

    /// Delivers a message as if another client had published it.
    pub async fn inject(&self, topic: &str, payload: impl Into<Bytes>, retain: bool) -> Result<()> {
        self.publish(topic, payload.into(), retain).await
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| anyhow!("in-memory bus lock poisoned"))
    }
}

#[async_trait]
impl Bus for InMemoryBus {
    async fn publish(&self, topic: &str, payload: Bytes, retain: bool) -> Result<()> {
        let deliver = {
            let mut g = self.lock()?;
            if g.closed {
                return Err(BusError::Closed.into());
            }
            g.published.push(Message { topic: topic.to_string(), payload: payload.clone(), retain });
            if retain {
                if payload.is_empty() {
                    g.retained.remove(topic);
                } else {
                    g.retained.insert(topic.to_string(), payload.clone());
                }
            }
            g.filters.iter().any(|f| topic_matches(f, topic))
        };
        if deliver {
            let _ = self.tx.send(Message { topic: topic.to_string(), payload, retain: false });
        }
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<()> {
        let replay: Vec<Message> = {
            let mut g = self.lock()?;
            if g.closed {
                return Err(BusError::Closed.into());
            }
            g.filters.insert(filter.to_string());
            g.retained
                .iter()
                .filter(|(topic, _)| topic_matches(filter, topic))
                .map(|(topic, payload)| Message {
                    topic: topic.clone(),
                    payload: payload.clone(),
                    retain: true,
                })
                .collect()
        };
        for msg in replay {
            let _ = self.tx.send(msg);
        }
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<()> {
        self.lock()?.filters.remove(filter);
        Ok(())
    }

    fn incoming(&self) -> Result<MessageStream> {
        let stream = BroadcastStream::new(self.tx.subscribe()).filter_map(|item| item.ok());
        Ok(Box::new(stream))
    }

    async fn close(&self) -> Result<()> {
        self.lock()?.closed = true;
        Ok(())
    }
}

/// MQTT filter matching with `+` (one level) and `#` (remaining levels).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcards_follow_mqtt_rules() {
        assert!(topic_matches("a/+/c", "a/b/c"));
        assert!(!topic_matches("a/+/c", "a/b/d/c"));
        assert!(topic_matches("a/#", "a/b/c"));
        assert!(topic_matches("a/#", "a"));
        assert!(topic_matches("ha/+/+/+/config", "ha/sensor/0102/temp/config"));
        assert!(!topic_matches("ha/+/+/+/config", "ha/sensor/0102/config"));
        assert!(!topic_matches("a/b", "a/b/c"));
    }

    #[tokio::test]
    async fn retained_messages_replay_on_subscribe() {
        let bus = InMemoryBus::default();
        let mut rx = bus.incoming().unwrap();
        bus.publish("state/one", Bytes::from_static(b"on"), true).await.unwrap();
        bus.publish("state/two", Bytes::from_static(b"off"), false).await.unwrap();

        bus.subscribe("state/+").await.unwrap();
        let msg = rx.next().await.unwrap();
        assert_eq!(msg.topic, "state/one");
        assert!(msg.retain);

        bus.publish("state/one", Bytes::new(), true).await.unwrap();
        assert!(bus.retained("state/one").is_none());
        let cleared = rx.next().await.unwrap();
        assert!(cleared.payload.is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_publishing() {
        let bus = InMemoryBus::default();
        bus.close().await.unwrap();
        bus.close().await.unwrap();
        assert!(bus.publish("x", Bytes::new(), false).await.is_err());
    }
}
