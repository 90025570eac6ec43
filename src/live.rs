//! In-process fan-out of live events to SSE subscribers.
//!
//! Each topic owns a `tokio::sync::broadcast` channel created on first
//! subscription. Publishing to a topic nobody listens to drops the channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::messaging::MessageRow;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// New messages in one conversation.
    Conversation(Uuid),
    /// Preview updates for every conversation a user takes part in.
    Inbox(Uuid),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    Message {
        message: MessageRow,
    },
    Inbox {
        conversation_id: Uuid,
        last_message_text: String,
        updated_at: DateTime<Utc>,
    },
}

impl LiveEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LiveEvent::Message { .. } => "message",
            LiveEvent::Inbox { .. } => "inbox",
        }
    }
}

#[derive(Clone, Default)]
pub struct LiveHub {
    channels: Arc<Mutex<HashMap<Topic, broadcast::Sender<LiveEvent>>>>,
}

impl LiveHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Topic, broadcast::Sender<LiveEvent>>> {
        // a panic while holding the lock cannot leave the map half-updated
        self.channels.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<LiveEvent> {
        let mut channels = self.lock();
        channels.retain(|_, tx| tx.receiver_count() > 0);
        channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Returns how many subscribers received the event.
    pub fn publish(&self, topic: Topic, event: LiveEvent) -> usize {
        let mut channels = self.lock();
        let Some(tx) = channels.get(&topic) else {
            return 0;
        };

        match tx.send(event) {
            Ok(n) => n,
            Err(_) => {
                channels.remove(&topic);
                tracing::debug!(?topic, remaining = channels.len(), "pruned idle live topic");
                0
            }
        }
    }

    #[cfg(test)]
    pub fn topic_count(&self) -> usize {
        self.lock().len()
    }

    /// Subscribes and turns the receiver into a stream. Lagged subscribers
    /// skip the events they missed.
    pub fn stream(&self, topic: Topic) -> impl Stream<Item = LiveEvent> + Send + use<> {
        let sub = Subscription {
            rx: self.subscribe(topic),
            hub: self.clone(),
            topic,
        };
        futures::stream::unfold(sub, move |mut sub| async move {
            loop {
                match sub.rx.recv().await {
                    Ok(event) => return Some((event, sub)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(?topic, skipped, "live subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }
}

/// A stream's receiver. Dropping the last one for a topic removes the
/// topic from the hub.
struct Subscription {
    rx: broadcast::Receiver<LiveEvent>,
    hub: LiveHub,
    topic: Topic,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut channels = self.hub.lock();
        // `self.rx` is still alive here and counts as one receiver
        let idle = channels
            .get(&self.topic)
            .is_some_and(|tx| tx.receiver_count() <= 1);
        if idle {
            channels.remove(&self.topic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use futures::StreamExt;

    fn message(conversation_id: Uuid, text: &str) -> LiveEvent {
        LiveEvent::Message {
            message: MessageRow {
                message_id: Uuid::new_v4(),
                conversation_id,
                sender_id: Uuid::new_v4(),
                sender_role: Role::Patient,
                text: text.into(),
                created_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn delivers_only_to_matching_topic() {
        let hub = LiveHub::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let mut rx_a = hub.subscribe(Topic::Conversation(a));
        let mut rx_b = hub.subscribe(Topic::Conversation(b));

        assert_eq!(hub.publish(Topic::Conversation(a), message(a, "hello")), 1);

        match rx_a.recv().await.unwrap() {
            LiveEvent::Message { message } => assert_eq!(message.text, "hello"),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn publishing_without_listeners_prunes_the_channel() {
        let hub = LiveHub::new();
        let user = Uuid::new_v4();

        assert_eq!(hub.publish(Topic::Inbox(user), message(user, "x")), 0);
        assert_eq!(hub.topic_count(), 0);

        let rx = hub.subscribe(Topic::Inbox(user));
        assert_eq!(hub.topic_count(), 1);
        drop(rx);

        assert_eq!(hub.publish(Topic::Inbox(user), message(user, "y")), 0);
        assert_eq!(hub.topic_count(), 0);
    }

    #[tokio::test]
    async fn disconnected_streams_leave_no_topics_behind() {
        let hub = LiveHub::new();
        for _ in 0..100 {
            drop(hub.stream(Topic::Inbox(Uuid::new_v4())));
        }
        assert_eq!(hub.topic_count(), 0);

        let c = Topic::Conversation(Uuid::new_v4());
        let first = hub.stream(c);
        let second = hub.stream(c);
        drop(first);
        assert_eq!(hub.topic_count(), 1);
        drop(second);
        assert_eq!(hub.topic_count(), 0);
    }

    #[tokio::test]
    async fn subscribing_sweeps_abandoned_receivers() {
        let hub = LiveHub::new();
        drop(hub.subscribe(Topic::Inbox(Uuid::new_v4())));
        drop(hub.subscribe(Topic::Inbox(Uuid::new_v4())));

        let _rx = hub.subscribe(Topic::Inbox(Uuid::new_v4()));
        assert_eq!(hub.topic_count(), 1);
    }

    #[tokio::test]
    async fn stream_yields_events_in_order() {
        let hub = LiveHub::new();
        let c = Uuid::new_v4();
        let mut stream = Box::pin(hub.stream(Topic::Conversation(c)));

        hub.publish(Topic::Conversation(c), message(c, "one"));
        hub.publish(Topic::Conversation(c), message(c, "two"));

        let texts: Vec<String> = stream
            .by_ref()
            .take(2)
            .map(|ev| match ev {
                LiveEvent::Message { message } => message.text,
                LiveEvent::Inbox { .. } => String::new(),
            })
            .collect()
            .await;
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[test]
    fn event_json_is_tagged() {
        let c = Uuid::new_v4();
        let v = serde_json::to_value(message(c, "hi")).unwrap();
        assert_eq!(v["type"], "message");
        assert_eq!(v["message"]["text"], "hi");
        assert_eq!(message(c, "hi").kind(), "message");
    }
}
