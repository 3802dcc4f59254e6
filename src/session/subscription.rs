//! Topic Subscriptions
//!
//! Resolves a topic's declared type from the master and asks the transport
//! to deliver it. The transport holds one subscription per topic; every
//! handle on that topic is a listener on it, fed in transport order.

use crate::domain::ports::{
    Delivery, DeliveryCallback, MasterApiRef, PublishedTopic, TransportRef,
};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A delivered message, with the metadata the caller needs to interpret it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicMessage {
    pub topic: String,
    /// Type the topic was declared with when the subscription was made
    pub message_type: String,
    pub data: Value,
    /// Size on the wire, in bytes
    pub size: usize,
    /// Node URI of the publisher
    pub publisher: String,
}

/// Callback invoked for every message on a subscription
pub type MessageCallback = Arc<dyn Fn(TopicMessage) + Send + Sync>;

/// Identifies one subscription made through [`SubscriptionManager::subscribe`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    topic: String,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

type Listeners = Arc<RwLock<Vec<(u64, MessageCallback)>>>;

/// Transport subscription shared by all handles on a topic
struct TopicFanout {
    message_type: String,
    listeners: Listeners,
}

// =============================================================================
// Subscription Manager
// =============================================================================

pub struct SubscriptionManager {
    master: MasterApiRef,
    transport: TransportRef,
    call_timeout: Duration,
    next_id: AtomicU64,
    topics: tokio::sync::Mutex<HashMap<String, TopicFanout>>,
}

impl SubscriptionManager {
    pub fn new(master: MasterApiRef, transport: TransportRef, call_timeout: Duration) -> Self {
        Self {
            master,
            transport,
            call_timeout,
            next_id: AtomicU64::new(1),
            topics: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    async fn bounded<T>(&self, what: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::Transport(format!(
                "{} timed out after {}ms",
                what,
                self.call_timeout.as_millis()
            ))),
        }
    }

    /// Topics that currently have publishers, with their declared types
    pub async fn published_topics(&self) -> Result<Vec<PublishedTopic>> {
        self.bounded("getPublishedTopics", self.master.published_topics())
            .await
            .map_err(Error::into_unavailable)
    }

    /// Subscribe to `topic`, invoking `on_message` for every delivery
    ///
    /// Fails with `UnknownTopic` if the master lists no publisher for it.
    pub async fn subscribe<F>(&self, topic: &str, on_message: F) -> Result<SubscriptionHandle>
    where
        F: Fn(TopicMessage) + Send + Sync + 'static,
    {
        let declared = self
            .published_topics()
            .await?
            .into_iter()
            .find(|published| published.name == topic)
            .ok_or_else(|| Error::UnknownTopic {
                topic: topic.to_string(),
            })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: MessageCallback = Arc::new(on_message);
        let mut topics = self.topics.lock().await;

        match topics.get_mut(topic) {
            Some(fanout) if fanout.message_type == declared.message_type => {
                fanout.listeners.write().push((id, callback));
            }
            Some(fanout) => {
                warn!(
                    topic,
                    from = %fanout.message_type,
                    to = %declared.message_type,
                    "Topic type changed, re-establishing subscription"
                );
                fanout.listeners.write().push((id, callback));
                let listeners = fanout.listeners.clone();
                if let Err(e) = self.establish(topic, &declared.message_type, listeners).await {
                    topics.remove(topic);
                    return Err(e);
                }
                if let Some(fanout) = topics.get_mut(topic) {
                    fanout.message_type = declared.message_type.clone();
                }
            }
            None => {
                let listeners: Listeners = Arc::new(RwLock::new(vec![(id, callback)]));
                self.establish(topic, &declared.message_type, listeners.clone())
                    .await?;
                topics.insert(
                    topic.to_string(),
                    TopicFanout {
                        message_type: declared.message_type.clone(),
                        listeners,
                    },
                );
            }
        }

        info!(topic, message_type = %declared.message_type, id, "Subscribed");
        Ok(SubscriptionHandle {
            id,
            topic: topic.to_string(),
        })
    }

    async fn establish(&self, topic: &str, message_type: &str, listeners: Listeners) -> Result<()> {
        let callback = fanout_callback(topic, message_type, listeners);
        self.bounded("subscribe", self.transport.subscribe(topic, message_type, callback))
            .await
            .map_err(|e| Error::SubscriptionFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    /// Drop a subscription
    ///
    /// Idempotent: returns false if the handle was already unsubscribed.
    /// The transport subscription goes away with the topic's last handle.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<bool> {
        let mut topics = self.topics.lock().await;
        let Some(fanout) = topics.get(&handle.topic) else {
            return Ok(false);
        };

        let remaining = {
            let mut listeners = fanout.listeners.write();
            let before = listeners.len();
            listeners.retain(|(id, _)| *id != handle.id);
            if listeners.len() == before {
                return Ok(false);
            }
            listeners.len()
        };

        debug!(topic = %handle.topic, id = handle.id, remaining, "Unsubscribed");
        if remaining == 0 {
            topics.remove(&handle.topic);
            self.bounded("unsubscribe", self.transport.unsubscribe(&handle.topic))
                .await?;
        }
        Ok(true)
    }

    /// Drop every subscription on `topic`; false if there were none
    pub async fn unsubscribe_topic(&self, topic: &str) -> Result<bool> {
        let removed = self.topics.lock().await.remove(topic);
        match removed {
            Some(_) => {
                self.bounded("unsubscribe", self.transport.unsubscribe(topic))
                    .await?;
                info!(topic, "Unsubscribed topic");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Tear down every subscription, logging failures instead of returning them
    pub async fn unsubscribe_all(&self) {
        let drained: Vec<String> = self.topics.lock().await.drain().map(|(topic, _)| topic).collect();
        for topic in drained {
            if let Err(e) = self
                .bounded("unsubscribe", self.transport.unsubscribe(&topic))
                .await
            {
                warn!(topic = %topic, error = %e, "Failed to tear down subscription");
            }
        }
    }

    /// Topics with at least one live handle
    pub async fn active_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.lock().await.keys().cloned().collect();
        topics.sort();
        topics
    }
}

/// Wrap deliveries with topic metadata and hand them to every listener
fn fanout_callback(topic: &str, message_type: &str, listeners: Listeners) -> DeliveryCallback {
    let topic = topic.to_string();
    let message_type = message_type.to_string();

    Arc::new(move |delivery: Delivery| {
        let targets: Vec<MessageCallback> = listeners
            .read()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        for callback in targets {
            callback(TopicMessage {
                topic: topic.clone(),
                message_type: message_type.clone(),
                data: delivery.data.clone(),
                size: delivery.size,
                publisher: delivery.publisher.clone(),
            });
        }
    })
}
