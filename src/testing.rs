//! In-memory fakes of the middleware ports, for unit tests

use crate::domain::ports::{
    Delivery, DeliveryCallback, MasterApi, NodeAddress, ParticipantId, PublishedTopic,
    ServiceClient, ServiceTypeHeader, SystemState, Transport,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Fake Master
// =============================================================================

#[derive(Default)]
pub(crate) struct FakeMaster {
    state: Mutex<SystemState>,
    addresses: Mutex<HashMap<String, NodeAddress>>,
    topics: Mutex<Vec<PublishedTopic>>,
    unavailable: AtomicBool,
    system_state_delay: Mutex<Duration>,
    lookup_delay: Mutex<Duration>,
    pub system_state_calls: AtomicUsize,
    pub lookup_calls: AtomicUsize,
    pub topic_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeMaster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `/scan` published by n1 and subscribed by n2, both resolvable
    pub fn scan_graph() -> Arc<Self> {
        let master = Self::new();
        let mut state = SystemState::default();
        state.publishers.insert("/scan".into(), vec!["n1".into()]);
        state.subscribers.insert("/scan".into(), vec!["n2".into()]);
        master.set_state(state);
        master.set_address("n1", "10.0.0.1", 9);
        master.set_address("n2", "10.0.0.2", 9);
        master.set_topics(vec![PublishedTopic::new("/scan", "sensor_msgs/LaserScan")]);
        master
    }

    pub fn set_state(&self, state: SystemState) {
        *self.state.lock() = state;
    }

    pub fn set_address(&self, participant: &str, host: &str, port: u16) {
        self.addresses
            .lock()
            .insert(participant.to_string(), NodeAddress::new("http", host, port));
    }

    pub fn remove_address(&self, participant: &str) {
        self.addresses.lock().remove(participant);
    }

    pub fn set_topics(&self, topics: Vec<PublishedTopic>) {
        *self.topics.lock() = topics;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_system_state_delay(&self, delay: Duration) {
        *self.system_state_delay.lock() = delay;
    }

    pub fn set_lookup_delay(&self, delay: Duration) {
        *self.lookup_delay.lock() = delay;
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::MasterUnavailable {
                reason: "connection refused".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MasterApi for FakeMaster {
    async fn system_state(&self) -> Result<SystemState> {
        self.system_state_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.system_state_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check_available()?;
        Ok(self.state.lock().clone())
    }

    async fn lookup_node(
        &self,
        _caller_id: &str,
        participant: &ParticipantId,
    ) -> Result<NodeAddress> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = *self.lookup_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.check_available()?;
        self.addresses
            .lock()
            .get(participant.as_str())
            .cloned()
            .ok_or_else(|| Error::LookupFailed {
                participant: participant.to_string(),
                reason: "unknown node".into(),
            })
    }

    async fn published_topics(&self) -> Result<Vec<PublishedTopic>> {
        self.topic_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.topics.lock().clone())
    }
}

// =============================================================================
// Fake Transport
// =============================================================================

#[derive(Default)]
pub(crate) struct FakeTransport {
    subscriptions: Mutex<HashMap<String, (String, DeliveryCallback)>>,
    service_types: Mutex<HashMap<String, String>>,
    pub subscribe_calls: AtomicUsize,
    pub unsubscribe_calls: AtomicUsize,
    pub shut_down: AtomicBool,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn advertise_service(&self, service: &str, service_type: &str) {
        self.service_types
            .lock()
            .insert(service.to_string(), service_type.to_string());
    }

    /// Type the topic is currently subscribed with
    pub fn subscribed_type(&self, topic: &str) -> Option<String> {
        self.subscriptions
            .lock()
            .get(topic)
            .map(|(message_type, _)| message_type.clone())
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.lock().contains_key(topic)
    }

    /// Push a payload to the topic's callback; false if nobody listens
    pub fn deliver(&self, topic: &str, data: Value, size: usize, publisher: &str) -> bool {
        let callback = self
            .subscriptions
            .lock()
            .get(topic)
            .map(|(_, callback)| callback.clone());
        match callback {
            Some(callback) => {
                callback(Delivery {
                    data,
                    size,
                    publisher: publisher.to_string(),
                });
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn subscribe(
        &self,
        topic: &str,
        message_type: &str,
        on_delivery: DeliveryCallback,
    ) -> Result<()> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.subscriptions
            .lock()
            .insert(topic.to_string(), (message_type.to_string(), on_delivery));
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.lock().remove(topic);
        Ok(())
    }

    async fn service_type_header(&self, service: &str) -> Result<ServiceTypeHeader> {
        self.service_types
            .lock()
            .get(service)
            .map(|service_type| ServiceTypeHeader {
                service_type: service_type.clone(),
            })
            .ok_or_else(|| Error::UnknownService {
                service: service.to_string(),
            })
    }

    async fn create_service_client(
        &self,
        service: &str,
        service_type: &str,
    ) -> Result<Arc<dyn ServiceClient>> {
        Ok(Arc::new(EchoServiceClient::new(service, service_type)))
    }

    async fn shutdown(&self) -> Result<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Service client answering every call with the request it got
pub(crate) struct EchoServiceClient {
    service: String,
    service_type: String,
}

impl EchoServiceClient {
    pub fn new(service: &str, service_type: &str) -> Self {
        Self {
            service: service.to_string(),
            service_type: service_type.to_string(),
        }
    }
}

#[async_trait]
impl ServiceClient for EchoServiceClient {
    fn service_name(&self) -> &str {
        &self.service
    }

    fn service_type(&self) -> &str {
        &self.service_type
    }

    async fn call(&self, request: Value) -> Result<Value> {
        Ok(json!({ "echo": request }))
    }
}
