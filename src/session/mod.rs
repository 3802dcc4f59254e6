//! Graph Session
//!
//! [`RosGraph`] is what a caller holds: it binds the graph cache, topic
//! subscriptions and service resolution to one middleware [`Session`], and
//! owns the lifecycle from `attach` to `shutdown`.

pub mod service;
pub mod subscription;

pub use service::{ServiceClientHandle, ServiceResolver};
pub use subscription::{
    MessageCallback, SubscriptionHandle, SubscriptionManager, TopicMessage,
};

use crate::domain::ports::{
    MasterApiRef, ParticipantId, PublishedTopic, SchemaRegistryRef, TransportRef,
};
use crate::error::{Error, Result};
use crate::graph::{GraphCache, GraphCacheConfig, GraphEvent, GraphSnapshot, RefreshReport};
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Collaborators provided by the middleware once it is initialized
#[derive(Clone)]
pub struct Session {
    pub master: MasterApiRef,
    pub transport: TransportRef,
    pub schemas: SchemaRegistryRef,
}

/// Components bound to an attached session
struct Attached {
    cache: Arc<GraphCache>,
    subscriptions: SubscriptionManager,
    services: ServiceResolver,
    transport: TransportRef,
}

pub struct RosGraph {
    config: GraphCacheConfig,
    attached: ArcSwapOption<Attached>,
    /// Serializes attach and shutdown
    lifecycle: tokio::sync::Mutex<()>,
}

impl RosGraph {
    pub fn new(config: GraphCacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            attached: ArcSwapOption::empty(),
            lifecycle: tokio::sync::Mutex::new(()),
        })
    }

    /// Bind to `session` and start the refresh scheduler
    ///
    /// Returns the outcome of the first refresh. The session stays attached
    /// when that refresh fails; the scheduler keeps retrying on its interval.
    pub async fn attach(&self, session: Session) -> Result<RefreshReport> {
        let _guard = self.lifecycle.lock().await;
        if self.attached.load().is_some() {
            return Err(Error::AlreadyConnected);
        }

        let cache = GraphCache::new(self.config.clone(), session.master.clone())?;
        let attached = Arc::new(Attached {
            subscriptions: SubscriptionManager::new(
                session.master.clone(),
                session.transport.clone(),
                self.config.call_timeout,
            ),
            services: ServiceResolver::new(
                session.transport.clone(),
                session.schemas.clone(),
                self.config.call_timeout,
            ),
            transport: session.transport,
            cache: cache.clone(),
        });
        self.attached.store(Some(attached));

        info!(caller_id = %self.config.caller_id, "Attached graph session");
        let initial = cache.start().await;
        if let Err(e) = &initial {
            warn!(error = %e, "Initial refresh failed, serving empty graph until the next tick");
        }
        initial
    }

    pub fn is_connected(&self) -> bool {
        self.attached.load().is_some()
    }

    fn connected(&self) -> Result<Arc<Attached>> {
        self.attached.load_full().ok_or(Error::NotConnected)
    }

    // -------------------------------------------------------------------------
    // Graph state
    // -------------------------------------------------------------------------

    pub async fn refresh(&self) -> Result<RefreshReport> {
        self.connected()?.cache.refresh().await
    }

    /// Latest snapshot; empty while detached
    pub fn current_state(&self) -> Arc<GraphSnapshot> {
        match self.attached.load().as_ref() {
            Some(attached) => attached.cache.current_state(),
            None => Arc::new(GraphSnapshot::default()),
        }
    }

    /// Participant at `address`; `None` while detached
    pub fn resolve_node_name(&self, address: &str) -> Option<ParticipantId> {
        self.attached
            .load()
            .as_ref()
            .and_then(|attached| attached.cache.resolve_node_name(address))
    }

    pub fn cache(&self) -> Result<Arc<GraphCache>> {
        Ok(self.connected()?.cache.clone())
    }

    pub fn subscribe_events(&self) -> Result<broadcast::Receiver<GraphEvent>> {
        Ok(self.connected()?.cache.subscribe_events())
    }

    // -------------------------------------------------------------------------
    // Topics
    // -------------------------------------------------------------------------

    pub async fn published_topics(&self) -> Result<Vec<PublishedTopic>> {
        self.connected()?.subscriptions.published_topics().await
    }

    pub async fn subscribe<F>(&self, topic: &str, on_message: F) -> Result<SubscriptionHandle>
    where
        F: Fn(TopicMessage) + Send + Sync + 'static,
    {
        self.connected()?
            .subscriptions
            .subscribe(topic, on_message)
            .await
    }

    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<bool> {
        self.connected()?.subscriptions.unsubscribe(handle).await
    }

    pub async fn unsubscribe_topic(&self, topic: &str) -> Result<bool> {
        self.connected()?.subscriptions.unsubscribe_topic(topic).await
    }

    // -------------------------------------------------------------------------
    // Services
    // -------------------------------------------------------------------------

    pub async fn get_service_client(&self, service: &str) -> Result<ServiceClientHandle> {
        self.connected()?.services.get_service_client(service).await
    }

    pub fn describe_request_shape(&self, handle: &ServiceClientHandle) -> Result<String> {
        self.connected()?.services.describe_request_shape(handle)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Stop the scheduler, drop subscriptions and shut the transport down
    ///
    /// Later operations fail with `NotConnected`. Returns false if nothing
    /// was attached.
    pub async fn shutdown(&self) -> Result<bool> {
        let _guard = self.lifecycle.lock().await;
        let Some(attached) = self.attached.swap(None) else {
            return Ok(false);
        };

        attached.cache.stop().await;
        attached.subscriptions.unsubscribe_all().await;
        attached.transport.shutdown().await?;

        info!(
            generation = attached.cache.generation(),
            "Shut down graph session"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaCatalog;
    use crate::testing::{FakeMaster, FakeTransport};
    use assert_matches::assert_matches;
    use std::sync::atomic::Ordering;

    fn session(master: Arc<FakeMaster>, transport: Arc<FakeTransport>) -> Session {
        let catalog = SchemaCatalog::new();
        catalog
            .register_service("rospy_tutorials/AddTwoInts", "int64 a\nint64 b\n---\nint64 sum\n")
            .unwrap();
        Session {
            master,
            transport,
            schemas: Arc::new(catalog),
        }
    }

    #[tokio::test]
    async fn test_not_connected_before_attach() {
        let graph = RosGraph::new(GraphCacheConfig::default()).unwrap();

        assert!(!graph.is_connected());
        assert!(graph.current_state().is_empty());
        assert_eq!(graph.resolve_node_name("10.0.0.1:9"), None);
        assert_matches!(graph.refresh().await, Err(Error::NotConnected));
        assert_matches!(graph.subscribe("/scan", |_| {}).await, Err(Error::NotConnected));
        assert_matches!(graph.get_service_client("/svc").await, Err(Error::NotConnected));
        assert!(!graph.shutdown().await.unwrap());
    }

    #[tokio::test]
    async fn test_attach_and_scan_scenario() {
        let graph = RosGraph::new(GraphCacheConfig::default()).unwrap();
        let report = graph
            .attach(session(FakeMaster::scan_graph(), FakeTransport::new()))
            .await
            .unwrap();
        assert_eq!(report.resolved, 2);

        let state = graph.current_state();
        assert_eq!(
            state
                .publishers_of("/scan")
                .map(|set| set.iter().cloned().collect::<Vec<_>>())
                .unwrap_or_default(),
            vec![ParticipantId::from("n1")]
        );
        assert_eq!(graph.resolve_node_name("10.0.0.1:9"), Some("n1".into()));

        assert_matches!(
            graph
                .attach(session(FakeMaster::scan_graph(), FakeTransport::new()))
                .await,
            Err(Error::AlreadyConnected)
        );
        graph.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_attach_survives_initial_outage() {
        let master = FakeMaster::scan_graph();
        master.set_unavailable(true);
        let graph = RosGraph::new(GraphCacheConfig::default()).unwrap();

        let initial = graph.attach(session(master.clone(), FakeTransport::new())).await;
        assert_matches!(initial, Err(Error::MasterUnavailable { .. }));
        assert!(graph.is_connected());
        assert!(graph.current_state().is_empty());

        master.set_unavailable(false);
        graph.refresh().await.unwrap();
        assert_eq!(graph.resolve_node_name("10.0.0.2:9"), Some("n2".into()));
        graph.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_facade_end_to_end() {
        let transport = FakeTransport::new();
        transport.advertise_service("/add_two_ints", "rospy_tutorials/AddTwoInts");
        let graph = RosGraph::new(GraphCacheConfig::default()).unwrap();
        graph
            .attach(session(FakeMaster::scan_graph(), transport.clone()))
            .await
            .unwrap();

        let handle = graph.subscribe("/scan", |_| {}).await.unwrap();
        assert!(transport.is_subscribed("/scan"));
        assert_matches!(
            graph.subscribe("/nonexistent", |_| {}).await,
            Err(Error::UnknownTopic { .. })
        );
        assert!(graph.unsubscribe(&handle).await.unwrap());
        assert!(!graph.unsubscribe(&handle).await.unwrap());

        let client = graph.get_service_client("/add_two_ints").await.unwrap();
        assert_eq!(graph.describe_request_shape(&client).unwrap(), r#"{"a":0,"b":0}"#);
        assert_matches!(
            graph.get_service_client("/nonexistent").await,
            Err(Error::Unresolvable { .. })
        );
        graph.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_tears_down() {
        let master = FakeMaster::scan_graph();
        let transport = FakeTransport::new();
        let graph = RosGraph::new(GraphCacheConfig::default()).unwrap();
        graph
            .attach(session(master.clone(), transport.clone()))
            .await
            .unwrap();
        let cache = graph.cache().unwrap();
        graph.subscribe("/scan", |_| {}).await.unwrap();

        assert!(graph.shutdown().await.unwrap());
        assert!(!cache.is_running());
        assert!(!transport.is_subscribed("/scan"));
        assert!(transport.shut_down.load(Ordering::SeqCst));

        assert_matches!(graph.refresh().await, Err(Error::NotConnected));
        assert_matches!(graph.published_topics().await, Err(Error::NotConnected));
        assert!(graph.current_state().is_empty());
        assert!(!graph.shutdown().await.unwrap());
    }
}
