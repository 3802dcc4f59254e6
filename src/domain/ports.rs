//! Domain Ports - Core trait definitions for the graph cache
//!
//! These traits define the boundaries between the cache and the middleware
//! it sits on: the master registry, the pub/sub transport and the schema
//! registry. Adapters implement these traits to provide concrete functionality.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Participant ID
// =============================================================================

/// Registry-issued identifier of a running node
///
/// Only stable for the lifetime of the node's current registration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&String> for ParticipantId {
    fn from(s: &String) -> Self {
        Self(s.clone())
    }
}

// =============================================================================
// Node Address
// =============================================================================

/// Network address a participant's API is reachable at
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    /// URI scheme, e.g. `http` or `rosrpc`
    pub protocol: String,
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(protocol: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: protocol.into(),
            host: host.into(),
            port,
        }
    }

    /// Parse a node URI such as `http://10.0.0.1:40123/`
    pub fn parse_uri(uri: &str) -> Result<Self> {
        let (protocol, rest) = uri
            .split_once("://")
            .ok_or_else(|| Error::InvalidAddress(uri.to_string()))?;
        let authority = rest.split('/').next().unwrap_or_default();
        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidAddress(uri.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::InvalidAddress(uri.to_string()))?;
        if protocol.is_empty() || host.is_empty() {
            return Err(Error::InvalidAddress(uri.to_string()));
        }
        Ok(Self::new(protocol, host, port))
    }

    /// `host:port`, the key the node directory is indexed by
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}/", self.protocol, self.host, self.port)
    }
}

/// Normalize an address as callers hand it in to the directory key
///
/// Accepts both `host:port` and full node URIs.
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    match NodeAddress::parse_uri(trimmed) {
        Ok(parsed) => parsed.authority(),
        Err(_) => trimmed.trim_end_matches('/').to_string(),
    }
}

// =============================================================================
// Registry Types
// =============================================================================

/// Raw system state as reported by the master
///
/// Each map goes from topic or service name to the participants holding
/// that role, in registry order (may contain duplicates).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemState {
    pub publishers: BTreeMap<String, Vec<String>>,
    pub subscribers: BTreeMap<String, Vec<String>>,
    pub services: BTreeMap<String, Vec<String>>,
}

/// A topic with at least one publisher, and its declared message type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedTopic {
    pub name: String,
    #[serde(rename = "type")]
    pub message_type: String,
}

impl PublishedTopic {
    pub fn new(name: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message_type: message_type.into(),
        }
    }
}

// =============================================================================
// Master Registry Port
// =============================================================================

/// Port for master registry queries
#[async_trait]
pub trait MasterApi: Send + Sync {
    /// Fetch publishers, subscribers and service providers for every name
    async fn system_state(&self) -> Result<SystemState>;

    /// Resolve a participant to the address of its node API
    async fn lookup_node(&self, caller_id: &str, participant: &ParticipantId)
        -> Result<NodeAddress>;

    /// List topics that currently have publishers, with their types
    async fn published_topics(&self) -> Result<Vec<PublishedTopic>>;
}

// =============================================================================
// Transport Port
// =============================================================================

/// A payload handed over by the transport for one subscription
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Decoded message
    pub data: Value,
    /// Size of the message on the wire, in bytes
    pub size: usize,
    /// Node URI of the publisher that sent it
    pub publisher: String,
}

/// Callback the transport invokes for every delivery on a topic
pub type DeliveryCallback = Arc<dyn Fn(Delivery) + Send + Sync>;

/// Type information a service provider reports in its connection header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTypeHeader {
    #[serde(rename = "type")]
    pub service_type: String,
}

/// A callable, type-bound client for one service
#[async_trait]
pub trait ServiceClient: Send + Sync {
    fn service_name(&self) -> &str;

    /// `package/Subtype`
    fn service_type(&self) -> &str;

    async fn call(&self, request: Value) -> Result<Value>;
}

/// Port for the pub/sub data path of the middleware session
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start delivering messages of `topic` to `on_delivery`
    ///
    /// A second call for the same topic replaces the callback.
    async fn subscribe(
        &self,
        topic: &str,
        message_type: &str,
        on_delivery: DeliveryCallback,
    ) -> Result<()>;

    /// Stop all deliveries for `topic`
    async fn unsubscribe(&self, topic: &str) -> Result<()>;

    /// Probe a service provider for its type
    async fn service_type_header(&self, service: &str) -> Result<ServiceTypeHeader>;

    async fn create_service_client(
        &self,
        service: &str,
        service_type: &str,
    ) -> Result<Arc<dyn ServiceClient>>;

    /// Tear down the session
    async fn shutdown(&self) -> Result<()>;
}

// =============================================================================
// Schema Registry Port
// =============================================================================

/// Type of a single message field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Bool,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
    String,
    Time,
    Duration,
    /// Nested message, fully qualified (`package/Type`)
    Message(String),
    Array {
        element: Box<FieldType>,
        /// Fixed length, `None` for variable-length arrays
        len: Option<usize>,
    },
}

/// A named field of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
}

/// Layout of a message type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDescriptor {
    /// `package/Type`
    pub type_name: String,
    pub fields: Vec<FieldDescriptor>,
    /// Source definition text
    pub definition: String,
}

/// Request/response pair of a service type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub type_name: String,
    pub request: MessageDescriptor,
    pub response: MessageDescriptor,
}

/// Port for looking up type descriptors by name
pub trait SchemaRegistry: Send + Sync {
    fn resolve_message(&self, type_name: &str) -> Result<MessageDescriptor>;

    fn resolve_service(&self, type_name: &str) -> Result<ServiceDescriptor>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type MasterApiRef = Arc<dyn MasterApi>;
pub type TransportRef = Arc<dyn Transport>;
pub type SchemaRegistryRef = Arc<dyn SchemaRegistry>;
