//! ROS Graph Cache
//!
//! An eventually-consistent view of a ROS computation graph, kept current by
//! periodically polling the master registry.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         RosGraph (session)                           │
//! │  ┌────────────────┐  ┌──────────────────────┐  ┌──────────────────┐  │
//! │  │   GraphCache   │  │ SubscriptionManager  │  │ ServiceResolver  │  │
//! │  │ snapshot + dir │  │  topic -> listeners  │  │ client + shapes  │  │
//! │  └───────┬────────┘  └──────────┬───────────┘  └────────┬─────────┘  │
//! ├──────────┼──────────────────────┼───────────────────────┼────────────┤
//! │          │                 Ports (domain)               │            │
//! │   MasterApi                 Transport             SchemaRegistry     │
//! ├──────────┼──────────────────────┼───────────────────────┼────────────┤
//! │  XmlRpcMaster          (middleware-provided)       SchemaCatalog     │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`graph`]: Snapshots, the address directory and the refresh scheduler
//! - [`session`]: The session facade, topic subscriptions and service clients
//! - [`master`]: XML-RPC adapter for the master registry
//! - [`schema`]: Message and service definitions, request templates
//! - [`api`]: HTTP introspection endpoints
//! - [`config`]: YAML file configuration
//! - [`domain`]: Core domain types and ports
//! - [`error`]: Error types and handling

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod graph;
pub mod master;
pub mod schema;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use api::{ApiServer, ApiServerConfig, RestRouter};

pub use config::{FileConfig, Settings};

pub use domain::ports::{
    normalize_address, MasterApi, MasterApiRef, NodeAddress, ParticipantId, PublishedTopic,
    SchemaRegistry, SchemaRegistryRef, ServiceClient, SystemState, Transport, TransportRef,
};

pub use error::{Error, Result};

pub use graph::{
    GraphCache, GraphCacheConfig, GraphEvent, GraphSnapshot, GraphView, NodeDirectory,
    RefreshReport, RefreshStatsSnapshot,
};

pub use master::{XmlRpcMaster, XmlRpcMasterConfig};

pub use schema::{default_template, SchemaCatalog};

pub use session::{
    RosGraph, ServiceClientHandle, Session, SubscriptionHandle, TopicMessage,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
