//! HTTP introspection API over the graph cache

pub mod rest;
pub mod server;

pub use rest::{render_metrics, ApiErrorResponse, GraphResponse, ResolveResponse, RestRouter};
pub use server::{ApiServer, ApiServerConfig, DEFAULT_API_ADDR};
