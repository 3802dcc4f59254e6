//! Graph State Module
//!
//! The cached view of the computation graph: snapshots of topic and service
//! roles, the address directory derived from them, and the refresh loop
//! that keeps both current.

pub mod cache;
pub mod events;
pub mod metrics;
pub mod snapshot;

pub use cache::*;
pub use events::*;
pub use metrics::*;
pub use snapshot::*;
