//! Domain layer - Core types and port definitions
//!
//! This module defines the traits (ports) the middleware adapters implement,
//! following hexagonal architecture principles.

pub mod ports;

pub use ports::*;
