//! Error types for the graph cache
//!
//! Provides structured error types for registry access, graph refresh,
//! topic subscriptions, service resolution and schema lookup.

use thiserror::Error;

/// Unified error type for the graph cache
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Registry Errors
    // =========================================================================
    #[error("Master unavailable: {reason}")]
    MasterUnavailable { reason: String },

    #[error("Master rejected {method}: {message} (code {code})")]
    MasterRejected {
        method: String,
        code: i64,
        message: String,
    },

    #[error("Participant lookup failed: {participant} - {reason}")]
    LookupFailed { participant: String, reason: String },

    #[error("Address resolution failed for {failed} of {total} participants")]
    ResolutionPartialFailure { failed: usize, total: usize },

    // =========================================================================
    // Session Errors
    // =========================================================================
    #[error("Not connected to master")]
    NotConnected,

    #[error("Session already attached")]
    AlreadyConnected,

    #[error("Refresh scheduler already running")]
    SchedulerRunning,

    // =========================================================================
    // Subscription Errors
    // =========================================================================
    #[error("Unknown topic: {topic}")]
    UnknownTopic { topic: String },

    #[error("Subscription failed for topic {topic}: {reason}")]
    SubscriptionFailed { topic: String, reason: String },

    // =========================================================================
    // Service Errors
    // =========================================================================
    #[error("Unknown service: {service}")]
    UnknownService { service: String },

    #[error("Service {service} is unresolvable: {reason}")]
    Unresolvable { service: String, reason: String },

    #[error("Service call failed: {service} - {reason}")]
    ServiceCallFailed { service: String, reason: String },

    // =========================================================================
    // Schema Errors
    // =========================================================================
    #[error("Invalid type name: {type_name}")]
    InvalidTypeName { type_name: String },

    #[error("Unknown type: {type_name}")]
    UnknownType { type_name: String },

    #[error("Invalid definition for {type_name}: {reason}")]
    SchemaDefinition { type_name: String, reason: String },

    #[error("Type {type_name} nests too deeply")]
    SchemaRecursion { type_name: String },

    // =========================================================================
    // Transport / Protocol Errors
    // =========================================================================
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid node address: {0}")]
    InvalidAddress(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::MasterUnavailable { .. } | Error::Http(_) | Error::Transport(_)
        )
    }

    /// Check if this error is retryable
    ///
    /// Unknown names and bad input are surfaced to the caller as-is; asking
    /// again without something changing in the graph gives the same answer.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::UnknownTopic { .. }
            | Error::UnknownService { .. }
            | Error::Configuration(_)
            | Error::InvalidTypeName { .. }
            | Error::UnknownType { .. }
            | Error::InvalidAddress(_)
            | Error::SchemaDefinition { .. }
            | Error::SchemaRecursion { .. }
            | Error::AlreadyConnected
            | Error::SchedulerRunning => false,
            _ => true,
        }
    }

    /// Fold a registry-call failure into `MasterUnavailable`
    ///
    /// `NotConnected` passes through unchanged.
    pub fn into_unavailable(self) -> Error {
        match self {
            Error::MasterUnavailable { .. } | Error::NotConnected => self,
            other => Error::MasterUnavailable {
                reason: other.to_string(),
            },
        }
    }
}

/// Result type alias for the graph cache
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_error_retryable() {
        let outage = Error::MasterUnavailable {
            reason: "connection refused".into(),
        };
        assert!(outage.is_retryable());
        assert!(outage.is_transient());

        let unknown = Error::UnknownTopic {
            topic: "/nonexistent".into(),
        };
        assert!(!unknown.is_retryable());
        assert!(!unknown.is_transient());

        let partial = Error::ResolutionPartialFailure { failed: 1, total: 3 };
        assert!(partial.is_retryable());
        assert!(!partial.is_transient());
    }

    #[test]
    fn test_into_unavailable() {
        let err = Error::MasterRejected {
            method: "getSystemState".into(),
            code: -1,
            message: "boom".into(),
        }
        .into_unavailable();
        assert_matches!(err, Error::MasterUnavailable { reason } if reason.contains("boom"));

        assert_matches!(Error::NotConnected.into_unavailable(), Error::NotConnected);
    }

    #[test]
    fn test_error_display() {
        let err = Error::Unresolvable {
            service: "/add_two_ints".into(),
            reason: "no provider".into(),
        };
        assert_eq!(
            err.to_string(),
            "Service /add_two_ints is unresolvable: no provider"
        );
    }
}
