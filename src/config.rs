//! File configuration
//!
//! Every setting is optional in the YAML file. Values given on the command
//! line are layered on top with [`FileConfig::overlay`], and whatever is
//! still unset falls back to the library defaults.

use crate::api::ApiServerConfig;
use crate::error::{Error, Result};
use crate::graph::GraphCacheConfig;
use crate::master::XmlRpcMasterConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Master endpoint (`ROS_MASTER_URI`)
    pub master_uri: Option<String>,
    pub caller_id: Option<String>,
    pub refresh_interval_ms: Option<u64>,
    /// Bound on every master round trip
    pub call_timeout_ms: Option<u64>,
    pub lookup_concurrency: Option<usize>,
    pub event_channel_capacity: Option<usize>,
    pub api_addr: Option<String>,
}

/// Fully resolved settings for the binary
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache: GraphCacheConfig,
    pub master: XmlRpcMasterConfig,
    pub api: ApiServerConfig,
}

impl FileConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Take every value set in `overrides`, keep ours for the rest
    pub fn overlay(self, overrides: FileConfig) -> FileConfig {
        FileConfig {
            master_uri: overrides.master_uri.or(self.master_uri),
            caller_id: overrides.caller_id.or(self.caller_id),
            refresh_interval_ms: overrides.refresh_interval_ms.or(self.refresh_interval_ms),
            call_timeout_ms: overrides.call_timeout_ms.or(self.call_timeout_ms),
            lookup_concurrency: overrides.lookup_concurrency.or(self.lookup_concurrency),
            event_channel_capacity: overrides
                .event_channel_capacity
                .or(self.event_channel_capacity),
            api_addr: overrides.api_addr.or(self.api_addr),
        }
    }

    /// Fill unset values with defaults and validate the result
    pub fn resolve(self) -> Result<Settings> {
        let defaults = GraphCacheConfig::default();
        let master_defaults = XmlRpcMasterConfig::default();

        let caller_id = self.caller_id.unwrap_or(defaults.caller_id);
        let call_timeout = self
            .call_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.call_timeout);

        let cache = GraphCacheConfig {
            caller_id: caller_id.clone(),
            refresh_interval: self
                .refresh_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.refresh_interval),
            call_timeout,
            lookup_concurrency: self.lookup_concurrency.unwrap_or(defaults.lookup_concurrency),
            event_channel_capacity: self
                .event_channel_capacity
                .unwrap_or(defaults.event_channel_capacity),
        };
        cache.validate()?;

        let master = XmlRpcMasterConfig {
            master_uri: self.master_uri.unwrap_or(master_defaults.master_uri),
            caller_id,
            request_timeout: call_timeout,
        };

        let api = match self.api_addr {
            Some(addr) => ApiServerConfig {
                rest_addr: addr.parse::<SocketAddr>().map_err(|e| {
                    Error::Configuration(format!("invalid API address '{}': {}", addr, e))
                })?,
            },
            None => ApiServerConfig::default(),
        };

        Ok(Settings { cache, master, api })
    }
}
