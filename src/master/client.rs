//! ROS master adapter
//!
//! Implements [`MasterApi`] against the master's XML-RPC endpoint.

use super::xmlrpc::{decode_response, encode_call, XmlRpcValue};
use crate::domain::ports::{MasterApi, NodeAddress, ParticipantId, PublishedTopic, SystemState};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, trace};

/// Status code of a successful master call
const STATUS_SUCCESS: i64 = 1;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct XmlRpcMasterConfig {
    /// Master endpoint, as in `ROS_MASTER_URI`
    pub master_uri: String,
    /// Caller id sent with every request
    pub caller_id: String,
    /// HTTP request timeout
    pub request_timeout: Duration,
}

impl Default for XmlRpcMasterConfig {
    fn default() -> Self {
        Self {
            master_uri: "http://localhost:11311/".to_string(),
            caller_id: "/rosgraph_cache".to_string(),
            request_timeout: Duration::from_secs(3),
        }
    }
}

// =============================================================================
// XML-RPC Master
// =============================================================================

#[derive(Debug)]
pub struct XmlRpcMaster {
    config: XmlRpcMasterConfig,
    http: reqwest::Client,
}

impl XmlRpcMaster {
    pub fn new(config: XmlRpcMasterConfig) -> Result<Self> {
        NodeAddress::parse_uri(&config.master_uri).map_err(|e| {
            Error::Configuration(format!("invalid master URI '{}': {}", config.master_uri, e))
        })?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { config, http })
    }

    pub fn master_uri(&self) -> &str {
        &self.config.master_uri
    }

    /// Issue `method` and return the value of its `[code, status, value]` triple
    async fn call(&self, method: &str, params: &[&str]) -> Result<XmlRpcValue> {
        trace!(method, "Calling master");
        let response = self
            .http
            .post(&self.config.master_uri)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(encode_call(method, params))
            .send()
            .await
            .map_err(|e| Error::MasterUnavailable {
                reason: format!("{}: {}", method, e),
            })?;

        if !response.status().is_success() {
            return Err(Error::MasterUnavailable {
                reason: format!("{}: HTTP {}", method, response.status()),
            });
        }

        let body = response.text().await.map_err(|e| Error::MasterUnavailable {
            reason: format!("{}: {}", method, e),
        })?;
        let value = decode_response(&body)?;
        into_status_value(method, value)
    }
}

#[async_trait]
impl MasterApi for XmlRpcMaster {
    async fn system_state(&self) -> Result<SystemState> {
        let value = self
            .call("getSystemState", &[&self.config.caller_id])
            .await?;
        let state = parse_system_state(&value)?;
        debug!(
            publishers = state.publishers.len(),
            subscribers = state.subscribers.len(),
            services = state.services.len(),
            "Fetched system state"
        );
        Ok(state)
    }

    async fn lookup_node(&self, caller_id: &str, participant: &ParticipantId) -> Result<NodeAddress> {
        let value = self
            .call("lookupNode", &[caller_id, participant.as_str()])
            .await
            .map_err(|e| match e {
                Error::MasterRejected { message, .. } => Error::LookupFailed {
                    participant: participant.to_string(),
                    reason: message,
                },
                other => other,
            })?;
        let uri = value.expect_str("lookupNode")?;
        NodeAddress::parse_uri(uri)
    }

    async fn published_topics(&self) -> Result<Vec<PublishedTopic>> {
        let value = self
            .call("getPublishedTopics", &[&self.config.caller_id, ""])
            .await?;
        parse_published_topics(&value)
    }
}

// =============================================================================
// Response Parsing
// =============================================================================

/// Unpack `[code, status, value]`, failing unless `code` is success
fn into_status_value(method: &str, value: XmlRpcValue) -> Result<XmlRpcValue> {
    let XmlRpcValue::Array(mut triple) = value else {
        return Err(Error::Protocol(format!("{}: expected [code, status, value]", method)));
    };
    if triple.len() != 3 {
        return Err(Error::Protocol(format!(
            "{}: expected 3 elements, got {}",
            method,
            triple.len()
        )));
    }

    let code = triple[0]
        .as_i64()
        .ok_or_else(|| Error::Protocol(format!("{}: status code is not an int", method)))?;
    if code != STATUS_SUCCESS {
        return Err(Error::MasterRejected {
            method: method.to_string(),
            code,
            message: triple[1].as_str().unwrap_or_default().to_string(),
        });
    }

    Ok(triple.swap_remove(2))
}

/// `[[name, [participant, ...]], ...]` into a role map
fn parse_role_list(value: &XmlRpcValue, what: &str) -> Result<BTreeMap<String, Vec<String>>> {
    let mut roles = BTreeMap::new();
    for entry in value.expect_array(what)? {
        let pair = entry.expect_array(what)?;
        let [name, participants] = pair else {
            return Err(Error::Protocol(format!("{}: expected [name, participants]", what)));
        };
        let participants = participants
            .expect_array(what)?
            .iter()
            .map(|p| p.expect_str(what).map(str::to_string))
            .collect::<Result<Vec<_>>>()?;
        roles.insert(name.expect_str(what)?.to_string(), participants);
    }
    Ok(roles)
}

fn parse_system_state(value: &XmlRpcValue) -> Result<SystemState> {
    let [publishers, subscribers, services] = value.expect_array("getSystemState")? else {
        return Err(Error::Protocol(
            "getSystemState: expected [publishers, subscribers, services]".to_string(),
        ));
    };

    Ok(SystemState {
        publishers: parse_role_list(publishers, "publishers")?,
        subscribers: parse_role_list(subscribers, "subscribers")?,
        services: parse_role_list(services, "services")?,
    })
}

fn parse_published_topics(value: &XmlRpcValue) -> Result<Vec<PublishedTopic>> {
    value
        .expect_array("getPublishedTopics")?
        .iter()
        .map(|entry| match entry.expect_array("getPublishedTopics")? {
            [name, message_type] => Ok(PublishedTopic::new(
                name.expect_str("topic name")?,
                message_type.expect_str("topic type")?,
            )),
            _ => Err(Error::Protocol(
                "getPublishedTopics: expected [name, type]".to_string(),
            )),
        })
        .collect()
}
