//! Service Resolution
//!
//! Turns a service name into a callable client, and a client into a
//! description of the request it expects.

use crate::domain::ports::{SchemaRegistryRef, ServiceClient, TransportRef};
use crate::error::{Error, Result};
use crate::schema::{default_template, split_type_name};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// A client bound to one service and its declared type
#[derive(Clone)]
pub struct ServiceClientHandle {
    client: Arc<dyn ServiceClient>,
}

impl ServiceClientHandle {
    pub fn new(client: Arc<dyn ServiceClient>) -> Self {
        Self { client }
    }

    pub fn service_name(&self) -> &str {
        self.client.service_name()
    }

    /// `package/Type` of the service
    pub fn service_type(&self) -> &str {
        self.client.service_type()
    }

    pub async fn call(&self, request: Value) -> Result<Value> {
        self.client
            .call(request)
            .await
            .map_err(|e| Error::ServiceCallFailed {
                service: self.service_name().to_string(),
                reason: e.to_string(),
            })
    }
}

impl fmt::Debug for ServiceClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceClientHandle")
            .field("service", &self.service_name())
            .field("type", &self.service_type())
            .finish()
    }
}

pub struct ServiceResolver {
    transport: TransportRef,
    schemas: SchemaRegistryRef,
    call_timeout: Duration,
}

impl ServiceResolver {
    pub fn new(transport: TransportRef, schemas: SchemaRegistryRef, call_timeout: Duration) -> Self {
        Self {
            transport,
            schemas,
            call_timeout,
        }
    }

    /// Learn the service's type from its provider and build a client for it
    pub async fn get_service_client(&self, service: &str) -> Result<ServiceClientHandle> {
        let unresolvable = |reason: String| Error::Unresolvable {
            service: service.to_string(),
            reason,
        };

        let header = tokio::time::timeout(
            self.call_timeout,
            self.transport.service_type_header(service),
        )
        .await
        .map_err(|_| {
            unresolvable(format!(
                "type header timed out after {}ms",
                self.call_timeout.as_millis()
            ))
        })?
        .map_err(|e| unresolvable(e.to_string()))?;

        let client = self
            .transport
            .create_service_client(service, &header.service_type)
            .await
            .map_err(|e| unresolvable(e.to_string()))?;

        debug!(service, service_type = %header.service_type, "Resolved service client");
        Ok(ServiceClientHandle::new(client))
    }

    /// Definition text and default-valued JSON template of the request
    ///
    /// Returns the template; both are also logged.
    pub fn describe_request_shape(&self, handle: &ServiceClientHandle) -> Result<String> {
        let service_type = handle.service_type();
        split_type_name(service_type)?;

        let descriptor = self.schemas.resolve_service(service_type)?;
        let template = default_template(&descriptor.request, self.schemas.as_ref())?;
        let template = serde_json::to_string(&template)?;

        info!(
            service = handle.service_name(),
            service_type,
            definition = %descriptor.request.definition,
            template = %template,
            "Request shape"
        );
        Ok(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaCatalog;
    use crate::testing::{EchoServiceClient, FakeTransport};
    use assert_matches::assert_matches;
    use serde_json::json;

    fn resolver(transport: Arc<FakeTransport>) -> ServiceResolver {
        let catalog = SchemaCatalog::new();
        catalog
            .register_service("rospy_tutorials/AddTwoInts", "int64 a\nint64 b\n---\nint64 sum\n")
            .unwrap();
        ServiceResolver::new(transport, Arc::new(catalog), Duration::from_secs(3))
    }

    #[tokio::test]
    async fn test_get_service_client() {
        let transport = FakeTransport::new();
        transport.advertise_service("/add_two_ints", "rospy_tutorials/AddTwoInts");
        let resolver = resolver(transport);

        let handle = resolver.get_service_client("/add_two_ints").await.unwrap();
        assert_eq!(handle.service_name(), "/add_two_ints");
        assert_eq!(handle.service_type(), "rospy_tutorials/AddTwoInts");

        let response = handle.call(json!({"a": 1, "b": 2})).await.unwrap();
        assert_eq!(response, json!({"echo": {"a": 1, "b": 2}}));
    }

    #[tokio::test]
    async fn test_unresolvable_service() {
        let resolver = resolver(FakeTransport::new());

        let err = resolver.get_service_client("/missing").await.unwrap_err();
        assert_matches!(err, Error::Unresolvable { service, .. } if service == "/missing");
    }

    #[tokio::test]
    async fn test_describe_request_shape() {
        let transport = FakeTransport::new();
        transport.advertise_service("/add_two_ints", "rospy_tutorials/AddTwoInts");
        let resolver = resolver(transport);
        let handle = resolver.get_service_client("/add_two_ints").await.unwrap();

        let template = resolver.describe_request_shape(&handle).unwrap();
        assert_eq!(template, r#"{"a":0,"b":0}"#);
    }

    #[test]
    fn test_describe_invalid_and_unknown_types() {
        let resolver = resolver(FakeTransport::new());

        let bad = ServiceClientHandle::new(Arc::new(EchoServiceClient::new("/svc", "NoPackage")));
        assert_matches!(
            resolver.describe_request_shape(&bad),
            Err(Error::InvalidTypeName { .. })
        );

        let unknown =
            ServiceClientHandle::new(Arc::new(EchoServiceClient::new("/svc", "std_srvs/Empty")));
        assert_matches!(
            resolver.describe_request_shape(&unknown),
            Err(Error::UnknownType { .. })
        );
    }
}
