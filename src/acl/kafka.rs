//! Kafka admin protocol transport for ACL administration.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use kafka_protocol::messages::create_acls_request::AclCreation;
use kafka_protocol::messages::delete_acls_request::DeleteAclsFilter;
use kafka_protocol::messages::delete_acls_response::DeleteAclsMatchingAcl;
use kafka_protocol::messages::describe_acls_response::{AclDescription, DescribeAclsResource};
use kafka_protocol::messages::{
    CreateAclsRequest, DeleteAclsRequest, DescribeAclsRequest, RequestHeader, ResponseHeader,
};
use kafka_protocol::protocol::{Decodable, Encodable, HeaderVersion, Request, StrBytes};
use std::sync::atomic::{AtomicI32, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::acl::admin::{BrokerAdmin, CreateOutcome, DeleteOutcome};
use crate::acl::binding::{
    AclBinding, AclBindingFilter, AclOperation, AclPermissionType, PatternType, ResourceType, ANY_CODE,
};
use crate::error::NsPlaneError;
use crate::Result;

/// DescribeAcls, CreateAcls and DeleteAcls version 1: the first with
/// pattern types, supported by every broker since 2.0.
pub const ACL_API_VERSION: i16 = 1;

pub const DEFAULT_CLIENT_ID: &str = "nsplane-controller";

const MAX_RESPONSE_SIZE: usize = 64 * 1024 * 1024;

/// [`BrokerAdmin`] speaking the Kafka wire protocol to one cluster.
///
/// Holds a single connection to the first reachable bootstrap server and
/// reconnects after any transport error. Requests on one admin are serialized.
pub struct KafkaBrokerAdmin {
    cluster: String,
    bootstrap_servers: Vec<String>,
    client_id: String,
    connection: Mutex<Option<TcpStream>>,
    correlation_id: AtomicI32,
}

impl KafkaBrokerAdmin {
    /// `bootstrap_servers` is a comma-separated `host:port` list.
    pub fn new(cluster: impl Into<String>, bootstrap_servers: &str) -> Result<Self> {
        let cluster = cluster.into();
        let servers: Vec<String> = bootstrap_servers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if servers.is_empty() {
            return Err(NsPlaneError::InvalidConfig(format!(
                "clusters.{}.bootstrap_servers cannot be empty",
                cluster
            )));
        }

        Ok(Self {
            cluster,
            bootstrap_servers: servers,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            connection: Mutex::new(None),
            correlation_id: AtomicI32::new(0),
        })
    }

    fn unavailable(&self, message: impl Into<String>) -> NsPlaneError {
        NsPlaneError::BrokerUnavailable {
            cluster: self.cluster.clone(),
            message: message.into(),
        }
    }

    async fn connect(&self) -> Result<TcpStream> {
        let mut last_error = None;
        for server in &self.bootstrap_servers {
            match TcpStream::connect(server.as_str()).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!("Connected to {} for cluster {}", server, self.cluster);
                    return Ok(stream);
                }
                Err(e) => {
                    warn!("Cannot reach {} for cluster {}: {}", server, self.cluster, e);
                    last_error = Some(format!("{}: {}", server, e));
                }
            }
        }
        Err(self.unavailable(last_error.unwrap_or_else(|| "no bootstrap server".to_string())))
    }

    /// Sends one request and waits for its response. The connection goes back
    /// into the slot only after a complete response; otherwise it is dropped.
    async fn send<R: Request>(&self, request: &R) -> Result<R::Response> {
        let mut slot = self.connection.lock().await;
        let mut stream = match slot.take() {
            Some(stream) => stream,
            None => self.connect().await?,
        };

        let correlation_id = self.correlation_id.fetch_add(1, Ordering::Relaxed);
        let frame = self.encode_request(request, correlation_id)?;
        let response = self.exchange::<R>(&mut stream, &frame, correlation_id).await?;

        *slot = Some(stream);
        Ok(response)
    }

    fn encode_request<R: Request>(&self, request: &R, correlation_id: i32) -> Result<Bytes> {
        let header = RequestHeader::default()
            .with_request_api_key(R::KEY)
            .with_request_api_version(ACL_API_VERSION)
            .with_correlation_id(correlation_id)
            .with_client_id(Some(StrBytes::from_string(self.client_id.clone())));

        let mut buf = BytesMut::new();
        header
            .encode(&mut buf, R::header_version(ACL_API_VERSION))
            .map_err(|e| self.unavailable(format!("cannot encode request header: {}", e)))?;
        request
            .encode(&mut buf, ACL_API_VERSION)
            .map_err(|e| self.unavailable(format!("cannot encode request: {}", e)))?;
        Ok(buf.freeze())
    }

    async fn exchange<R: Request>(
        &self,
        stream: &mut TcpStream,
        frame: &[u8],
        correlation_id: i32,
    ) -> Result<R::Response> {
        let io_error = |e: std::io::Error| self.unavailable(e.to_string());

        stream.write_i32(frame.len() as i32).await.map_err(io_error)?;
        stream.write_all(frame).await.map_err(io_error)?;
        stream.flush().await.map_err(io_error)?;

        let len = stream.read_i32().await.map_err(io_error)?;
        if len < 0 || len as usize > MAX_RESPONSE_SIZE {
            return Err(self.unavailable(format!("invalid response size {}", len)));
        }
        let mut payload = vec![0u8; len as usize];
        stream.read_exact(&mut payload).await.map_err(io_error)?;
        let mut payload = Bytes::from(payload);

        let header_version = <R::Response as HeaderVersion>::header_version(ACL_API_VERSION);
        let header = ResponseHeader::decode(&mut payload, header_version)
            .map_err(|e| self.unavailable(format!("cannot decode response header: {}", e)))?;
        if header.correlation_id != correlation_id {
            return Err(self.unavailable(format!(
                "correlation id mismatch: sent {}, received {}",
                correlation_id, header.correlation_id
            )));
        }

        trace!("Response {} from cluster {}", correlation_id, self.cluster);
        <R::Response as Decodable>::decode(&mut payload, ACL_API_VERSION)
            .map_err(|e| self.unavailable(format!("cannot decode response: {}", e)))
    }
}

fn str_bytes(value: &str) -> StrBytes {
    StrBytes::from_string(value.to_string())
}

fn broker_error(code: i16, message: Option<&StrBytes>) -> String {
    match message {
        Some(message) => format!("error code {}: {}", code, message.as_str()),
        None => format!("error code {}", code),
    }
}

fn describe_request(filter: &AclBindingFilter) -> DescribeAclsRequest {
    DescribeAclsRequest::default()
        .with_resource_type_filter(filter.resource_type.map_or(ANY_CODE, |t| t.code()))
        .with_resource_name_filter(filter.resource_name.as_deref().map(str_bytes))
        .with_pattern_type_filter(filter.pattern_type.map_or(ANY_CODE, |p| p.code()))
        .with_principal_filter(filter.principal.as_deref().map(str_bytes))
        .with_host_filter(filter.host.as_deref().map(str_bytes))
        .with_operation(filter.operation.map_or(ANY_CODE, |o| o.code()))
        .with_permission_type(filter.permission_type.map_or(ANY_CODE, |p| p.code()))
}

fn delete_filter(filter: &AclBindingFilter) -> DeleteAclsFilter {
    DeleteAclsFilter::default()
        .with_resource_type_filter(filter.resource_type.map_or(ANY_CODE, |t| t.code()))
        .with_resource_name_filter(filter.resource_name.as_deref().map(str_bytes))
        .with_pattern_type_filter(filter.pattern_type.map_or(ANY_CODE, |p| p.code()))
        .with_principal_filter(filter.principal.as_deref().map(str_bytes))
        .with_host_filter(filter.host.as_deref().map(str_bytes))
        .with_operation(filter.operation.map_or(ANY_CODE, |o| o.code()))
        .with_permission_type(filter.permission_type.map_or(ANY_CODE, |p| p.code()))
}

fn acl_creation(binding: &AclBinding) -> AclCreation {
    AclCreation::default()
        .with_resource_type(binding.resource_type.code())
        .with_resource_name(str_bytes(&binding.resource_name))
        .with_resource_pattern_type(binding.pattern_type.code())
        .with_principal(str_bytes(&binding.principal))
        .with_host(str_bytes(&binding.host))
        .with_operation(binding.operation.code())
        .with_permission_type(binding.permission_type.code())
}

/// Bindings of a described resource. Entries with codes outside the
/// supported set are skipped.
fn described_bindings(resource: &DescribeAclsResource) -> Vec<AclBinding> {
    let (Some(resource_type), Some(pattern_type)) = (
        ResourceType::from_code(resource.resource_type),
        PatternType::from_code(resource.pattern_type),
    ) else {
        debug!(
            "Skipping ACLs on unsupported resource type {} / pattern {}",
            resource.resource_type, resource.pattern_type
        );
        return Vec::new();
    };

    resource
        .acls
        .iter()
        .filter_map(|acl: &AclDescription| {
            Some(AclBinding {
                resource_type,
                resource_name: resource.resource_name.as_str().to_string(),
                pattern_type,
                principal: acl.principal.as_str().to_string(),
                host: acl.host.as_str().to_string(),
                operation: AclOperation::from_code(acl.operation)?,
                permission_type: AclPermissionType::from_code(acl.permission_type)?,
            })
        })
        .collect()
}

fn matching_binding(acl: &DeleteAclsMatchingAcl) -> Option<AclBinding> {
    Some(AclBinding {
        resource_type: ResourceType::from_code(acl.resource_type)?,
        resource_name: acl.resource_name.as_str().to_string(),
        pattern_type: PatternType::from_code(acl.pattern_type)?,
        principal: acl.principal.as_str().to_string(),
        host: acl.host.as_str().to_string(),
        operation: AclOperation::from_code(acl.operation)?,
        permission_type: AclPermissionType::from_code(acl.permission_type)?,
    })
}

#[async_trait]
impl BrokerAdmin for KafkaBrokerAdmin {
    async fn describe_acls(&self, filter: &AclBindingFilter) -> Result<Vec<AclBinding>> {
        let response = self.send(&describe_request(filter)).await?;
        if response.error_code != 0 {
            return Err(self.unavailable(format!(
                "DescribeAcls rejected: {}",
                broker_error(response.error_code, response.error_message.as_ref())
            )));
        }

        Ok(response.resources.iter().flat_map(described_bindings).collect())
    }

    async fn create_acls(&self, bindings: Vec<AclBinding>) -> Result<Vec<CreateOutcome>> {
        if bindings.is_empty() {
            return Ok(Vec::new());
        }

        let request = CreateAclsRequest::default().with_creations(bindings.iter().map(acl_creation).collect());
        let response = self.send(&request).await?;

        let mut results = response.results.into_iter();
        Ok(bindings
            .into_iter()
            .map(|binding| {
                let outcome = match results.next() {
                    Some(result) if result.error_code == 0 => Ok(()),
                    Some(result) => Err(NsPlaneError::BindingOperation {
                        binding: binding.to_string(),
                        message: broker_error(result.error_code, result.error_message.as_ref()),
                    }),
                    None => Err(NsPlaneError::BindingOperation {
                        binding: binding.to_string(),
                        message: "no result returned by the broker".to_string(),
                    }),
                };
                (binding, outcome)
            })
            .collect())
    }

    async fn delete_acls(&self, filters: Vec<AclBindingFilter>) -> Result<Vec<DeleteOutcome>> {
        if filters.is_empty() {
            return Ok(Vec::new());
        }

        let request = DeleteAclsRequest::default().with_filters(filters.iter().map(delete_filter).collect());
        let response = self.send(&request).await?;

        let mut results = response.filter_results.into_iter();
        Ok(filters
            .into_iter()
            .map(|filter| {
                let outcome = match results.next() {
                    Some(result) if result.error_code != 0 => Err(NsPlaneError::BindingOperation {
                        binding: filter.to_string(),
                        message: broker_error(result.error_code, result.error_message.as_ref()),
                    }),
                    Some(result) => match result.matching_acls.iter().find(|acl| acl.error_code != 0) {
                        Some(failed) => Err(NsPlaneError::BindingOperation {
                            binding: filter.to_string(),
                            message: broker_error(failed.error_code, failed.error_message.as_ref()),
                        }),
                        None => Ok(result.matching_acls.iter().filter_map(matching_binding).collect()),
                    },
                    None => Err(NsPlaneError::BindingOperation {
                        binding: filter.to_string(),
                        message: "no result returned by the broker".to_string(),
                    }),
                };
                (filter, outcome)
            })
            .collect())
    }
}
