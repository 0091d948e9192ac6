use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type ClusterName = String;
pub type NamespaceName = String;
pub type Offset = u64;

/// `grantedTo` value of a public grant.
pub const PUBLIC_GRANTED_TO: &str = "*";

/// Shared envelope carried by every stored resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub name: String,
    #[serde(default)]
    pub namespace: NamespaceName,
    #[serde(default)]
    pub cluster: ClusterName,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl Metadata {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        cluster: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            cluster: cluster.into(),
            labels: BTreeMap::new(),
            creation_timestamp: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Namespace,
    AccessControlEntry,
    KafkaStream,
    Connector,
    RoleBinding,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Namespace => "Namespace",
            ResourceKind::AccessControlEntry => "AccessControlEntry",
            ResourceKind::KafkaStream => "KafkaStream",
            ResourceKind::Connector => "Connector",
            ResourceKind::RoleBinding => "RoleBinding",
        };
        f.write_str(name)
    }
}

impl ResourceKind {
    /// Name of the resource log holding this kind, below the configured prefix.
    pub fn log_suffix(&self) -> &'static str {
        match self {
            ResourceKind::Namespace => "namespaces",
            ResourceKind::AccessControlEntry => "access-control-entries",
            ResourceKind::KafkaStream => "streams",
            ResourceKind::Connector => "connectors",
            ResourceKind::RoleBinding => "role-bindings",
        }
    }
}

/// Access to the metadata envelope and the stable store key of a resource.
pub trait MetadataResource {
    const KIND: ResourceKind;

    fn metadata(&self) -> &Metadata;

    /// Composite `namespace/name` key used in the resource log.
    fn store_key(&self) -> String {
        let metadata = self.metadata();
        format!("{}/{}", metadata.namespace, metadata.name)
    }
}

macro_rules! metadata_resource {
    ($ty:ty, $kind:expr) => {
        impl MetadataResource for $ty {
            const KIND: ResourceKind = $kind;

            fn metadata(&self) -> &Metadata {
                &self.metadata
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    pub metadata: Metadata,
    pub spec: NamespaceSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSpec {
    /// Broker principal name, without the `User:` prefix
    pub kafka_user: String,
    #[serde(default)]
    pub connect_clusters: Vec<String>,
}

impl Namespace {
    pub fn new(name: impl Into<String>, cluster: impl Into<String>, kafka_user: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            metadata: Metadata::new(name.clone(), name, cluster),
            spec: NamespaceSpec {
                kafka_user: kafka_user.into(),
                connect_clusters: Vec::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn cluster(&self) -> &str {
        &self.metadata.cluster
    }

    pub fn kafka_user(&self) -> &str {
        &self.spec.kafka_user
    }
}

impl MetadataResource for Namespace {
    const KIND: ResourceKind = ResourceKind::Namespace;

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    // One namespace per name across the whole control plane.
    fn store_key(&self) -> String {
        self.metadata.name.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AceResourceType {
    Topic,
    Group,
    Connect,
    TransactionalId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcePatternType {
    Literal,
    Prefixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcePermission {
    Owner,
    Write,
    Read,
}

impl fmt::Display for AcePermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcePermission::Owner => f.write_str("OWNER"),
            AcePermission::Write => f.write_str("WRITE"),
            AcePermission::Read => f.write_str("READ"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessControlEntry {
    pub metadata: Metadata,
    pub spec: AccessControlEntrySpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessControlEntrySpec {
    pub resource_type: AceResourceType,
    pub resource: String,
    pub resource_pattern_type: AcePatternType,
    pub permission: AcePermission,
    /// Target namespace name, or `*` for a public grant
    pub granted_to: String,
}

impl AccessControlEntry {
    pub fn is_public(&self) -> bool {
        self.spec.granted_to == PUBLIC_GRANTED_TO
    }
}

metadata_resource!(AccessControlEntry, ResourceKind::AccessControlEntry);

/// A stream application; implies a fixed bundle of derived grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KafkaStream {
    pub metadata: Metadata,
}

impl KafkaStream {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            metadata: Metadata::new(name, namespace, cluster),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

metadata_resource!(KafkaStream, ResourceKind::KafkaStream);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connector {
    pub metadata: Metadata,
    pub spec: ConnectorSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorSpec {
    pub connect_cluster: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

metadata_resource!(Connector, ResourceKind::Connector);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
}

impl Verb {
    pub fn parse(method: &str) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Some(Verb::Get),
            "POST" => Some(Verb::Post),
            "PUT" => Some(Verb::Put),
            "DELETE" => Some(Verb::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleBinding {
    pub metadata: Metadata,
    pub spec: RoleBindingSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleBindingSpec {
    pub role: Role,
    pub subject: Subject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    /// Resource types such as `topics` or sub-resources such as `connectors/restart`
    pub resource_types: Vec<String>,
    pub verbs: Vec<Verb>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    #[serde(default = "default_subject_type")]
    pub subject_type: String,
    pub subject_name: String,
}

fn default_subject_type() -> String {
    "GROUP".to_string()
}

metadata_resource!(RoleBinding, ResourceKind::RoleBinding);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_keys() {
        let namespace = Namespace::new("ns1", "local", "user1");
        assert_eq!(namespace.store_key(), "ns1");

        let stream = KafkaStream::new("ns1-stream1", "ns1", "local");
        assert_eq!(stream.store_key(), "ns1/ns1-stream1");

        assert_eq!(KafkaStream::KIND.log_suffix(), "streams");
        assert_eq!(Namespace::KIND.to_string(), "Namespace");
    }

    #[test]
    fn test_ace_json_shape() {
        let json = r#"{
            "metadata": {"name": "ns1-acl", "namespace": "ns1", "cluster": "local"},
            "spec": {
                "resourceType": "TOPIC",
                "resource": "ns1-",
                "resourcePatternType": "PREFIXED",
                "permission": "OWNER",
                "grantedTo": "*"
            }
        }"#;

        let ace: AccessControlEntry = serde_json::from_str(json).unwrap();
        assert_eq!(ace.spec.resource_type, AceResourceType::Topic);
        assert_eq!(ace.spec.resource_pattern_type, AcePatternType::Prefixed);
        assert_eq!(ace.spec.permission, AcePermission::Owner);
        assert!(ace.is_public());
    }

    #[test]
    fn test_verb_parse() {
        assert_eq!(Verb::parse("get"), Some(Verb::Get));
        assert_eq!(Verb::parse("DELETE"), Some(Verb::Delete));
        assert_eq!(Verb::parse("PATCH"), None);
    }
}
