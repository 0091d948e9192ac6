//! Broker-native access control bindings

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::AcePatternType;

/// Principal prefix used by the broker for user principals.
pub const USER_PRINCIPAL_PREFIX: &str = "User:";

/// Principal of public grants.
pub const WILDCARD_PRINCIPAL: &str = "User:*";

pub const WILDCARD_HOST: &str = "*";

/// Broker resource types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    Topic,
    Group,
    Cluster,
    TransactionalId,
    DelegationToken,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceType::Topic => "TOPIC",
            ResourceType::Group => "GROUP",
            ResourceType::Cluster => "CLUSTER",
            ResourceType::TransactionalId => "TRANSACTIONAL_ID",
            ResourceType::DelegationToken => "DELEGATION_TOKEN",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternType {
    Literal,
    Prefixed,
}

impl From<AcePatternType> for PatternType {
    fn from(pattern: AcePatternType) -> Self {
        match pattern {
            AcePatternType::Literal => PatternType::Literal,
            AcePatternType::Prefixed => PatternType::Prefixed,
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternType::Literal => f.write_str("LITERAL"),
            PatternType::Prefixed => f.write_str("PREFIXED"),
        }
    }
}

/// Atomic broker operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AclOperation {
    All,
    Read,
    Write,
    Create,
    Delete,
    Alter,
    Describe,
    ClusterAction,
    DescribeConfigs,
    AlterConfigs,
    IdempotentWrite,
}

impl fmt::Display for AclOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AclOperation::All => "ALL",
            AclOperation::Read => "READ",
            AclOperation::Write => "WRITE",
            AclOperation::Create => "CREATE",
            AclOperation::Delete => "DELETE",
            AclOperation::Alter => "ALTER",
            AclOperation::Describe => "DESCRIBE",
            AclOperation::ClusterAction => "CLUSTER_ACTION",
            AclOperation::DescribeConfigs => "DESCRIBE_CONFIGS",
            AclOperation::AlterConfigs => "ALTER_CONFIGS",
            AclOperation::IdempotentWrite => "IDEMPOTENT_WRITE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AclPermissionType {
    Allow,
    Deny,
}

impl fmt::Display for AclPermissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AclPermissionType::Allow => f.write_str("ALLOW"),
            AclPermissionType::Deny => f.write_str("DENY"),
        }
    }
}

/// One broker ACL. Equality over every field is the unit of diffing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AclBinding {
    pub resource_type: ResourceType,
    pub resource_name: String,
    pub pattern_type: PatternType,
    pub principal: String,
    pub host: String,
    pub operation: AclOperation,
    pub permission_type: AclPermissionType,
}

impl AclBinding {
    /// An ALLOW binding from any host.
    pub fn allow(
        resource_type: ResourceType,
        resource_name: impl Into<String>,
        pattern_type: PatternType,
        principal: impl Into<String>,
        operation: AclOperation,
    ) -> Self {
        Self {
            resource_type,
            resource_name: resource_name.into(),
            pattern_type,
            principal: principal.into(),
            host: WILDCARD_HOST.to_string(),
            operation,
            permission_type: AclPermissionType::Allow,
        }
    }

    /// Filter matching exactly this binding.
    pub fn to_filter(&self) -> AclBindingFilter {
        AclBindingFilter {
            resource_type: Some(self.resource_type),
            resource_name: Some(self.resource_name.clone()),
            pattern_type: Some(self.pattern_type),
            principal: Some(self.principal.clone()),
            host: Some(self.host.clone()),
            operation: Some(self.operation),
            permission_type: Some(self.permission_type),
        }
    }
}

impl fmt::Display for AclBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(pattern=ResourcePattern(resourceType={}, name={}, patternType={}), entry=(principal={}, host={}, operation={}, permissionType={}))",
            self.resource_type,
            self.resource_name,
            self.pattern_type,
            self.principal,
            self.host,
            self.operation,
            self.permission_type
        )
    }
}

/// Broker-side binding filter; `None` matches any value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AclBindingFilter {
    pub resource_type: Option<ResourceType>,
    pub resource_name: Option<String>,
    pub pattern_type: Option<PatternType>,
    pub principal: Option<String>,
    pub host: Option<String>,
    pub operation: Option<AclOperation>,
    pub permission_type: Option<AclPermissionType>,
}

impl AclBindingFilter {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn matches(&self, binding: &AclBinding) -> bool {
        self.resource_type.map_or(true, |t| t == binding.resource_type)
            && self
                .resource_name
                .as_ref()
                .map_or(true, |n| *n == binding.resource_name)
            && self.pattern_type.map_or(true, |p| p == binding.pattern_type)
            && self
                .principal
                .as_ref()
                .map_or(true, |p| *p == binding.principal)
            && self.host.as_ref().map_or(true, |h| *h == binding.host)
            && self.operation.map_or(true, |o| o == binding.operation)
            && self
                .permission_type
                .map_or(true, |p| p == binding.permission_type)
    }
}

impl fmt::Display for AclBindingFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn show<T: fmt::Display>(value: &Option<T>) -> String {
            value.as_ref().map_or_else(|| "ANY".to_string(), |v| v.to_string())
        }
        write!(
            f,
            "(patternFilter=(resourceType={}, name={}, patternType={}), entryFilter=(principal={}, host={}, operation={}, permissionType={}))",
            show(&self.resource_type),
            show(&self.resource_name),
            show(&self.pattern_type),
            show(&self.principal),
            show(&self.host),
            show(&self.operation),
            show(&self.permission_type)
        )
    }
}

/// Wire code the admin protocol uses for "match any value" in filters.
pub const ANY_CODE: i8 = 1;

impl ResourceType {
    pub fn code(&self) -> i8 {
        match self {
            ResourceType::Topic => 2,
            ResourceType::Group => 3,
            ResourceType::Cluster => 4,
            ResourceType::TransactionalId => 5,
            ResourceType::DelegationToken => 6,
        }
    }

    pub fn from_code(code: i8) -> Option<Self> {
        match code {
            2 => Some(ResourceType::Topic),
            3 => Some(ResourceType::Group),
            4 => Some(ResourceType::Cluster),
            5 => Some(ResourceType::TransactionalId),
            6 => Some(ResourceType::DelegationToken),
            _ => None,
        }
    }
}

impl PatternType {
    pub fn code(&self) -> i8 {
        match self {
            PatternType::Literal => 3,
            PatternType::Prefixed => 4,
        }
    }

    pub fn from_code(code: i8) -> Option<Self> {
        match code {
            3 => Some(PatternType::Literal),
            4 => Some(PatternType::Prefixed),
            _ => None,
        }
    }
}

impl AclOperation {
    pub fn code(&self) -> i8 {
        match self {
            AclOperation::All => 2,
            AclOperation::Read => 3,
            AclOperation::Write => 4,
            AclOperation::Create => 5,
            AclOperation::Delete => 6,
            AclOperation::Alter => 7,
            AclOperation::Describe => 8,
            AclOperation::ClusterAction => 9,
            AclOperation::DescribeConfigs => 10,
            AclOperation::AlterConfigs => 11,
            AclOperation::IdempotentWrite => 12,
        }
    }

    pub fn from_code(code: i8) -> Option<Self> {
        match code {
            2 => Some(AclOperation::All),
            3 => Some(AclOperation::Read),
            4 => Some(AclOperation::Write),
            5 => Some(AclOperation::Create),
            6 => Some(AclOperation::Delete),
            7 => Some(AclOperation::Alter),
            8 => Some(AclOperation::Describe),
            9 => Some(AclOperation::ClusterAction),
            10 => Some(AclOperation::DescribeConfigs),
            11 => Some(AclOperation::AlterConfigs),
            12 => Some(AclOperation::IdempotentWrite),
            _ => None,
        }
    }
}

impl AclPermissionType {
    pub fn code(&self) -> i8 {
        match self {
            AclPermissionType::Deny => 2,
            AclPermissionType::Allow => 3,
        }
    }

    pub fn from_code(code: i8) -> Option<Self> {
        match code {
            2 => Some(AclPermissionType::Deny),
            3 => Some(AclPermissionType::Allow),
            _ => None,
        }
    }
}

/// `User:<name>` for a broker user name.
pub fn user_principal(kafka_user: &str) -> String {
    format!("{}{}", USER_PRINCIPAL_PREFIX, kafka_user)
}
