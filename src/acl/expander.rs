//! Translation from coarse grants (OWNER / WRITE / READ) to atomic broker bindings.
//!
//! Every function here is pure: the same entry and namespace always yield the
//! same bindings in the same order.

use crate::acl::binding::{user_principal, AclBinding, AclOperation, PatternType, ResourceType};
use crate::error::NsPlaneError;
use crate::types::{AccessControlEntry, AcePermission, AceResourceType, KafkaStream, Namespace};
use crate::Result;

/// Consumer group prefix used by connect workers for sink connectors.
pub const CONNECT_GROUP_PREFIX: &str = "connect-";

/// Expands any entry granted to `namespace`.
///
/// TRANSACTIONAL_ID entries are not synchronized and expand to nothing.
pub fn expand_entry(entry: &AccessControlEntry, namespace: &Namespace) -> Result<Vec<AclBinding>> {
    match entry.spec.resource_type {
        AceResourceType::Topic | AceResourceType::Group => expand_acl(entry, namespace),
        AceResourceType::Connect => Ok(expand_connect(entry, namespace)),
        AceResourceType::TransactionalId => Ok(Vec::new()),
    }
}

/// Expands a TOPIC or GROUP entry.
///
/// Public entries (`grantedTo = "*"`) bind the wildcard principal instead of
/// the namespace user.
pub fn expand_acl(entry: &AccessControlEntry, namespace: &Namespace) -> Result<Vec<AclBinding>> {
    let resource_type = broker_resource_type(entry.spec.resource_type)?;
    let operations = match entry.spec.permission {
        AcePermission::Owner => owner_operations(resource_type)?,
        AcePermission::Write => vec![AclOperation::Write],
        AcePermission::Read => vec![AclOperation::Read],
    };

    let principal = if entry.is_public() {
        user_principal(&entry.spec.granted_to)
    } else {
        user_principal(namespace.kafka_user())
    };
    let pattern_type = PatternType::from(entry.spec.resource_pattern_type);

    Ok(operations
        .into_iter()
        .map(|operation| {
            AclBinding::allow(
                resource_type,
                entry.spec.resource.clone(),
                pattern_type,
                principal.clone(),
                operation,
            )
        })
        .collect())
}

/// Bindings a stream application needs: CREATE and DELETE on its internal
/// topics and WRITE on its transactional ids, all prefixed by the stream name.
pub fn expand_stream(stream: &KafkaStream, namespace: &Namespace) -> Vec<AclBinding> {
    let principal = user_principal(namespace.kafka_user());
    let name = stream.name();

    vec![
        AclBinding::allow(
            ResourceType::Topic,
            name,
            PatternType::Prefixed,
            principal.clone(),
            AclOperation::Create,
        ),
        AclBinding::allow(
            ResourceType::Topic,
            name,
            PatternType::Prefixed,
            principal.clone(),
            AclOperation::Delete,
        ),
        AclBinding::allow(
            ResourceType::TransactionalId,
            name,
            PatternType::Prefixed,
            principal,
            AclOperation::Write,
        ),
    ]
}

/// READ on the `connect-<resource>` consumer group for CONNECT owners.
/// Non-owner CONNECT entries produce nothing.
pub fn expand_connect(entry: &AccessControlEntry, namespace: &Namespace) -> Vec<AclBinding> {
    if entry.spec.resource_type != AceResourceType::Connect
        || entry.spec.permission != AcePermission::Owner
    {
        return Vec::new();
    }

    vec![AclBinding::allow(
        ResourceType::Group,
        format!("{}{}", CONNECT_GROUP_PREFIX, entry.spec.resource),
        PatternType::from(entry.spec.resource_pattern_type),
        user_principal(namespace.kafka_user()),
        AclOperation::Read,
    )]
}

/// Operations implied by OWNER on a resource type.
pub fn owner_operations(resource_type: ResourceType) -> Result<Vec<AclOperation>> {
    match resource_type {
        ResourceType::Topic => Ok(vec![
            AclOperation::Write,
            AclOperation::Read,
            AclOperation::DescribeConfigs,
        ]),
        ResourceType::Group => Ok(vec![AclOperation::Read]),
        ResourceType::Cluster | ResourceType::TransactionalId | ResourceType::DelegationToken => {
            Err(NsPlaneError::InvariantViolation(format!(
                "OWNER is not supported on resource type {}",
                resource_type
            )))
        }
    }
}

fn broker_resource_type(resource_type: AceResourceType) -> Result<ResourceType> {
    match resource_type {
        AceResourceType::Topic => Ok(ResourceType::Topic),
        AceResourceType::Group => Ok(ResourceType::Group),
        AceResourceType::TransactionalId => Ok(ResourceType::TransactionalId),
        AceResourceType::Connect => Err(NsPlaneError::InvariantViolation(
            "CONNECT entries have no direct broker resource".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::binding::{AclPermissionType, WILDCARD_HOST, WILDCARD_PRINCIPAL};
    use crate::types::{AccessControlEntrySpec, AcePatternType, Metadata};
    use pretty_assertions::assert_eq;

    fn namespace() -> Namespace {
        Namespace::new("ns1", "local", "user1")
    }

    fn entry(
        resource_type: AceResourceType,
        resource: &str,
        pattern: AcePatternType,
        permission: AcePermission,
        granted_to: &str,
    ) -> AccessControlEntry {
        AccessControlEntry {
            metadata: Metadata::new("ns1-acl", "admin", "local"),
            spec: AccessControlEntrySpec {
                resource_type,
                resource: resource.to_string(),
                resource_pattern_type: pattern,
                permission,
                granted_to: granted_to.to_string(),
            },
        }
    }

    fn binding(
        resource_type: ResourceType,
        name: &str,
        pattern: PatternType,
        principal: &str,
        operation: AclOperation,
    ) -> AclBinding {
        AclBinding::allow(resource_type, name, pattern, principal, operation)
    }

    #[test]
    fn test_topic_owner_expands_to_three_operations() {
        let ace = entry(
            AceResourceType::Topic,
            "ns1-",
            AcePatternType::Prefixed,
            AcePermission::Owner,
            "ns1",
        );
        let bindings = expand_entry(&ace, &namespace()).unwrap();

        assert_eq!(
            bindings,
            vec![
                binding(ResourceType::Topic, "ns1-", PatternType::Prefixed, "User:user1", AclOperation::Write),
                binding(ResourceType::Topic, "ns1-", PatternType::Prefixed, "User:user1", AclOperation::Read),
                binding(
                    ResourceType::Topic,
                    "ns1-",
                    PatternType::Prefixed,
                    "User:user1",
                    AclOperation::DescribeConfigs
                ),
            ]
        );
        for b in &bindings {
            assert_eq!(b.host, WILDCARD_HOST);
            assert_eq!(b.permission_type, AclPermissionType::Allow);
        }
    }

    #[test]
    fn test_group_owner_expands_to_read() {
        let ace = entry(
            AceResourceType::Group,
            "ns1-",
            AcePatternType::Prefixed,
            AcePermission::Owner,
            "ns1",
        );
        assert_eq!(
            expand_entry(&ace, &namespace()).unwrap(),
            vec![binding(ResourceType::Group, "ns1-", PatternType::Prefixed, "User:user1", AclOperation::Read)]
        );
    }

    #[test]
    fn test_read_and_write_map_to_single_operation() {
        let read = entry(
            AceResourceType::Topic,
            "ns2-topic",
            AcePatternType::Literal,
            AcePermission::Read,
            "ns1",
        );
        let write = entry(
            AceResourceType::Topic,
            "ns2-topic",
            AcePatternType::Literal,
            AcePermission::Write,
            "ns1",
        );
        assert_eq!(
            expand_entry(&read, &namespace()).unwrap(),
            vec![binding(ResourceType::Topic, "ns2-topic", PatternType::Literal, "User:user1", AclOperation::Read)]
        );
        assert_eq!(
            expand_entry(&write, &namespace()).unwrap(),
            vec![binding(ResourceType::Topic, "ns2-topic", PatternType::Literal, "User:user1", AclOperation::Write)]
        );
    }

    #[test]
    fn test_public_grant_uses_wildcard_principal() {
        let ace = entry(
            AceResourceType::Topic,
            "ns2-public",
            AcePatternType::Prefixed,
            AcePermission::Read,
            "*",
        );
        let bindings = expand_entry(&ace, &namespace()).unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].principal, WILDCARD_PRINCIPAL);
    }

    #[test]
    fn test_stream_expansion() {
        let stream = KafkaStream::new("ns1-stream1", "ns1", "local");
        assert_eq!(
            expand_stream(&stream, &namespace()),
            vec![
                binding(ResourceType::Topic, "ns1-stream1", PatternType::Prefixed, "User:user1", AclOperation::Create),
                binding(ResourceType::Topic, "ns1-stream1", PatternType::Prefixed, "User:user1", AclOperation::Delete),
                binding(
                    ResourceType::TransactionalId,
                    "ns1-stream1",
                    PatternType::Prefixed,
                    "User:user1",
                    AclOperation::Write
                ),
            ]
        );
    }

    #[test]
    fn test_connect_owner_expands_to_group_read() {
        let owner = entry(
            AceResourceType::Connect,
            "ns1-",
            AcePatternType::Prefixed,
            AcePermission::Owner,
            "ns1",
        );
        assert_eq!(
            expand_entry(&owner, &namespace()).unwrap(),
            vec![binding(
                ResourceType::Group,
                "connect-ns1-",
                PatternType::Prefixed,
                "User:user1",
                AclOperation::Read
            )]
        );

        let literal = entry(
            AceResourceType::Connect,
            "ns1-sink",
            AcePatternType::Literal,
            AcePermission::Owner,
            "ns1",
        );
        assert_eq!(expand_connect(&literal, &namespace())[0].pattern_type, PatternType::Literal);

        let read = entry(
            AceResourceType::Connect,
            "ns1-",
            AcePatternType::Prefixed,
            AcePermission::Read,
            "ns1",
        );
        assert!(expand_entry(&read, &namespace()).unwrap().is_empty());
    }

    #[test]
    fn test_unsupported_owner_is_an_invariant_violation() {
        for resource_type in [
            ResourceType::Cluster,
            ResourceType::TransactionalId,
            ResourceType::DelegationToken,
        ] {
            let err = owner_operations(resource_type).unwrap_err();
            assert!(matches!(err, NsPlaneError::InvariantViolation(_)));
        }

        let ace = entry(
            AceResourceType::TransactionalId,
            "ns1-",
            AcePatternType::Prefixed,
            AcePermission::Owner,
            "ns1",
        );
        assert!(matches!(
            expand_acl(&ace, &namespace()),
            Err(NsPlaneError::InvariantViolation(_))
        ));
        assert!(expand_entry(&ace, &namespace()).unwrap().is_empty());
    }

    #[test]
    fn test_expansion_is_deterministic() {
        let ace = entry(
            AceResourceType::Topic,
            "ns1-",
            AcePatternType::Prefixed,
            AcePermission::Owner,
            "ns1",
        );
        let first = expand_entry(&ace, &namespace()).unwrap();
        let second = expand_entry(&ace, &namespace()).unwrap();
        assert_eq!(first, second);
    }
}
