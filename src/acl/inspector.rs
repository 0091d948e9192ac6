use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::acl::admin::BrokerAdmin;
use crate::acl::binding::{AclBinding, AclBindingFilter, ResourceType};
use crate::error::NsPlaneError;
use crate::Result;

/// Resource types whose bindings are reconciled. Topic CREATE/DELETE is
/// granted through streams only; cluster-level ACLs are never touched.
pub const MANAGED_RESOURCE_TYPES: [ResourceType; 3] = [
    ResourceType::Topic,
    ResourceType::Group,
    ResourceType::TransactionalId,
];

/// Reads the broker's current ACL state for one cluster.
pub struct BrokerAclInspector {
    cluster: String,
    admin: Arc<dyn BrokerAdmin>,
    timeout: Duration,
}

impl BrokerAclInspector {
    pub fn new(cluster: impl Into<String>, admin: Arc<dyn BrokerAdmin>, timeout: Duration) -> Self {
        Self {
            cluster: cluster.into(),
            admin,
            timeout,
        }
    }

    /// Every binding on a managed resource type, bounded by the admin timeout.
    pub async fn describe_all(&self) -> Result<Vec<AclBinding>> {
        let all = tokio::time::timeout(self.timeout, self.admin.describe_acls(&AclBindingFilter::any()))
            .await
            .map_err(|_| NsPlaneError::BrokerTimeout {
                cluster: self.cluster.clone(),
                timeout_ms: self.timeout.as_millis() as u64,
            })??;

        let managed: Vec<AclBinding> = all
            .into_iter()
            .filter(|binding| MANAGED_RESOURCE_TYPES.contains(&binding.resource_type))
            .collect();

        debug!("{} ACLs found on broker {}", managed.len(), self.cluster);
        for binding in &managed {
            trace!("{}", binding);
        }
        Ok(managed)
    }
}
