use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::acl::binding::{AclBinding, AclBindingFilter};
use crate::error::NsPlaneError;
use crate::Result;

/// Per-binding outcome of a create call.
pub type CreateOutcome = (AclBinding, Result<()>);

/// Per-filter outcome of a delete call; on success, the bindings removed.
pub type DeleteOutcome = (AclBindingFilter, Result<Vec<AclBinding>>);

/// Broker ACL administration.
///
/// A call-level error means the call did not reach the broker. Once a call is
/// accepted, each item reports its own outcome.
#[async_trait]
pub trait BrokerAdmin: Send + Sync {
    async fn describe_acls(&self, filter: &AclBindingFilter) -> Result<Vec<AclBinding>>;

    async fn create_acls(&self, bindings: Vec<AclBinding>) -> Result<Vec<CreateOutcome>>;

    async fn delete_acls(&self, filters: Vec<AclBindingFilter>) -> Result<Vec<DeleteOutcome>>;
}

/// A call observed by [`InMemoryBrokerAdmin`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCall {
    Describe(AclBindingFilter),
    Create(Vec<AclBinding>),
    Delete(Vec<AclBindingFilter>),
}

/// Broker admin holding bindings in process memory.
///
/// Stands in for a cluster in tests and lets them inject latency,
/// unavailability and per-binding failures.
pub struct InMemoryBrokerAdmin {
    cluster: String,
    bindings: RwLock<BTreeSet<AclBinding>>,
    calls: Mutex<Vec<AdminCall>>,
    unavailable: AtomicBool,
    failing: Mutex<HashSet<AclBinding>>,
    latency: Mutex<Duration>,
}

impl InMemoryBrokerAdmin {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            bindings: RwLock::new(BTreeSet::new()),
            calls: Mutex::new(Vec::new()),
            unavailable: AtomicBool::new(false),
            failing: Mutex::new(HashSet::new()),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    pub fn with_bindings(cluster: impl Into<String>, bindings: impl IntoIterator<Item = AclBinding>) -> Self {
        let admin = Self::new(cluster);
        admin.bindings.write().extend(bindings);
        admin
    }

    /// Current broker state, sorted.
    pub fn bindings(&self) -> Vec<AclBinding> {
        self.bindings.read().iter().cloned().collect()
    }

    pub fn insert(&self, binding: AclBinding) {
        self.bindings.write().insert(binding);
    }

    pub fn calls(&self) -> Vec<AdminCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Rejects create and delete of this exact binding.
    pub fn fail_binding(&self, binding: AclBinding) {
        self.failing.lock().insert(binding);
    }

    /// Delay applied before every call is answered.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    async fn enter(&self, call: AdminCall) -> Result<()> {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(NsPlaneError::BrokerUnavailable {
                cluster: self.cluster.clone(),
                message: "admin client disconnected".to_string(),
            });
        }
        self.calls.lock().push(call);
        Ok(())
    }

    fn rejected(&self, binding: &AclBinding) -> NsPlaneError {
        NsPlaneError::BindingOperation {
            binding: binding.to_string(),
            message: "rejected by broker".to_string(),
        }
    }
}

#[async_trait]
impl BrokerAdmin for InMemoryBrokerAdmin {
    async fn describe_acls(&self, filter: &AclBindingFilter) -> Result<Vec<AclBinding>> {
        self.enter(AdminCall::Describe(filter.clone())).await?;
        Ok(self
            .bindings
            .read()
            .iter()
            .filter(|binding| filter.matches(binding))
            .cloned()
            .collect())
    }

    async fn create_acls(&self, bindings: Vec<AclBinding>) -> Result<Vec<CreateOutcome>> {
        self.enter(AdminCall::Create(bindings.clone())).await?;

        let failing = self.failing.lock().clone();
        let mut stored = self.bindings.write();
        Ok(bindings
            .into_iter()
            .map(|binding| {
                if failing.contains(&binding) {
                    let err = self.rejected(&binding);
                    (binding, Err(err))
                } else {
                    stored.insert(binding.clone());
                    (binding, Ok(()))
                }
            })
            .collect())
    }

    async fn delete_acls(&self, filters: Vec<AclBindingFilter>) -> Result<Vec<DeleteOutcome>> {
        self.enter(AdminCall::Delete(filters.clone())).await?;

        let failing = self.failing.lock().clone();
        let mut stored = self.bindings.write();
        Ok(filters
            .into_iter()
            .map(|filter| {
                let matched: Vec<AclBinding> =
                    stored.iter().filter(|b| filter.matches(b)).cloned().collect();
                if let Some(blocked) = matched.iter().find(|b| failing.contains(*b)) {
                    let err = self.rejected(blocked);
                    return (filter, Err(err));
                }
                for binding in &matched {
                    stored.remove(binding);
                }
                (filter, Ok(matched))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::binding::{AclOperation, PatternType, ResourceType};

    fn read(name: &str) -> AclBinding {
        AclBinding::allow(
            ResourceType::Topic,
            name,
            PatternType::Literal,
            "User:user1",
            AclOperation::Read,
        )
    }

    #[tokio::test]
    async fn test_create_describe_delete() {
        let admin = InMemoryBrokerAdmin::new("local");
        let outcomes = admin.create_acls(vec![read("a"), read("b")]).await.unwrap();
        assert!(outcomes.iter().all(|(_, r)| r.is_ok()));

        let all = admin.describe_acls(&AclBindingFilter::any()).await.unwrap();
        assert_eq!(all.len(), 2);

        let deleted = admin.delete_acls(vec![read("a").to_filter()]).await.unwrap();
        assert_eq!(deleted[0].1.as_ref().unwrap(), &vec![read("a")]);
        assert_eq!(admin.bindings(), vec![read("b")]);
        assert_eq!(admin.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_per_binding_failure_does_not_fail_the_call() {
        let admin = InMemoryBrokerAdmin::new("local");
        admin.fail_binding(read("bad"));

        let outcomes = admin.create_acls(vec![read("bad"), read("good")]).await.unwrap();
        assert!(outcomes[0].1.is_err());
        assert!(outcomes[1].1.is_ok());
        assert_eq!(admin.bindings(), vec![read("good")]);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let admin = InMemoryBrokerAdmin::new("local");
        admin.set_unavailable(true);
        let err = admin.describe_acls(&AclBindingFilter::any()).await.unwrap_err();
        assert!(matches!(err, NsPlaneError::BrokerUnavailable { .. }));
        assert!(admin.calls().is_empty());
    }
}
