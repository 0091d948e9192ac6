//! Broker ACL synchronization
//!
//! Desired bindings are expanded from the namespaced grants held in the
//! resource stores, diffed against what the broker reports, and converged
//! with creates before deletes.

pub mod admin;
pub mod binding;
pub mod expander;
pub mod inspector;
pub mod kafka;
pub mod reconciler;
pub mod scheduler;

pub use admin::{AdminCall, BrokerAdmin, InMemoryBrokerAdmin};
pub use binding::{
    AclBinding, AclBindingFilter, AclOperation, AclPermissionType, PatternType, ResourceType,
    WILDCARD_PRINCIPAL,
};
pub use inspector::{BrokerAclInspector, MANAGED_RESOURCE_TYPES};
pub use kafka::KafkaBrokerAdmin;
pub use reconciler::{AclReconciler, CycleReport, SkipReason};
pub use scheduler::{ReconcilerRegistry, ReconciliationScheduler};
