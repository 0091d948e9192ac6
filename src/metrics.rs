use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};
use std::sync::Arc;

use crate::Result;

const CLUSTER_LABEL: &str = "cluster";

/// Reconciliation counters, labelled by managed cluster.
pub struct ReconcilerMetrics {
    pub cycles: IntCounterVec,
    pub aborted: IntCounterVec,
    pub acl_created: IntCounterVec,
    pub acl_deleted: IntCounterVec,
    pub acl_failed: IntCounterVec,
    pub acl_pending_delete: IntGaugeVec,
    pub registry: Registry,
}

impl ReconcilerMetrics {
    pub fn new() -> Result<Arc<Self>> {
        let registry = Registry::new();

        let cycles = IntCounterVec::new(
            Opts::new("nsplane_reconcile_cycles_total", "Reconciliation cycles started"),
            &[CLUSTER_LABEL],
        )?;
        let aborted = IntCounterVec::new(
            Opts::new(
                "nsplane_reconcile_aborted_total",
                "Reconciliation cycles aborted by a broker or store error",
            ),
            &[CLUSTER_LABEL],
        )?;
        let acl_created = IntCounterVec::new(
            Opts::new("nsplane_acl_created_total", "ACL bindings created on the broker"),
            &[CLUSTER_LABEL],
        )?;
        let acl_deleted = IntCounterVec::new(
            Opts::new("nsplane_acl_deleted_total", "ACL bindings deleted from the broker"),
            &[CLUSTER_LABEL],
        )?;
        let acl_failed = IntCounterVec::new(
            Opts::new("nsplane_acl_failed_total", "ACL create or delete calls that failed"),
            &[CLUSTER_LABEL],
        )?;
        let acl_pending_delete = IntGaugeVec::new(
            Opts::new(
                "nsplane_acl_pending_delete",
                "Unsynchronized ACL bindings kept because dropping is disabled",
            ),
            &[CLUSTER_LABEL],
        )?;

        registry.register(Box::new(cycles.clone()))?;
        registry.register(Box::new(aborted.clone()))?;
        registry.register(Box::new(acl_created.clone()))?;
        registry.register(Box::new(acl_deleted.clone()))?;
        registry.register(Box::new(acl_failed.clone()))?;
        registry.register(Box::new(acl_pending_delete.clone()))?;

        Ok(Arc::new(Self {
            cycles,
            aborted,
            acl_created,
            acl_deleted,
            acl_failed,
            acl_pending_delete,
            registry,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_registered() {
        let metrics = ReconcilerMetrics::new().unwrap();
        metrics.cycles.with_label_values(&["local"]).inc();
        metrics.acl_pending_delete.with_label_values(&["local"]).set(3);

        let families = metrics.registry.gather();
        let names: Vec<_> = families.iter().map(|f| f.get_name().to_string()).collect();
        assert!(names.contains(&"nsplane_reconcile_cycles_total".to_string()));
        assert!(names.contains(&"nsplane_acl_pending_delete".to_string()));
        assert_eq!(metrics.cycles.with_label_values(&["local"]).get(), 1);
    }
}
