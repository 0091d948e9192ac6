//! Per-cluster convergence of broker ACLs to the expanded desired state.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::acl::admin::BrokerAdmin;
use crate::acl::binding::{user_principal, AclBinding, WILDCARD_PRINCIPAL};
use crate::acl::expander;
use crate::acl::inspector::BrokerAclInspector;
use crate::config::ManagedClusterConfig;
use crate::error::NsPlaneError;
use crate::metrics::ReconcilerMetrics;
use crate::registry::ResourceQuery;
use crate::types::{AccessControlEntry, KafkaStream, Namespace};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// `manage_acls` is off for the cluster.
    AclManagementDisabled,
    /// Another cycle for the same cluster was still running.
    CycleInProgress,
}

/// Outcome of one reconciliation cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cluster: String,
    pub skipped: Option<SkipReason>,
    pub desired: usize,
    pub actual: usize,
    pub to_create: Vec<AclBinding>,
    pub to_delete: Vec<AclBinding>,
    pub created: Vec<AclBinding>,
    pub deleted: Vec<AclBinding>,
    pub failed: Vec<AclBinding>,
    /// Set when `to_delete` was computed but dropping is disabled.
    pub deletes_withheld: bool,
    /// Broker bindings of principals outside every managed namespace.
    pub out_of_scope: Vec<AclBinding>,
}

impl CycleReport {
    fn new(cluster: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            ..Self::default()
        }
    }

    fn skipped(cluster: &str, reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::new(cluster)
        }
    }

    /// Desired and actual state matched at the start of the cycle.
    pub fn is_converged(&self) -> bool {
        self.skipped.is_none() && self.to_create.is_empty() && self.to_delete.is_empty()
    }
}

#[derive(Default)]
struct BatchOutcome {
    succeeded: Vec<AclBinding>,
    failed: Vec<AclBinding>,
}

/// Converges one managed cluster. Cycles on the same instance never overlap.
pub struct AclReconciler {
    cluster: ManagedClusterConfig,
    resources: Arc<dyn ResourceQuery>,
    admin: Arc<dyn BrokerAdmin>,
    inspector: BrokerAclInspector,
    admin_timeout: Duration,
    metrics: Arc<ReconcilerMetrics>,
    cycle_lock: Mutex<()>,
}

impl AclReconciler {
    pub fn new(
        cluster: ManagedClusterConfig,
        resources: Arc<dyn ResourceQuery>,
        admin: Arc<dyn BrokerAdmin>,
        admin_timeout: Duration,
        metrics: Arc<ReconcilerMetrics>,
    ) -> Self {
        let inspector = BrokerAclInspector::new(cluster.name.clone(), admin.clone(), admin_timeout);
        Self {
            cluster,
            resources,
            admin,
            inspector,
            admin_timeout,
            metrics,
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn cluster(&self) -> &ManagedClusterConfig {
        &self.cluster
    }

    /// Runs one cycle. A trigger arriving while a cycle runs is skipped.
    pub async fn run_reconciliation(&self) -> Result<CycleReport> {
        let name = self.cluster.name.as_str();
        if !self.cluster.manage_acls {
            debug!("ACL management disabled on {}, skipping", name);
            return Ok(CycleReport::skipped(name, SkipReason::AclManagementDisabled));
        }

        let _guard = match self.cycle_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("ACL synchronization already running on {}, skipping", name);
                return Ok(CycleReport::skipped(name, SkipReason::CycleInProgress));
            }
        };

        self.metrics.cycles.with_label_values(&[name]).inc();
        debug!("Starting ACL synchronization for cluster {}", name);

        let mut report = CycleReport::new(name);
        match self.synchronize(&mut report).await {
            Ok(()) => Ok(report),
            Err(e) => {
                error!("ACL synchronization aborted on {}: {}", name, e);
                self.metrics.aborted.with_label_values(&[name]).inc();
                // The withheld count is unknown until a cycle completes.
                self.metrics.acl_pending_delete.with_label_values(&[name]).set(0);
                Err(e)
            }
        }
    }

    async fn synchronize(&self, report: &mut CycleReport) -> Result<()> {
        let name = self.cluster.name.as_str();
        let namespaces = self.resources.find_namespaces_for_cluster(name)?;

        let desired = self.compute_desired(&namespaces)?;
        let mut actual: BTreeSet<AclBinding> = self.inspector.describe_all().await?.into_iter().collect();

        if self.cluster.managed_users_only {
            let managed: HashSet<String> = namespaces
                .iter()
                .map(|ns| user_principal(ns.kafka_user()))
                .chain(std::iter::once(WILDCARD_PRINCIPAL.to_string()))
                .collect();
            let (in_scope, out_of_scope): (BTreeSet<_>, BTreeSet<_>) =
                actual.into_iter().partition(|b| managed.contains(&b.principal));
            actual = in_scope;

            if !out_of_scope.is_empty() {
                let principals: BTreeSet<&str> = out_of_scope.iter().map(|b| b.principal.as_str()).collect();
                warn!(
                    "{} ACLs on {} belong to principals outside any namespace and are left untouched: {:?}",
                    out_of_scope.len(),
                    name,
                    principals
                );
            }
            report.out_of_scope = out_of_scope.into_iter().collect();
        }

        report.desired = desired.len();
        report.actual = actual.len();
        report.to_create = desired.difference(&actual).cloned().collect();
        report.to_delete = actual.difference(&desired).cloned().collect();

        for binding in desired.intersection(&actual) {
            debug!("ACL found in broker and namespaces: {}", binding);
        }
        for binding in &report.to_create {
            debug!("ACL to create: {}", binding);
        }
        for binding in &report.to_delete {
            debug!("ACL to delete: {}", binding);
        }

        // Creates first: a broader grant replacing a narrower one must exist
        // before the narrower one is removed.
        let created = self.create_bindings(report.to_create.clone()).await?;
        report.created = created.succeeded;
        report.failed = created.failed;

        let pending = &self.metrics.acl_pending_delete;
        if self.cluster.drop_unsynced_acls {
            pending.with_label_values(&[name]).set(0);
            let deleted = self.delete_bindings(report.to_delete.clone()).await?;
            report.deleted = deleted.succeeded;
            report.failed.extend(deleted.failed);
        } else {
            pending.with_label_values(&[name]).set(report.to_delete.len() as i64);
            if !report.to_delete.is_empty() {
                report.deletes_withheld = true;
                warn!(
                    "ACL drop is disabled on {}: {} unsynchronized ACLs are kept",
                    name,
                    report.to_delete.len()
                );
            }
        }

        info!(
            "ACL synchronization on {}: {} desired, {} actual, {} created, {} deleted, {} failed",
            name,
            report.desired,
            report.actual,
            report.created.len(),
            report.deleted.len(),
            report.failed.len()
        );
        Ok(())
    }

    /// Union of every expansion for the cluster's namespaces, deduplicated.
    pub fn compute_desired(&self, namespaces: &[Namespace]) -> Result<BTreeSet<AclBinding>> {
        let mut desired = BTreeSet::new();
        for namespace in namespaces {
            for entry in self.resources.find_aces_granted_to_namespace(namespace)? {
                desired.extend(expander::expand_entry(&entry, namespace)?);
            }
            for stream in self.resources.find_streams_for_namespace(namespace)? {
                desired.extend(expander::expand_stream(&stream, namespace));
            }
        }
        debug!("{} ACLs expected on {}", desired.len(), self.cluster.name);
        Ok(desired)
    }

    /// Removes the bindings of a deleted entry without waiting for the next cycle.
    pub async fn delete_entry_bindings(
        &self,
        namespace: &Namespace,
        entry: &AccessControlEntry,
    ) -> Result<Vec<AclBinding>> {
        let bindings = expander::expand_entry(entry, namespace)?;
        Ok(self.delete_bindings(bindings).await?.succeeded)
    }

    /// Removes the bindings of a deleted stream without waiting for the next cycle.
    pub async fn delete_stream_bindings(
        &self,
        namespace: &Namespace,
        stream: &KafkaStream,
    ) -> Result<Vec<AclBinding>> {
        let bindings = expander::expand_stream(stream, namespace);
        Ok(self.delete_bindings(bindings).await?.succeeded)
    }

    async fn create_bindings(&self, bindings: Vec<AclBinding>) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        if bindings.is_empty() {
            return Ok(outcome);
        }

        let name = self.cluster.name.as_str();
        let results = self.bounded(self.admin.create_acls(bindings)).await?;
        for (binding, result) in results {
            match result {
                Ok(()) => {
                    info!("Success creating ACL {} on {}", binding, name);
                    self.metrics.acl_created.with_label_values(&[name]).inc();
                    outcome.succeeded.push(binding);
                }
                Err(e) => {
                    error!("Error while creating ACL {} on {}: {}", binding, name, e);
                    self.metrics.acl_failed.with_label_values(&[name]).inc();
                    outcome.failed.push(binding);
                }
            }
        }
        Ok(outcome)
    }

    async fn delete_bindings(&self, bindings: Vec<AclBinding>) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        if bindings.is_empty() {
            return Ok(outcome);
        }

        let name = self.cluster.name.as_str();
        let filters = bindings.iter().map(AclBinding::to_filter).collect();
        let results = self.bounded(self.admin.delete_acls(filters)).await?;
        for (binding, (filter, result)) in bindings.into_iter().zip(results) {
            match result {
                Ok(removed) => {
                    info!("Success deleting ACL {} on {}", filter, name);
                    self.metrics
                        .acl_deleted
                        .with_label_values(&[name])
                        .inc_by(removed.len() as u64);
                    outcome.succeeded.extend(removed);
                }
                Err(e) => {
                    error!("Error while deleting ACL {} on {}: {}", filter, name, e);
                    self.metrics.acl_failed.with_label_values(&[name]).inc();
                    outcome.failed.push(binding);
                }
            }
        }
        Ok(outcome)
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.admin_timeout, call)
            .await
            .map_err(|_| NsPlaneError::BrokerTimeout {
                cluster: self.cluster.name.clone(),
                timeout_ms: self.admin_timeout.as_millis() as u64,
            })?
    }
}
