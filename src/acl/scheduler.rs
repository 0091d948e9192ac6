use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::acl::admin::BrokerAdmin;
use crate::acl::binding::AclBinding;
use crate::acl::reconciler::{AclReconciler, CycleReport};
use crate::config::{Config, ManagedClusterConfig, ReconcilerConfig};
use crate::error::NsPlaneError;
use crate::metrics::ReconcilerMetrics;
use crate::registry::ResourceQuery;
use crate::types::{AccessControlEntry, KafkaStream, Namespace};
use crate::Result;

/// One reconciler per configured cluster, built once at startup.
pub struct ReconcilerRegistry {
    reconcilers: HashMap<String, Arc<AclReconciler>>,
}

impl ReconcilerRegistry {
    pub fn from_config<F>(
        config: &Config,
        resources: Arc<dyn ResourceQuery>,
        metrics: Arc<ReconcilerMetrics>,
        mut admin_for: F,
    ) -> Result<Self>
    where
        F: FnMut(&ManagedClusterConfig) -> Result<Arc<dyn BrokerAdmin>>,
    {
        let mut reconcilers = HashMap::new();
        for cluster in &config.clusters {
            let admin = admin_for(cluster)?;
            let timeout = cluster.admin_timeout(&config.reconciler);
            let reconciler = AclReconciler::new(cluster.clone(), resources.clone(), admin, timeout, metrics.clone());
            reconcilers.insert(cluster.name.clone(), Arc::new(reconciler));
        }
        Ok(Self { reconcilers })
    }

    pub fn get(&self, cluster: &str) -> Option<&Arc<AclReconciler>> {
        self.reconcilers.get(cluster)
    }

    pub fn cluster_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.reconcilers.keys().cloned().collect();
        names.sort();
        names
    }

    fn reconciler(&self, cluster: &str) -> Result<&Arc<AclReconciler>> {
        self.get(cluster)
            .ok_or_else(|| NsPlaneError::NotFound(format!("managed cluster {}", cluster)))
    }

    /// On-demand cycle for one cluster.
    pub async fn run_reconciliation(&self, cluster: &str) -> Result<CycleReport> {
        self.reconciler(cluster)?.run_reconciliation().await
    }

    pub async fn delete_entry_bindings(
        &self,
        namespace: &Namespace,
        entry: &AccessControlEntry,
    ) -> Result<Vec<AclBinding>> {
        self.reconciler(namespace.cluster())?
            .delete_entry_bindings(namespace, entry)
            .await
    }

    pub async fn delete_stream_bindings(
        &self,
        namespace: &Namespace,
        stream: &KafkaStream,
    ) -> Result<Vec<AclBinding>> {
        self.reconciler(namespace.cluster())?
            .delete_stream_bindings(namespace, stream)
            .await
    }
}

/// Periodic reconciliation, one task per cluster with ACL management enabled.
pub struct ReconciliationScheduler {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl ReconciliationScheduler {
    pub fn spawn(registry: Arc<ReconcilerRegistry>, config: &ReconcilerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let mut handles = Vec::new();

        for name in registry.cluster_names() {
            let Some(reconciler) = registry.get(&name).cloned() else {
                continue;
            };
            if !reconciler.cluster().manage_acls {
                info!("ACL management disabled on {}, no schedule started", name);
                continue;
            }

            let mut shutdown_rx = shutdown_tx.subscribe();
            let initial_delay = config.initial_delay();
            let period = config.interval();

            handles.push(tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(initial_delay) => {}
                    _ = shutdown_rx.changed() => return,
                }

                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = reconciler.run_reconciliation().await {
                                error!("Scheduled ACL synchronization failed on {}: {}", name, e);
                            }
                        }
                        _ = shutdown_rx.changed() => break,
                    }
                }
                info!("ACL synchronization schedule stopped for {}", name);
            }));
        }

        Self { shutdown_tx, handles }
    }

    pub fn task_count(&self) -> usize {
        self.handles.len()
    }

    /// Stops every schedule and waits for in-flight cycles to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::admin::InMemoryBrokerAdmin;
    use crate::config::{StoreBackend, StoreConfig};
    use crate::registry::ResourceRegistries;
    use crate::types::{AccessControlEntrySpec, AcePatternType, AcePermission, AceResourceType, Metadata};
    use std::time::Duration;

    async fn registries() -> ResourceRegistries {
        let store = StoreConfig {
            backend: StoreBackend::Memory,
            poll_interval_ms: 20,
            ..StoreConfig::default()
        };
        let registries = ResourceRegistries::open(&store).await.unwrap();
        registries
            .namespaces
            .create(Namespace::new("ns1", "local", "user1"))
            .await
            .unwrap();
        registries
            .access_control_entries
            .create(AccessControlEntry {
                metadata: Metadata::new("ns1-acl", "admin", "local"),
                spec: AccessControlEntrySpec {
                    resource_type: AceResourceType::Group,
                    resource: "ns1-".to_string(),
                    resource_pattern_type: AcePatternType::Prefixed,
                    permission: AcePermission::Owner,
                    granted_to: "ns1".to_string(),
                },
            })
            .await
            .unwrap();
        registries
    }

    fn config() -> Config {
        let mut disabled = ManagedClusterConfig::new("prod");
        disabled.manage_acls = false;
        Config {
            clusters: vec![ManagedClusterConfig::new("local"), disabled],
            reconciler: ReconcilerConfig {
                interval_ms: 20,
                ..ReconcilerConfig::default()
            },
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_registry_routes_by_cluster() {
        let registries = registries().await;
        let admins: Arc<parking_lot::Mutex<HashMap<String, Arc<InMemoryBrokerAdmin>>>> = Default::default();
        let registry = {
            let admins = admins.clone();
            ReconcilerRegistry::from_config(
                &config(),
                Arc::new(registries.clone()),
                ReconcilerMetrics::new().unwrap(),
                move |cluster| {
                    let admin = Arc::new(InMemoryBrokerAdmin::new(cluster.name.clone()));
                    admins.lock().insert(cluster.name.clone(), admin.clone());
                    Ok(admin as Arc<dyn BrokerAdmin>)
                },
            )
            .unwrap()
        };
        assert_eq!(registry.cluster_names(), vec!["local".to_string(), "prod".to_string()]);

        let report = registry.run_reconciliation("local").await.unwrap();
        assert_eq!(report.created.len(), 1);

        let unknown = registry.run_reconciliation("missing").await.unwrap_err();
        assert!(matches!(unknown, NsPlaneError::NotFound(_)));

        let ns1 = registries.namespaces.find_by_name("ns1").unwrap().unwrap();
        let entry = registries
            .access_control_entries
            .find_by_name("admin", "ns1-acl")
            .unwrap()
            .unwrap();
        let deleted = registry.delete_entry_bindings(&ns1, &entry).await.unwrap();
        assert_eq!(deleted.len(), 1);

        let local = admins.lock().get("local").cloned().unwrap();
        assert!(local.bindings().is_empty());
    }

    #[tokio::test]
    async fn test_scheduler_runs_enabled_clusters_until_shutdown() {
        let registries = registries().await;
        let local = Arc::new(InMemoryBrokerAdmin::new("local"));
        let registry = {
            let local = local.clone();
            ReconcilerRegistry::from_config(
                &config(),
                Arc::new(registries),
                ReconcilerMetrics::new().unwrap(),
                move |cluster| {
                    if cluster.name == "local" {
                        Ok(local.clone() as Arc<dyn BrokerAdmin>)
                    } else {
                        Ok(Arc::new(InMemoryBrokerAdmin::new(cluster.name.clone())) as Arc<dyn BrokerAdmin>)
                    }
                },
            )
            .unwrap()
        };

        let config = config();
        let scheduler = ReconciliationScheduler::spawn(Arc::new(registry), &config.reconciler);
        assert_eq!(scheduler.task_count(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.shutdown().await;

        assert_eq!(local.bindings().len(), 1);
    }
}
