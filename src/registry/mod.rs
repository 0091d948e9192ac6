//! Typed views over the log-backed stores, one per resource kind.

pub mod access_control_entry;
pub mod connector;
pub mod namespace;
pub mod role_binding;
pub mod stream;

pub use access_control_entry::AccessControlEntryRegistry;
pub use connector::ConnectorRegistry;
pub use namespace::NamespaceRegistry;
pub use role_binding::RoleBindingRegistry;
pub use stream::StreamRegistry;

use futures::future::{select_all, BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{StoreBackend, StoreConfig};
use crate::storage::{FileResourceLog, InMemoryResourceLog, LogBackedStore, ResourceLog};
use crate::types::{AccessControlEntry, Connector, KafkaStream, MetadataResource, Namespace, RoleBinding};
use crate::Result;

/// Read surface the reconciler needs from the desired state.
pub trait ResourceQuery: Send + Sync {
    fn find_namespaces_for_cluster(&self, cluster: &str) -> Result<Vec<Namespace>>;

    fn find_aces_granted_to_namespace(&self, namespace: &Namespace) -> Result<Vec<AccessControlEntry>>;

    fn find_streams_for_namespace(&self, namespace: &Namespace) -> Result<Vec<KafkaStream>>;
}

#[derive(Clone)]
pub struct ResourceRegistries {
    pub namespaces: NamespaceRegistry,
    pub access_control_entries: AccessControlEntryRegistry,
    pub streams: StreamRegistry,
    pub connectors: ConnectorRegistry,
    pub role_bindings: RoleBindingRegistry,
}

impl ResourceRegistries {
    /// Opens one log per resource kind and waits until every store has replayed.
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        let (namespaces, access_control_entries, streams, connectors, role_bindings) = tokio::try_join!(
            open_store::<Namespace>(config),
            open_store::<AccessControlEntry>(config),
            open_store::<KafkaStream>(config),
            open_store::<Connector>(config),
            open_store::<RoleBinding>(config),
        )?;

        info!("All resource stores are ready");

        Ok(Self {
            namespaces: NamespaceRegistry::new(namespaces),
            access_control_entries: AccessControlEntryRegistry::new(access_control_entries),
            streams: StreamRegistry::new(streams),
            connectors: ConnectorRegistry::new(connectors),
            role_bindings: RoleBindingRegistry::new(role_bindings),
        })
    }

    /// Resolves with the first fatal store error. The process should stop serving.
    pub async fn wait_fatal(&self) -> String {
        let waits: Vec<BoxFuture<'_, String>> = vec![
            self.namespaces.store().wait_fatal().boxed(),
            self.access_control_entries.store().wait_fatal().boxed(),
            self.streams.store().wait_fatal().boxed(),
            self.connectors.store().wait_fatal().boxed(),
            self.role_bindings.store().wait_fatal().boxed(),
        ];
        let (reason, _, _) = select_all(waits).await;
        reason
    }

    pub fn shutdown(&self) {
        self.namespaces.store().shutdown();
        self.access_control_entries.store().shutdown();
        self.streams.store().shutdown();
        self.connectors.store().shutdown();
        self.role_bindings.store().shutdown();
    }
}

impl ResourceQuery for ResourceRegistries {
    fn find_namespaces_for_cluster(&self, cluster: &str) -> Result<Vec<Namespace>> {
        self.namespaces.find_all_for_cluster(cluster)
    }

    fn find_aces_granted_to_namespace(&self, namespace: &Namespace) -> Result<Vec<AccessControlEntry>> {
        self.access_control_entries.find_all_granted_to_namespace(namespace)
    }

    fn find_streams_for_namespace(&self, namespace: &Namespace) -> Result<Vec<KafkaStream>> {
        self.streams.find_all_for_namespace(namespace)
    }
}

/// Creates the log named `<topic_prefix>.<resource>` for the configured backend.
pub async fn open_log(config: &StoreConfig, resource: &str) -> Result<Arc<dyn ResourceLog>> {
    let name = config.log_name(resource);
    let log: Arc<dyn ResourceLog> = match config.backend {
        StoreBackend::Memory => Arc::new(InMemoryResourceLog::new(name)),
        StoreBackend::File => Arc::new(FileResourceLog::open(&config.data_dir, name, true).await?),
    };
    Ok(log)
}

async fn open_store<V>(config: &StoreConfig) -> Result<Arc<LogBackedStore<V>>>
where
    V: MetadataResource + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let log = open_log(config, V::KIND.log_suffix()).await?;
    debug!("Opening {} store on {}", V::KIND, log.name());
    LogBackedStore::open(log, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        AcePatternType, AcePermission, AceResourceType, AccessControlEntrySpec, ConnectorSpec, Metadata,
        Role, RoleBindingSpec, Subject, Verb,
    };

    fn memory_config() -> StoreConfig {
        StoreConfig {
            backend: StoreBackend::Memory,
            poll_interval_ms: 20,
            ..StoreConfig::default()
        }
    }

    fn ace(namespace: &str, name: &str, cluster: &str, granted_to: &str) -> AccessControlEntry {
        AccessControlEntry {
            metadata: Metadata::new(name, namespace, cluster),
            spec: AccessControlEntrySpec {
                resource_type: AceResourceType::Topic,
                resource: format!("{}-", granted_to),
                resource_pattern_type: AcePatternType::Prefixed,
                permission: AcePermission::Read,
                granted_to: granted_to.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_namespaces_scoped_by_cluster() {
        let registries = ResourceRegistries::open(&memory_config()).await.unwrap();
        registries.namespaces.create(Namespace::new("ns1", "local", "user1")).await.unwrap();
        registries.namespaces.create(Namespace::new("ns2", "prod", "user2")).await.unwrap();

        let local = registries.find_namespaces_for_cluster("local").unwrap();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].name(), "ns1");
        assert!(local[0].metadata.creation_timestamp.is_some());

        let ns2 = registries.namespaces.find_by_name("ns2").unwrap().unwrap();
        registries.namespaces.delete(&ns2).await.unwrap();
        assert!(registries.namespaces.find_by_name("ns2").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_granted_to_namespace_includes_public_grants_of_same_cluster() {
        let registries = ResourceRegistries::open(&memory_config()).await.unwrap();
        let ns1 = registries
            .namespaces
            .create(Namespace::new("ns1", "local", "user1"))
            .await
            .unwrap();

        let acl = &registries.access_control_entries;
        acl.create(ace("admin", "ns1-acl", "local", "ns1")).await.unwrap();
        acl.create(ace("ns2", "ns2-public", "local", "*")).await.unwrap();
        acl.create(ace("ns3", "ns3-public", "prod", "*")).await.unwrap();
        acl.create(ace("ns2", "ns2-to-ns4", "local", "ns4")).await.unwrap();

        let granted = registries.find_aces_granted_to_namespace(&ns1).unwrap();
        let names: Vec<_> = granted.iter().map(|a| a.metadata.name.as_str()).collect();
        assert_eq!(names, vec!["ns1-acl", "ns2-public"]);

        assert_eq!(acl.find_all_for_namespace("ns2").unwrap().len(), 2);
        assert!(acl.find_by_name("admin", "ns1-acl").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_streams_for_namespace() {
        let registries = ResourceRegistries::open(&memory_config()).await.unwrap();
        let ns1 = Namespace::new("ns1", "local", "user1");
        registries.streams.create(KafkaStream::new("ns1-stream1", "ns1", "local")).await.unwrap();
        registries.streams.create(KafkaStream::new("ns2-stream1", "ns2", "local")).await.unwrap();

        let streams = registries.find_streams_for_namespace(&ns1).unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].name(), "ns1-stream1");

        registries.streams.delete(&streams[0]).await.unwrap();
        assert!(registries.find_streams_for_namespace(&ns1).unwrap().is_empty());
    }

    fn connector(namespace: &str, name: &str, cluster: &str) -> Connector {
        Connector {
            metadata: Metadata::new(name, namespace, cluster),
            spec: ConnectorSpec {
                connect_cluster: "connect-1".to_string(),
                config: Default::default(),
            },
        }
    }

    #[tokio::test]
    async fn test_connectors_by_namespace_and_cluster() {
        let registries = ResourceRegistries::open(&memory_config()).await.unwrap();
        let connectors = &registries.connectors;
        let created = connectors.create(connector("ns1", "ns1-sink", "local")).await.unwrap();
        assert!(created.metadata.creation_timestamp.is_some());
        connectors.create(connector("ns1", "ns1-source", "local")).await.unwrap();
        connectors.create(connector("ns2", "ns2-sink", "local")).await.unwrap();
        connectors.create(connector("ns1", "ns1-mirror", "prod")).await.unwrap();

        let ns1 = Namespace::new("ns1", "local", "user1");
        let names: Vec<_> = connectors
            .find_all_for_namespace(&ns1)
            .unwrap()
            .into_iter()
            .map(|c| c.metadata.name)
            .collect();
        assert_eq!(names, vec!["ns1-sink", "ns1-source"]);
        assert_eq!(connectors.find_all_for_cluster("local").unwrap().len(), 3);
        assert_eq!(connectors.find_all().unwrap().len(), 4);

        let source = connectors.find_by_name("ns1", "ns1-source").unwrap().unwrap();
        connectors.delete(&source).await.unwrap();
        assert!(connectors.find_by_name("ns1", "ns1-source").unwrap().is_none());
        assert_eq!(connectors.find_all_for_namespace(&ns1).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_role_bindings_for_groups() {
        let registries = ResourceRegistries::open(&memory_config()).await.unwrap();
        let binding = RoleBinding {
            metadata: Metadata::new("ns1-rb", "ns1", "local"),
            spec: RoleBindingSpec {
                role: Role {
                    resource_types: vec!["topics".to_string()],
                    verbs: vec![Verb::Get],
                },
                subject: Subject {
                    subject_type: "GROUP".to_string(),
                    subject_name: "team-a".to_string(),
                },
            },
        };
        registries.role_bindings.create(binding).await.unwrap();

        let found = registries
            .role_bindings
            .find_all_for_groups(&["team-b".to_string(), "team-a".to_string()])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(registries
            .role_bindings
            .find_all_for_groups(&["team-c".to_string()])
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_file_backend_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            backend: StoreBackend::File,
            data_dir: dir.path().to_path_buf(),
            poll_interval_ms: 20,
            ..StoreConfig::default()
        };

        {
            let registries = ResourceRegistries::open(&config).await.unwrap();
            registries.namespaces.create(Namespace::new("ns1", "local", "user1")).await.unwrap();
            registries.namespaces.create(Namespace::new("ns2", "local", "user2")).await.unwrap();
            let ns2 = registries.namespaces.find_by_name("ns2").unwrap().unwrap();
            registries.namespaces.delete(&ns2).await.unwrap();
            registries.shutdown();
        }

        let registries = ResourceRegistries::open(&config).await.unwrap();
        let all = registries.namespaces.find_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].kafka_user(), "user1");
    }
}
