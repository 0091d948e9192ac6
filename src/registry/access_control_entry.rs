use std::sync::Arc;

use crate::storage::LogBackedStore;
use crate::types::{AccessControlEntry, MetadataResource, Namespace, PUBLIC_GRANTED_TO};
use crate::Result;

/// Access control entries, keyed by `namespace/name` of the granting namespace.
#[derive(Clone)]
pub struct AccessControlEntryRegistry {
    store: Arc<LogBackedStore<AccessControlEntry>>,
}

impl AccessControlEntryRegistry {
    pub fn new(store: Arc<LogBackedStore<AccessControlEntry>>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<LogBackedStore<AccessControlEntry>> {
        &self.store
    }

    pub fn find_all(&self) -> Result<Vec<AccessControlEntry>> {
        self.store.list()
    }

    pub fn find_by_name(&self, namespace: &str, name: &str) -> Result<Option<AccessControlEntry>> {
        self.store.get(&format!("{}/{}", namespace, name))
    }

    pub fn find_all_for_cluster(&self, cluster: &str) -> Result<Vec<AccessControlEntry>> {
        self.store.list_filtered(|ace| ace.metadata.cluster == cluster)
    }

    /// Entries declared by `namespace`, whoever they grant.
    pub fn find_all_for_namespace(&self, namespace: &str) -> Result<Vec<AccessControlEntry>> {
        self.store.list_filtered(|ace| ace.metadata.namespace == namespace)
    }

    /// Entries granted to the namespace plus public grants, on the namespace's cluster.
    pub fn find_all_granted_to_namespace(&self, namespace: &Namespace) -> Result<Vec<AccessControlEntry>> {
        self.store.list_filtered(|ace| {
            ace.metadata.cluster == namespace.metadata.cluster
                && (ace.spec.granted_to == namespace.metadata.name
                    || ace.spec.granted_to == PUBLIC_GRANTED_TO)
        })
    }

    pub async fn create(&self, mut entry: AccessControlEntry) -> Result<AccessControlEntry> {
        entry
            .metadata
            .creation_timestamp
            .get_or_insert_with(chrono::Utc::now);
        self.store.put(&entry.store_key(), entry).await
    }

    pub async fn delete(&self, entry: &AccessControlEntry) -> Result<()> {
        self.store.delete(&entry.store_key()).await
    }
}
