use std::sync::Arc;

use crate::storage::LogBackedStore;
use crate::types::{MetadataResource, Namespace};
use crate::Result;

/// Namespaces, keyed by name.
#[derive(Clone)]
pub struct NamespaceRegistry {
    store: Arc<LogBackedStore<Namespace>>,
}

impl NamespaceRegistry {
    pub fn new(store: Arc<LogBackedStore<Namespace>>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<LogBackedStore<Namespace>> {
        &self.store
    }

    pub fn find_all(&self) -> Result<Vec<Namespace>> {
        self.store.list()
    }

    pub fn find_by_name(&self, name: &str) -> Result<Option<Namespace>> {
        self.store.get(name)
    }

    pub fn find_all_for_cluster(&self, cluster: &str) -> Result<Vec<Namespace>> {
        self.store.list_filtered(|ns| ns.metadata.cluster == cluster)
    }

    pub async fn create(&self, mut namespace: Namespace) -> Result<Namespace> {
        namespace
            .metadata
            .creation_timestamp
            .get_or_insert_with(chrono::Utc::now);
        self.store.put(&namespace.store_key(), namespace).await
    }

    pub async fn delete(&self, namespace: &Namespace) -> Result<()> {
        self.store.delete(&namespace.store_key()).await
    }
}
