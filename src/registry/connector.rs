use std::sync::Arc;

use crate::storage::LogBackedStore;
use crate::types::{Connector, MetadataResource, Namespace};
use crate::Result;

#[derive(Clone)]
pub struct ConnectorRegistry {
    store: Arc<LogBackedStore<Connector>>,
}

impl ConnectorRegistry {
    pub fn new(store: Arc<LogBackedStore<Connector>>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<LogBackedStore<Connector>> {
        &self.store
    }

    pub fn find_all(&self) -> Result<Vec<Connector>> {
        self.store.list()
    }

    pub fn find_by_name(&self, namespace: &str, name: &str) -> Result<Option<Connector>> {
        self.store.get(&format!("{}/{}", namespace, name))
    }

    pub fn find_all_for_cluster(&self, cluster: &str) -> Result<Vec<Connector>> {
        self.store.list_filtered(|c| c.metadata.cluster == cluster)
    }

    pub fn find_all_for_namespace(&self, namespace: &Namespace) -> Result<Vec<Connector>> {
        self.store.list_filtered(|c| {
            c.metadata.namespace == namespace.metadata.name
                && c.metadata.cluster == namespace.metadata.cluster
        })
    }

    pub async fn create(&self, mut connector: Connector) -> Result<Connector> {
        connector
            .metadata
            .creation_timestamp
            .get_or_insert_with(chrono::Utc::now);
        self.store.put(&connector.store_key(), connector).await
    }

    pub async fn delete(&self, connector: &Connector) -> Result<()> {
        self.store.delete(&connector.store_key()).await
    }
}
