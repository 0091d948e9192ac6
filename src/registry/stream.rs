use std::sync::Arc;

use crate::storage::LogBackedStore;
use crate::types::{KafkaStream, MetadataResource, Namespace};
use crate::Result;

#[derive(Clone)]
pub struct StreamRegistry {
    store: Arc<LogBackedStore<KafkaStream>>,
}

impl StreamRegistry {
    pub fn new(store: Arc<LogBackedStore<KafkaStream>>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<LogBackedStore<KafkaStream>> {
        &self.store
    }

    pub fn find_all(&self) -> Result<Vec<KafkaStream>> {
        self.store.list()
    }

    pub fn find_by_name(&self, namespace: &str, name: &str) -> Result<Option<KafkaStream>> {
        self.store.get(&format!("{}/{}", namespace, name))
    }

    pub fn find_all_for_cluster(&self, cluster: &str) -> Result<Vec<KafkaStream>> {
        self.store.list_filtered(|s| s.metadata.cluster == cluster)
    }

    pub fn find_all_for_namespace(&self, namespace: &Namespace) -> Result<Vec<KafkaStream>> {
        self.store.list_filtered(|s| {
            s.metadata.namespace == namespace.metadata.name
                && s.metadata.cluster == namespace.metadata.cluster
        })
    }

    pub async fn create(&self, mut stream: KafkaStream) -> Result<KafkaStream> {
        stream
            .metadata
            .creation_timestamp
            .get_or_insert_with(chrono::Utc::now);
        self.store.put(&stream.store_key(), stream).await
    }

    pub async fn delete(&self, stream: &KafkaStream) -> Result<()> {
        self.store.delete(&stream.store_key()).await
    }
}
