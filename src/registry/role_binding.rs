use std::sync::Arc;

use crate::storage::LogBackedStore;
use crate::types::{MetadataResource, RoleBinding};
use crate::Result;

#[derive(Clone)]
pub struct RoleBindingRegistry {
    store: Arc<LogBackedStore<RoleBinding>>,
}

impl RoleBindingRegistry {
    pub fn new(store: Arc<LogBackedStore<RoleBinding>>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<LogBackedStore<RoleBinding>> {
        &self.store
    }

    pub fn find_all(&self) -> Result<Vec<RoleBinding>> {
        self.store.list()
    }

    pub fn find_all_for_namespace(&self, namespace: &str) -> Result<Vec<RoleBinding>> {
        self.store.list_filtered(|rb| rb.metadata.namespace == namespace)
    }

    /// Role bindings whose subject is one of `groups`.
    pub fn find_all_for_groups(&self, groups: &[String]) -> Result<Vec<RoleBinding>> {
        self.store
            .list_filtered(|rb| groups.iter().any(|g| *g == rb.spec.subject.subject_name))
    }

    pub async fn create(&self, mut role_binding: RoleBinding) -> Result<RoleBinding> {
        role_binding
            .metadata
            .creation_timestamp
            .get_or_insert_with(chrono::Utc::now);
        self.store.put(&role_binding.store_key(), role_binding).await
    }

    pub async fn delete(&self, role_binding: &RoleBinding) -> Result<()> {
        self.store.delete(&role_binding.store_key()).await
    }
}
