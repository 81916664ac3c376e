use super::state::StoreState;
use super::{
    CompareExchangeResult, CompareExchangeStore, CompareExchangeValue, Document, DocumentStore,
    PatchOperation, StoreError,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// In-process store. Clones of an `Arc<MemoryStore>` share the same contents,
/// which is how tests stand in for several processes pointed at one database.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    stale: Mutex<BTreeSet<String>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an index as not yet caught up with recent writes.
    pub async fn mark_stale(&self, index: &str) {
        self.stale.lock().await.insert(index.to_string());
    }

    pub async fn clear_stale(&self) {
        self.stale.lock().await.clear();
    }

    /// While set, every operation fails with [`StoreError::Unavailable`].
    pub fn simulate_outage(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of documents in a collection.
    pub async fn count(&self, collection: &str) -> usize {
        self.state.lock().await.stream_collection(collection).len()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn load(&self, id: &str) -> Result<Option<Document>, StoreError> {
        self.check_available()?;
        Ok(self.state.lock().await.documents.get(id).cloned())
    }

    async fn store(&self, document: Document) -> Result<(), StoreError> {
        self.check_available()?;
        self.state
            .lock()
            .await
            .documents
            .insert(document.id.clone(), document);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self.state.lock().await.documents.remove(id).is_some())
    }

    async fn stream_collection(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        self.check_available()?;
        Ok(self.state.lock().await.stream_collection(collection))
    }

    async fn stream_collection_page(
        &self,
        collection: &str,
        skip: usize,
        take: usize,
    ) -> Result<Vec<Document>, StoreError> {
        self.check_available()?;
        Ok(self.state.lock().await.collection_page(collection, skip, take))
    }

    async fn store_batch(&self, documents: Vec<Document>) -> Result<(), StoreError> {
        self.check_available()?;
        self.state.lock().await.store_all(documents);
        Ok(())
    }

    async fn patch_collection(
        &self,
        collection: &str,
        script: &str,
        _wait_for_completion: bool,
    ) -> Result<PatchOperation, StoreError> {
        self.check_available()?;
        self.state.lock().await.patch_collection(collection, script)
    }

    async fn stale_indexes(&self) -> Result<Vec<String>, StoreError> {
        self.check_available()?;
        Ok(self.stale.lock().await.iter().cloned().collect())
    }
}

#[async_trait]
impl CompareExchangeStore for MemoryStore {
    async fn get_compare_exchange(
        &self,
        key: &str,
    ) -> Result<Option<CompareExchangeValue>, StoreError> {
        self.check_available()?;
        Ok(self.state.lock().await.compare_exchange.get(key).cloned())
    }

    async fn put_compare_exchange(
        &self,
        key: &str,
        value: Value,
        index: u64,
    ) -> Result<CompareExchangeResult, StoreError> {
        self.check_available()?;
        Ok(self
            .state
            .lock()
            .await
            .put_compare_exchange(key, value, index))
    }

    async fn delete_compare_exchange(
        &self,
        key: &str,
        index: u64,
    ) -> Result<CompareExchangeResult, StoreError> {
        self.check_available()?;
        Ok(self.state.lock().await.delete_compare_exchange(key, index))
    }
}
