use super::state::StoreState;
use super::{
    CompareExchangeResult, CompareExchangeStore, CompareExchangeValue, Document, DocumentStore,
    PatchOperation, StoreError,
};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

/// Store kept in a single JSON file.
///
/// Writes go through a temp file and a rename so readers never see a partial
/// file. Read-modify-write cycles are serialized within this process only;
/// the file store is for local use and the operator CLI, not for lock
/// arbitration between hosts.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_state(&self) -> Result<StoreState, StoreError> {
        if !self.path.exists() {
            return Ok(StoreState::default());
        }

        let content = fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write the state atomically (caller must hold the lock).
    async fn write_state(&self, state: &StoreState) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let temp_path = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(state)?;
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn load(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_state().await?.documents.remove(id))
    }

    async fn store(&self, document: Document) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut state = self.read_state().await?;
        state.documents.insert(document.id.clone(), document);
        self.write_state(&state).await
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;
        let mut state = self.read_state().await?;
        if state.documents.remove(id).is_none() {
            return Ok(false);
        }
        self.write_state(&state).await?;
        Ok(true)
    }

    async fn stream_collection(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_state().await?.stream_collection(collection))
    }

    async fn stream_collection_page(
        &self,
        collection: &str,
        skip: usize,
        take: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_state().await?.collection_page(collection, skip, take))
    }

    async fn store_batch(&self, documents: Vec<Document>) -> Result<(), StoreError> {
        if documents.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock().await;
        let mut state = self.read_state().await?;
        state.store_all(documents);
        self.write_state(&state).await
    }

    async fn patch_collection(
        &self,
        collection: &str,
        script: &str,
        _wait_for_completion: bool,
    ) -> Result<PatchOperation, StoreError> {
        let _guard = self.lock.lock().await;
        let mut state = self.read_state().await?;
        let operation = state.patch_collection(collection, script)?;
        self.write_state(&state).await?;
        Ok(operation)
    }

    async fn stale_indexes(&self) -> Result<Vec<String>, StoreError> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl CompareExchangeStore for FileStore {
    async fn get_compare_exchange(
        &self,
        key: &str,
    ) -> Result<Option<CompareExchangeValue>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_state().await?.compare_exchange.remove(key))
    }

    async fn put_compare_exchange(
        &self,
        key: &str,
        value: Value,
        index: u64,
    ) -> Result<CompareExchangeResult, StoreError> {
        let _guard = self.lock.lock().await;
        let mut state = self.read_state().await?;
        let result = state.put_compare_exchange(key, value, index);
        if result.successful {
            self.write_state(&state).await?;
        }
        Ok(result)
    }

    async fn delete_compare_exchange(
        &self,
        key: &str,
        index: u64,
    ) -> Result<CompareExchangeResult, StoreError> {
        let _guard = self.lock.lock().await;
        let mut state = self.read_state().await?;
        let result = state.delete_compare_exchange(key, index);
        if result.successful {
            self.write_state(&state).await?;
        }
        Ok(result)
    }
}
