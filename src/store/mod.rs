//! Document store collaborators.
//!
//! The migration engine never talks to a concrete database. It needs two
//! capabilities, both expressed as traits here:
//!
//! - [`DocumentStore`]: point load/store/delete, batched writes, paged
//!   collection streaming, collection-wide patches and index staleness checks
//! - [`CompareExchangeStore`]: a linearizable compare-and-swap key space used
//!   by the run lock
//!
//! [`MemoryStore`] and [`FileStore`] implement both and are used by the tests
//! and the operator CLI. Adapters for real databases live outside this crate.

mod file;
mod memory;
mod state;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use state::merge_patch;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// How often [`DocumentStore::wait_for_indexing`] re-checks stale indexes.
const INDEX_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid patch: {0}")]
    InvalidPatch(String),

    #[error("Indexes still stale after {waited:?}: {}", .indexes.join(", "))]
    StaleTimeout {
        indexes: Vec<String>,
        waited: Duration,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// A stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub collection: String,
    pub body: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, collection: impl Into<String>, body: Value) -> Self {
        Self {
            id: id.into(),
            collection: collection.into(),
            body,
        }
    }
}

/// Handle to a collection-wide patch submitted to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOperation {
    pub collection: String,
    /// Number of documents touched, when known.
    pub patched: usize,
    pub completed: bool,
}

/// Entry in the compare-exchange key space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareExchangeValue {
    pub key: String,
    pub value: Value,
    /// Fencing index; changes on every successful write.
    pub index: u64,
}

/// Outcome of a compare-exchange write or delete.
#[derive(Debug, Clone, PartialEq)]
pub struct CompareExchangeResult {
    pub successful: bool,
    /// Index of the value now stored under the key (0 when absent).
    pub index: u64,
    /// The value now stored under the key.
    pub value: Option<Value>,
}

/// Point and collection access to documents.
///
/// Every call is its own unit of work: it commits before returning.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Document>, StoreError>;

    /// Insert or overwrite a document.
    async fn store(&self, document: Document) -> Result<(), StoreError>;

    /// Delete a document. Returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// All documents of a collection, ordered by id.
    async fn stream_collection(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    /// One page of a collection in id order: at most `take` documents after
    /// the first `skip`.
    async fn stream_collection_page(
        &self,
        collection: &str,
        skip: usize,
        take: usize,
    ) -> Result<Vec<Document>, StoreError> {
        Ok(self
            .stream_collection(collection)
            .await?
            .into_iter()
            .skip(skip)
            .take(take)
            .collect())
    }

    /// Insert or overwrite several documents in one unit of work.
    async fn store_batch(&self, documents: Vec<Document>) -> Result<(), StoreError> {
        for document in documents {
            self.store(document).await?;
        }
        Ok(())
    }

    /// Submit a scripted patch against every document of a collection.
    ///
    /// The script is opaque to the migration engine. When `wait_for_completion`
    /// is false the store may return before the patch has been applied.
    async fn patch_collection(
        &self,
        collection: &str,
        script: &str,
        wait_for_completion: bool,
    ) -> Result<PatchOperation, StoreError>;

    /// Names of indexes that do not yet reflect recent writes.
    async fn stale_indexes(&self) -> Result<Vec<String>, StoreError>;

    /// Block until no index is stale, or fail once `timeout` has elapsed.
    ///
    /// `None` waits indefinitely.
    async fn wait_for_indexing(&self, timeout: Option<Duration>) -> Result<(), StoreError> {
        let started = Instant::now();
        loop {
            let stale = self.stale_indexes().await?;
            if stale.is_empty() {
                return Ok(());
            }

            let waited = started.elapsed();
            if timeout.is_some_and(|limit| waited >= limit) {
                return Err(StoreError::StaleTimeout {
                    indexes: stale,
                    waited,
                });
            }

            tokio::time::sleep(INDEX_POLL_INTERVAL).await;
        }
    }
}

/// A linearizable compare-and-swap key space.
///
/// `put` with index 0 only succeeds when the key is absent; any other index
/// must match the current fencing index of the key.
#[async_trait]
pub trait CompareExchangeStore: Send + Sync {
    async fn get_compare_exchange(
        &self,
        key: &str,
    ) -> Result<Option<CompareExchangeValue>, StoreError>;

    async fn put_compare_exchange(
        &self,
        key: &str,
        value: Value,
        index: u64,
    ) -> Result<CompareExchangeResult, StoreError>;

    async fn delete_compare_exchange(
        &self,
        key: &str,
        index: u64,
    ) -> Result<CompareExchangeResult, StoreError>;
}
