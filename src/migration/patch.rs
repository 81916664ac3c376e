//! Ready-made migration bodies.

use super::descriptor::MigrationType;
use super::types::{Migration, MigrationContext};
use crate::store::{DocumentStore, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Documents handled per page by [`Alter::collection`].
pub const DEFAULT_PAGE_SIZE: usize = 128;

/// A migration that submits one patch payload against a whole collection on
/// `up`, and optionally another on `down`.
///
/// Indexes are given the chance to catch up before each patch, bounded by the
/// run's staleness timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionPatchMigration {
    collection: String,
    up: String,
    down: Option<String>,
}

impl CollectionPatchMigration {
    pub fn new(collection: impl Into<String>, up: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            up: up.into(),
            down: None,
        }
    }

    pub fn with_down(mut self, down: impl Into<String>) -> Self {
        self.down = Some(down.into());
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Register this patch under `name`. Add metadata with the returned
    /// builder.
    pub fn into_type(self, name: impl Into<String>) -> MigrationType {
        MigrationType::from_fn(name, move || Box::new(self.clone()) as Box<dyn Migration>)
    }
}

#[async_trait]
impl Migration for CollectionPatchMigration {
    async fn up(&self, ctx: &MigrationContext) -> anyhow::Result<()> {
        let op = ctx.patch_collection(&self.collection, &self.up).await?;
        debug!(parent: ctx.span(), collection = %op.collection, patched = op.patched, "Patched collection");
        Ok(())
    }

    async fn down(&self, ctx: &MigrationContext) -> anyhow::Result<()> {
        match self.down.as_deref() {
            Some(script) if !script.trim().is_empty() => {
                let op = ctx.patch_collection(&self.collection, script).await?;
                debug!(parent: ctx.span(), collection = %op.collection, patched = op.patched, "Reverted collection patch");
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Rewrites the documents of a collection, a page at a time.
///
/// ```ignore
/// ctx.alter().collection("People", |person| {
///     let first = person["FirstName"].as_str().unwrap_or_default().to_string();
///     let last = person["LastName"].as_str().unwrap_or_default().to_string();
///     person["Name"] = format!("{first} {last}").into();
///     true
/// }).await?;
/// ```
pub struct Alter {
    store: Arc<dyn DocumentStore>,
    page_size: usize,
}

impl Alter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Zero is treated as one.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Call `action` on the body of every document in `collection`, page by
    /// page, and store the documents it reports as changed as one batch per
    /// page.
    ///
    /// Returns the number of documents stored.
    pub async fn collection<F>(&self, collection: &str, mut action: F) -> Result<usize, StoreError>
    where
        F: FnMut(&mut Value) -> bool + Send,
    {
        let mut skip = 0;
        let mut changed_total = 0;

        loop {
            let page = self
                .store
                .stream_collection_page(collection, skip, self.page_size)
                .await?;
            let fetched = page.len();

            let changed: Vec<_> = page
                .into_iter()
                .filter_map(|mut doc| action(&mut doc.body).then_some(doc))
                .collect();
            changed_total += changed.len();
            if !changed.is_empty() {
                self.store.store_batch(changed).await?;
            }

            if fetched < self.page_size {
                break;
            }
            skip += fetched;
        }

        Ok(changed_total)
    }
}
