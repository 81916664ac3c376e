//! Types for the migration system.

use super::patch::Alter;
use crate::store::{DocumentStore, PatchOperation, StoreError};
use crate::version::Version;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::Span;

/// Trait for a single migration.
///
/// `up` is required. `down` defaults to a no-op so forward-only migrations
/// only implement one method. A fresh instance is built for every run and
/// `setup` is called once before `up` or `down`.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Receive collaborators before the migration runs.
    fn setup(&mut self, _ctx: &MigrationContext) {}

    /// Apply the migration.
    async fn up(&self, ctx: &MigrationContext) -> anyhow::Result<()>;

    /// Revert the migration.
    async fn down(&self, _ctx: &MigrationContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Direction of migration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationDirection {
    /// Apply pending migrations in ascending version order.
    #[default]
    Up,
    /// Revert applied migrations in descending version order.
    Down,
}

impl MigrationDirection {
    pub fn is_up(&self) -> bool {
        matches!(self, MigrationDirection::Up)
    }
}

impl fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationDirection::Up => write!(f, "Up"),
            MigrationDirection::Down => write!(f, "Down"),
        }
    }
}

/// Everything a migration may touch while it runs.
#[derive(Clone)]
pub struct MigrationContext {
    store: Arc<dyn DocumentStore>,
    database: Option<String>,
    name: String,
    version: Version,
    staleness_timeout: Option<Duration>,
    span: Span,
}

impl MigrationContext {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        name: impl Into<String>,
        version: Version,
    ) -> Self {
        Self {
            store,
            database: None,
            name: name.into(),
            version,
            staleness_timeout: None,
            span: Span::none(),
        }
    }

    pub fn with_database(mut self, database: Option<String>) -> Self {
        self.database = database;
        self
    }

    pub fn with_staleness_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.staleness_timeout = timeout;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Name of the database the run targets, if one was configured.
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Logging span for this migration; enter it or use it as a parent.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Wait for indexes to catch up, then patch every document of a collection
    /// and wait for the patch to complete.
    pub async fn patch_collection(
        &self,
        collection: &str,
        script: &str,
    ) -> Result<PatchOperation, StoreError> {
        self.store.wait_for_indexing(self.staleness_timeout).await?;
        self.store.patch_collection(collection, script, true).await
    }

    /// Document-by-document rewriting helper bound to this migration's store.
    pub fn alter(&self) -> Alter {
        Alter::new(Arc::clone(&self.store))
    }
}
