//! Persisted markers of applied (or failed) migrations.

use super::types::MigrationDirection;
use crate::store::{Document, DocumentStore, StoreError};
use crate::utils::RECORD_COLLECTION;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Why a migration's last run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationFailure {
    pub message: String,
    pub direction: MigrationDirection,
    /// Set by an operator once the cause has been dealt with.
    #[serde(default)]
    pub is_fixed: bool,
}

/// Record of a migration run. Its existence means the migration has been
/// applied, unless it carries a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub id: String,
    pub run_on: DateTime<Utc>,
    #[serde(default)]
    pub has_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<MigrationFailure>,
}

impl MigrationRecord {
    /// Record of a successful forward run.
    pub fn applied(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            run_on: Utc::now(),
            has_error: false,
            error: None,
        }
    }

    pub fn failed(
        id: impl Into<String>,
        direction: MigrationDirection,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            run_on: Utc::now(),
            has_error: true,
            error: Some(MigrationFailure {
                message: message.into(),
                direction,
                is_fixed: false,
            }),
        }
    }

    /// A failure nobody has marked fixed yet.
    pub fn is_unresolved_failure(&self) -> bool {
        self.has_error && !self.error.as_ref().is_some_and(|e| e.is_fixed)
    }

    /// Whether the migration's `up` is in effect.
    ///
    /// A clean record means applied. A fixed failure leaves things as they
    /// were before the failing attempt: a failed `up` never took effect, a
    /// failed `down` never undid it.
    pub fn is_applied(&self) -> bool {
        match (self.has_error, &self.error) {
            (false, _) => true,
            (true, Some(failure)) => failure.direction == MigrationDirection::Down,
            (true, None) => false,
        }
    }

    pub fn failure_message(&self) -> &str {
        self.error
            .as_ref()
            .map(|e| e.message.as_str())
            .unwrap_or("unknown error")
    }
}

/// Storage for migration records.
#[async_trait]
pub trait MigrationRecordStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<MigrationRecord>, StoreError>;

    /// Insert or overwrite a record.
    async fn store(&self, record: &MigrationRecord) -> Result<(), StoreError>;

    async fn delete(&self, record: &MigrationRecord) -> Result<(), StoreError>;

    /// All records, ordered by id.
    async fn list(&self) -> Result<Vec<MigrationRecord>, StoreError>;

    /// Mark a recorded failure as fixed so the next run proceeds past it.
    ///
    /// Returns false when no failed record exists under `id`.
    async fn mark_fixed(&self, id: &str) -> Result<bool, StoreError> {
        let Some(mut record) = self.load(id).await? else {
            return Ok(false);
        };
        let Some(failure) = record.error.as_mut() else {
            return Ok(false);
        };

        failure.is_fixed = true;
        self.store(&record).await?;
        Ok(true)
    }
}

/// Keeps records as documents in the migrated database itself.
pub struct DocumentRecordStore {
    store: Arc<dyn DocumentStore>,
}

impl DocumentRecordStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MigrationRecordStore for DocumentRecordStore {
    async fn load(&self, id: &str) -> Result<Option<MigrationRecord>, StoreError> {
        match self.store.load(id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc.body)?)),
            None => Ok(None),
        }
    }

    async fn store(&self, record: &MigrationRecord) -> Result<(), StoreError> {
        let body = serde_json::to_value(record)?;
        self.store
            .store(Document::new(record.id.clone(), RECORD_COLLECTION, body))
            .await
    }

    async fn delete(&self, record: &MigrationRecord) -> Result<(), StoreError> {
        self.store.delete(&record.id).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<MigrationRecord>, StoreError> {
        self.store
            .stream_collection(RECORD_COLLECTION)
            .await?
            .into_iter()
            .map(|doc| serde_json::from_value(doc.body).map_err(StoreError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn record_store() -> DocumentRecordStore {
        DocumentRecordStore::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_applied_record_is_applied() {
        let record = MigrationRecord::applied("migrationrecord/first/1");
        assert!(record.is_applied());
        assert!(!record.is_unresolved_failure());
    }

    #[test]
    fn test_failed_record_states() {
        let mut up_failure = MigrationRecord::failed("r/1", MigrationDirection::Up, "boom");
        assert!(up_failure.is_unresolved_failure());
        assert!(!up_failure.is_applied());

        up_failure.error.as_mut().unwrap().is_fixed = true;
        assert!(!up_failure.is_unresolved_failure());
        assert!(!up_failure.is_applied());

        let mut down_failure = MigrationRecord::failed("r/1", MigrationDirection::Down, "boom");
        down_failure.error.as_mut().unwrap().is_fixed = true;
        assert!(down_failure.is_applied());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = MigrationRecord::failed("r/1", MigrationDirection::Up, "boom");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["hasError"], true);
        assert_eq!(json["error"]["isFixed"], false);
        assert_eq!(json["error"]["direction"], "Up");
        assert!(json.get("runOn").is_some());

        let clean = serde_json::to_value(MigrationRecord::applied("r/2")).unwrap();
        assert!(clean.get("error").is_none());
    }

    #[tokio::test]
    async fn test_store_load_delete() {
        let records = record_store();
        assert!(records.load("r/1").await.unwrap().is_none());

        let record = MigrationRecord::applied("r/1");
        records.store(&record).await.unwrap();
        assert_eq!(records.load("r/1").await.unwrap(), Some(record.clone()));

        records.delete(&record).await.unwrap();
        assert!(records.load("r/1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_fixed() {
        let records = record_store();
        records
            .store(&MigrationRecord::failed("r/1", MigrationDirection::Up, "boom"))
            .await
            .unwrap();
        records.store(&MigrationRecord::applied("r/2")).await.unwrap();

        assert!(records.mark_fixed("r/1").await.unwrap());
        assert!(!records.mark_fixed("r/2").await.unwrap());
        assert!(!records.mark_fixed("r/missing").await.unwrap());

        let fixed = records.load("r/1").await.unwrap().unwrap();
        assert!(!fixed.is_unresolved_failure());
    }

    #[tokio::test]
    async fn test_list_returns_only_records() {
        let store = Arc::new(MemoryStore::new());
        store
            .store(Document::new("people/1", "People", serde_json::json!({})))
            .await
            .unwrap();
        let records = DocumentRecordStore::new(store);
        records.store(&MigrationRecord::applied("r/2")).await.unwrap();
        records.store(&MigrationRecord::applied("r/1")).await.unwrap();

        let ids: Vec<String> = records.list().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["r/1", "r/2"]);
    }

    #[tokio::test]
    async fn test_storage_errors_propagate() {
        let store = Arc::new(MemoryStore::new());
        store.simulate_outage(true);
        let records = DocumentRecordStore::new(store);
        assert!(matches!(
            records.store(&MigrationRecord::applied("r/1")).await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
