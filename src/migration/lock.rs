//! Cluster-wide run lock built on a compare-exchange key.
//!
//! The lock is a lease: its value carries an expiry, and a runner that finds an
//! expired lease may replace it. Acquisition never waits; a held lease simply
//! means another instance is migrating.

use crate::store::{CompareExchangeStore, StoreError};
use crate::utils::LOCK_KEY;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Value stored under the lock key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseValue {
    pub expires_at: DateTime<Utc>,
    pub owner: String,
}

/// A lease held by this runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub key: String,
    /// Fencing index the lease was written with.
    pub index: u64,
    pub expires_at: DateTime<Utc>,
    pub owner: String,
}

/// Current holder of the lock as seen by an observer.
#[derive(Debug, Clone, PartialEq)]
pub struct LockHolder {
    pub index: u64,
    /// `None` when the stored value is not a lease this crate wrote.
    pub lease: Option<LeaseValue>,
}

impl LockHolder {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.lease.as_ref().is_some_and(|lease| lease.expires_at < now)
    }
}

pub struct MigrationLock<S: CompareExchangeStore + ?Sized> {
    store: Arc<S>,
    key: String,
    owner: String,
}

impl<S: CompareExchangeStore + ?Sized> MigrationLock<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_key(store, LOCK_KEY)
    }

    pub fn with_key(store: Arc<S>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            owner: Uuid::new_v4().to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Try to take the lease for `timeout`.
    ///
    /// Returns `None` when another holder's lease has not expired, or when a
    /// racing runner replaced an expired lease first.
    pub async fn acquire(&self, timeout: Duration) -> Result<Option<LockLease>, StoreError> {
        let now = Utc::now();
        let lease = LeaseValue {
            expires_at: chrono::Duration::from_std(timeout)
                .ok()
                .and_then(|ttl| now.checked_add_signed(ttl))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            owner: self.owner.clone(),
        };
        let value = serde_json::to_value(&lease)?;

        let created = self
            .store
            .put_compare_exchange(&self.key, value.clone(), 0)
            .await?;
        if created.successful {
            info!(key = %self.key, index = created.index, "Acquired migration lock");
            return Ok(Some(self.lease_from(created.index, lease)));
        }

        let Some(holder) = self.holder().await? else {
            // Released between our write and our read; the next run will get it.
            return Ok(None);
        };

        if !holder.is_expired(now) {
            return Ok(None);
        }

        let stolen = self
            .store
            .put_compare_exchange(&self.key, value, holder.index)
            .await?;
        if !stolen.successful {
            return Ok(None);
        }

        warn!(
            key = %self.key,
            previous_owner = holder.lease.as_ref().map(|l| l.owner.as_str()).unwrap_or("unknown"),
            "Took over expired migration lock"
        );
        Ok(Some(self.lease_from(stolen.index, lease)))
    }

    /// Release a lease. Failures are logged, never raised: the migrations have
    /// already run, and a stuck lease only delays future runs until it expires.
    pub async fn release(&self, lease: LockLease) -> bool {
        match self
            .store
            .delete_compare_exchange(&lease.key, lease.index)
            .await
        {
            Ok(result) if result.successful => {
                info!(key = %lease.key, "Released migration lock");
                true
            }
            Ok(_) => {
                warn!(
                    key = %lease.key,
                    index = lease.index,
                    "Could not release migration lock, it was replaced by another runner"
                );
                false
            }
            Err(e) => {
                warn!(
                    key = %lease.key,
                    error = %e,
                    "Could not release migration lock, this needs manual cleanup"
                );
                false
            }
        }
    }

    /// Current holder, if any.
    pub async fn holder(&self) -> Result<Option<LockHolder>, StoreError> {
        Ok(self
            .store
            .get_compare_exchange(&self.key)
            .await?
            .map(|entry| LockHolder {
                index: entry.index,
                lease: serde_json::from_value(entry.value).ok(),
            }))
    }

    /// Delete the lock whoever holds it. Operator cleanup only.
    pub async fn force_release(&self) -> Result<bool, StoreError> {
        let Some(holder) = self.holder().await? else {
            return Ok(false);
        };
        Ok(self
            .store
            .delete_compare_exchange(&self.key, holder.index)
            .await?
            .successful)
    }

    fn lease_from(&self, index: u64, value: LeaseValue) -> LockLease {
        LockLease {
            key: self.key.clone(),
            index,
            expires_at: value.expires_at,
            owner: value.owner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_acquire_and_release() {
        let store = Arc::new(MemoryStore::new());
        let lock = MigrationLock::new(store.clone());

        let lease = lock.acquire(HOUR).await.unwrap().expect("lock should be free");
        assert_eq!(lease.key, LOCK_KEY);
        assert!(lock.holder().await.unwrap().is_some());

        assert!(lock.release(lease).await);
        assert!(lock.holder().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_held_lease_denies_second_runner() {
        let store = Arc::new(MemoryStore::new());
        let first = MigrationLock::new(store.clone());
        let second = MigrationLock::new(store.clone());

        let _lease = first.acquire(HOUR).await.unwrap().unwrap();
        assert!(second.acquire(HOUR).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_lease_is_stolen() {
        let store = Arc::new(MemoryStore::new());
        let crashed = MigrationLock::new(store.clone());
        let stale = crashed.acquire(Duration::ZERO).await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;

        let survivor = MigrationLock::new(store.clone());
        let lease = survivor.acquire(HOUR).await.unwrap().expect("expired lease should be taken");
        assert!(lease.index > stale.index);

        // The crashed runner's late release must not free the new lease.
        assert!(!crashed.release(stale).await);
        let holder = survivor.holder().await.unwrap().unwrap();
        assert_eq!(holder.lease.unwrap().owner, lease.owner);
    }

    #[tokio::test]
    async fn test_foreign_lock_value_is_treated_as_held() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_compare_exchange(LOCK_KEY, json!("locked"), 0)
            .await
            .unwrap();

        let lock = MigrationLock::new(store.clone());
        assert!(lock.acquire(HOUR).await.unwrap().is_none());

        assert!(lock.force_release().await.unwrap());
        assert!(lock.acquire(HOUR).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_release_failure_is_not_raised() {
        let store = Arc::new(MemoryStore::new());
        let lock = MigrationLock::new(store.clone());
        let lease = lock.acquire(HOUR).await.unwrap().unwrap();

        store.simulate_outage(true);
        assert!(!lock.release(lease).await);
    }

    #[tokio::test]
    async fn test_acquire_propagates_storage_errors() {
        let store = Arc::new(MemoryStore::new());
        store.simulate_outage(true);
        let lock = MigrationLock::new(store);
        assert!(matches!(
            lock.acquire(HOUR).await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
