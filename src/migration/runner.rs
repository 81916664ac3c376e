//! The migration run state machine.
//!
//! A run takes the lease lock (unless disabled), walks the collected
//! migrations in direction order, applies or reverts the ones whose record
//! says they need it, and releases the lock on every exit path, panics
//! included. The first failure halts the run.

use super::collector::ensure_distinct_record_ids;
use super::descriptor::MigrationDescriptor;
use super::error::MigrationError;
use super::lock::MigrationLock;
use super::options::{ErrorPolicy, LockPolicy, MigrationOptions};
use super::record::{DocumentRecordStore, MigrationRecord, MigrationRecordStore};
use super::types::{MigrationContext, MigrationDirection};
use crate::store::{CompareExchangeStore, DocumentStore};
use crate::utils::panic_message;
use crate::version::compare_for_direction;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Instrument};

/// How a run ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Another runner holds the lease; nothing was touched.
    LockDenied,
    Completed(RunSummary),
}

impl RunOutcome {
    pub fn is_lock_denied(&self) -> bool {
        matches!(self, RunOutcome::LockDenied)
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            RunOutcome::LockDenied => None,
            RunOutcome::Completed(summary) => Some(summary),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub direction: MigrationDirection,
    /// Names of the migrations applied (or reverted), in run order.
    pub applied: Vec<String>,
    /// Migrations whose record showed nothing to do.
    pub skipped: usize,
    /// Whether the run stopped early at the target version.
    pub reached_target: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    fn new(direction: MigrationDirection) -> Self {
        Self {
            direction,
            applied: Vec::new(),
            skipped: 0,
            reached_target: false,
            elapsed: Duration::ZERO,
        }
    }
}

/// Runs migrations against a store.
///
/// `S` supplies both the documents and the compare-exchange key space the
/// lock lives in.
pub struct MigrationRunner<S>
where
    S: DocumentStore + CompareExchangeStore + 'static,
{
    store: Arc<S>,
    options: MigrationOptions,
}

impl<S> MigrationRunner<S>
where
    S: DocumentStore + CompareExchangeStore + 'static,
{
    pub fn new(store: Arc<S>, options: MigrationOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &MigrationOptions {
        &self.options
    }

    /// Record store used for runs: the configured one, or documents in the
    /// migrated store.
    pub fn record_store(&self) -> Arc<dyn MigrationRecordStore> {
        let records: Arc<dyn MigrationRecordStore> = match &self.options.record_store {
            Some(records) => Arc::clone(records),
            None => Arc::new(DocumentRecordStore::new(self.store.clone())),
        };
        records
    }

    /// Execute one run.
    ///
    /// Returns [`RunOutcome::LockDenied`] without side effects when another
    /// runner holds the lease. Discovery, resolution and storage errors
    /// propagate; a failing migration ends the run with
    /// [`MigrationError::Halted`] or [`MigrationError::Application`]
    /// depending on the error policy.
    pub async fn run(&self) -> Result<RunOutcome, MigrationError> {
        let held = match self.options.lock_policy {
            LockPolicy::Disabled => None,
            LockPolicy::Lease { timeout } => {
                let lock = MigrationLock::new(Arc::clone(&self.store));
                match lock.acquire(timeout).await? {
                    Some(lease) => Some((lock, lease)),
                    None => {
                        warn!(
                            key = %lock.key(),
                            "Migration lock is held by another runner, skipping this run"
                        );
                        return Ok(RunOutcome::LockDenied);
                    }
                }
            }
        };

        // A panic that escapes the run, e.g. from a collector, unwinds only
        // once the lease is back.
        let result = AssertUnwindSafe(self.migrate()).catch_unwind().await;

        if let Some((lock, lease)) = held {
            lock.release(lease).await;
        }

        match result {
            Ok(result) => result.map(RunOutcome::Completed),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn migrate(&self) -> Result<RunSummary, MigrationError> {
        let started = Instant::now();
        let direction = self.options.direction;

        let mut descriptors = self
            .options
            .collector()
            .ordered_migrations(&self.options.profiles)?;
        descriptors.sort_by(|a, b| compare_for_direction(&a.version, &b.version, direction.is_up()));
        ensure_distinct_record_ids(&descriptors, self.options.separator)?;

        info!(
            direction = %direction,
            database = self.options.database.as_deref().unwrap_or("default"),
            count = descriptors.len(),
            "Starting migration run"
        );

        let records = self.record_store();
        let mut summary = RunSummary::new(direction);

        for descriptor in &descriptors {
            self.step(descriptor, records.as_ref(), &mut summary).await?;

            if self.options.to_version == Some(descriptor.version) {
                info!(version = %descriptor.version, "Reached target version");
                summary.reached_target = true;
                break;
            }
        }

        summary.elapsed = started.elapsed();
        info!(
            direction = %direction,
            applied = summary.applied.len(),
            skipped = summary.skipped,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Migration run completed"
        );
        Ok(summary)
    }

    /// Process one descriptor: skip it, apply it, or fail the run.
    async fn step(
        &self,
        descriptor: &MigrationDescriptor,
        records: &dyn MigrationRecordStore,
        summary: &mut RunSummary,
    ) -> Result<(), MigrationError> {
        let direction = self.options.direction;
        let span = info_span!(
            "migration",
            name = %descriptor.name(),
            version = %descriptor.version
        );

        let mut migration = std::panic::catch_unwind(AssertUnwindSafe(|| {
            descriptor.instantiate(self.options.resolver.as_ref())
        }))
        .map_err(|panic| MigrationError::Resolution {
            name: descriptor.name().to_string(),
            reason: format!("constructor panicked: {}", panic_message(panic.as_ref())),
        })??;
        let ctx = MigrationContext::new(self.store.clone(), descriptor.name(), descriptor.version)
            .with_database(self.options.database.clone())
            .with_staleness_timeout(self.options.staleness_timeout)
            .with_span(span.clone());
        let id = descriptor.record_id(self.options.separator);

        let existing = records.load(&id).await?;
        if let Some(record) = existing.as_ref().filter(|r| r.is_unresolved_failure()) {
            let failed_direction = record
                .error
                .as_ref()
                .map(|failure| failure.direction)
                .unwrap_or(direction);
            error!(
                parent: &span,
                id = %id,
                direction = %failed_direction,
                "Unresolved failure recorded for migration, mark it fixed to continue"
            );
            return Err(MigrationError::Halted {
                id,
                direction: failed_direction,
                message: record.failure_message().to_string(),
            });
        }

        let applied = existing.as_ref().is_some_and(|r| r.is_applied());
        match direction {
            MigrationDirection::Up if applied => {
                info!(parent: &span, "Already applied, skipping");
                summary.skipped += 1;
                return Ok(());
            }
            MigrationDirection::Down if !applied => {
                if let Some(stale) = &existing {
                    warn!(parent: &span, id = %id, "Clearing fixed failure of a migration that never applied");
                    records.delete(stale).await?;
                }
                info!(parent: &span, "Not applied, skipping");
                summary.skipped += 1;
                return Ok(());
            }
            _ => {}
        }

        // Set up only what is about to run; a skipped record is never touched.
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| migration.setup(&ctx))) {
            let message = format!("setup panicked: {}", panic_message(panic.as_ref()));
            return self.fail(descriptor, id, message, records, &span).await;
        }

        info!(parent: &span, direction = %direction, "Applying migration");
        let started = Instant::now();
        let body = async {
            match direction {
                MigrationDirection::Up => migration.up(&ctx).await,
                MigrationDirection::Down => migration.down(&ctx).await,
            }
        };
        let outcome = match AssertUnwindSafe(body.instrument(span.clone()))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(panic) => Err(format!("panicked: {}", panic_message(panic.as_ref()))),
        };

        if let Err(message) = outcome {
            return self.fail(descriptor, id, message, records, &span).await;
        }

        match direction {
            MigrationDirection::Up => records.store(&MigrationRecord::applied(&id)).await?,
            MigrationDirection::Down => {
                if let Some(record) = &existing {
                    records.delete(record).await?;
                }
            }
        }

        info!(
            parent: &span,
            direction = %direction,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Migration completed"
        );
        summary.applied.push(descriptor.name().to_string());
        Ok(())
    }

    async fn fail(
        &self,
        descriptor: &MigrationDescriptor,
        id: String,
        message: String,
        records: &dyn MigrationRecordStore,
        span: &tracing::Span,
    ) -> Result<(), MigrationError> {
        let direction = self.options.direction;
        error!(parent: span, direction = %direction, error = %message, "Migration failed");

        match self.options.error_policy {
            ErrorPolicy::Capture => {
                records
                    .store(&MigrationRecord::failed(&id, direction, &message))
                    .await?;
                Err(MigrationError::Halted {
                    id,
                    direction,
                    message,
                })
            }
            ErrorPolicy::Propagate => Err(MigrationError::Application {
                name: descriptor.name().to_string(),
                direction,
                message,
            }),
        }
    }
}
