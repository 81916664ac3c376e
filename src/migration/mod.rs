//! Migration engine.
//!
//! This module discovers versioned migrations, works out which of them a
//! store still needs, and runs them in order while holding a cluster-wide
//! lease so that only one runner migrates a store at a time.
//!
//! # Overview
//!
//! - Migrations implement the `Migration` trait: `up()` is required, `down()`
//!   defaults to a no-op
//! - Each migration is registered as a `MigrationType` with a version and
//!   optional profiles, grouped into `MigrationSource`s
//! - A `MigrationCollector` turns registrations into ordered descriptors, a
//!   `MigrationResolver` builds fresh instances for every run
//! - The `MigrationRunner` keeps one `MigrationRecord` per applied migration
//!   and stops at the first failure, persisting it for operators
//!
//! # Usage
//!
//! ```ignore
//! let source = MigrationSource::new("app")
//!     .register(MigrationType::of::<AddFullName>("app::migrations::AddFullName").version(1));
//! let runner = MigrationRunner::new(store, MigrationOptions::new().with_source(source));
//! match runner.run().await? {
//!     RunOutcome::LockDenied => info!("another instance is migrating"),
//!     RunOutcome::Completed(summary) => info!(applied = summary.applied.len(), "done"),
//! }
//! ```

mod collector;
mod descriptor;
mod error;
mod lock;
mod options;
mod patch;
mod record;
mod resolver;
mod runner;
mod types;

pub use collector::{
    ensure_distinct_record_ids, matches_profiles, MigrationCollector, MigrationSource,
    NameBasedCollector, SourceCollector, TypesCollector,
};
pub use descriptor::{
    Constructor, InjectedFactory, MigrationDescriptor, MigrationFactory, MigrationType,
};
pub use error::MigrationError;
pub use lock::{LeaseValue, LockHolder, LockLease, MigrationLock};
pub use options::{ErrorPolicy, LockPolicy, MigrationOptions};
pub use patch::{Alter, CollectionPatchMigration, DEFAULT_PAGE_SIZE};
pub use record::{DocumentRecordStore, MigrationFailure, MigrationRecord, MigrationRecordStore};
pub use resolver::{DefaultResolver, InjectingResolver, MigrationResolver, ServiceProvider};
pub use runner::{MigrationRunner, RunOutcome, RunSummary};
pub use types::{Migration, MigrationContext, MigrationDirection};
