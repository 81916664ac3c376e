pub mod config;
pub mod hotfix;
pub mod migration;
pub mod store;
pub mod utils;
pub mod version;

// Re-export commonly used types
pub use config::{read_config, write_config, ConfigError, MigrationConfig};
pub use hotfix::{
    Hotfix, HotfixError, HotfixOptions, HotfixOutcome, HotfixRecord, HotfixRunner, HotfixType,
};
pub use migration::{
    Alter, CollectionPatchMigration, DocumentRecordStore, ErrorPolicy, InjectingResolver,
    LockPolicy, Migration, MigrationCollector, MigrationContext, MigrationDescriptor,
    MigrationDirection, MigrationError, MigrationLock, MigrationOptions, MigrationRecord,
    MigrationRecordStore, MigrationResolver, MigrationRunner, MigrationSource, MigrationType,
    RunOutcome, RunSummary, ServiceProvider,
};
pub use store::{CompareExchangeStore, Document, DocumentStore, FileStore, MemoryStore, StoreError};
pub use version::{parse_full_name, Version, VersionError};
