//! Runtime options of a migration run.

use super::collector::{MigrationCollector, MigrationSource, SourceCollector};
use super::record::MigrationRecordStore;
use super::resolver::{DefaultResolver, MigrationResolver};
use super::types::MigrationDirection;
use crate::config::MigrationConfig;
use crate::utils::{DEFAULT_LOCK_TIMEOUT_SECS, DEFAULT_SEPARATOR};
use crate::version::Version;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Whether runs are guarded by the cluster-wide lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPolicy {
    /// Run without any lock. Only safe with a single runner instance.
    Disabled,
    /// Take the lease for `timeout` before migrating; skip the run when it is
    /// held elsewhere.
    Lease { timeout: Duration },
}

impl Default for LockPolicy {
    fn default() -> Self {
        LockPolicy::Lease {
            timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
        }
    }
}

/// What happens when a migration's `up` or `down` fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Persist the failure on the migration's record, then halt.
    #[default]
    Capture,
    /// Halt with the error and leave the record store untouched.
    Propagate,
}

#[derive(Clone)]
pub struct MigrationOptions {
    pub database: Option<String>,
    pub direction: MigrationDirection,
    pub profiles: Vec<String>,
    /// Stop after the migration with exactly this version has been processed.
    pub to_version: Option<Version>,
    /// Registered migrations, consulted by the default collector.
    pub sources: Vec<MigrationSource>,
    pub resolver: Arc<dyn MigrationResolver>,
    /// Overrides the collector built from `sources`.
    pub collector: Option<Arc<dyn MigrationCollector>>,
    /// Overrides keeping records as documents in the migrated store.
    pub record_store: Option<Arc<dyn MigrationRecordStore>>,
    pub lock_policy: LockPolicy,
    pub error_policy: ErrorPolicy,
    pub separator: char,
    pub staleness_timeout: Option<Duration>,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            database: None,
            direction: MigrationDirection::Up,
            profiles: Vec::new(),
            to_version: None,
            sources: Vec::new(),
            resolver: Arc::new(DefaultResolver),
            collector: None,
            record_store: None,
            lock_policy: LockPolicy::default(),
            error_policy: ErrorPolicy::default(),
            separator: DEFAULT_SEPARATOR,
            staleness_timeout: None,
        }
    }
}

impl MigrationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: MigrationSource) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_direction(mut self, direction: MigrationDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_profiles<I, P>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.profiles = profiles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_to_version(mut self, version: Version) -> Self {
        self.to_version = Some(version);
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn MigrationResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_collector(mut self, collector: Arc<dyn MigrationCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn with_record_store(mut self, record_store: Arc<dyn MigrationRecordStore>) -> Self {
        self.record_store = Some(record_store);
        self
    }

    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    pub fn with_staleness_timeout(mut self, timeout: Duration) -> Self {
        self.staleness_timeout = Some(timeout);
        self
    }

    /// The configured collector, or one scanning `sources`.
    pub fn collector(&self) -> Arc<dyn MigrationCollector> {
        match &self.collector {
            Some(collector) => Arc::clone(collector),
            None => Arc::new(SourceCollector::new(self.sources.clone())),
        }
    }
}

impl From<&MigrationConfig> for MigrationOptions {
    fn from(config: &MigrationConfig) -> Self {
        Self {
            database: config.database.clone(),
            profiles: config.profiles.clone(),
            lock_policy: if config.lock_enabled {
                LockPolicy::Lease {
                    timeout: config.lock_timeout(),
                }
            } else {
                LockPolicy::Disabled
            },
            separator: config.separator,
            staleness_timeout: config.staleness_timeout(),
            ..Self::default()
        }
    }
}

impl fmt::Debug for MigrationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationOptions")
            .field("database", &self.database)
            .field("direction", &self.direction)
            .field("profiles", &self.profiles)
            .field("to_version", &self.to_version)
            .field("sources", &self.sources.len())
            .field("lock_policy", &self.lock_policy)
            .field("error_policy", &self.error_policy)
            .field("separator", &self.separator)
            .field("staleness_timeout", &self.staleness_timeout)
            .finish_non_exhaustive()
    }
}
