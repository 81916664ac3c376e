//! One-off hotfixes.
//!
//! A hotfix is a unit of work that is run on demand, selected by version or by
//! name, rather than as part of the ordered migration sequence. Each hotfix is
//! applied at most once per store; a record in the store remembers it ran.

use crate::migration::{matches_profiles, MigrationContext};
use crate::store::{Document, DocumentStore, StoreError};
use crate::utils::{
    panic_message, versioned_document_id, DEFAULT_SEPARATOR, HOTFIX_COLLECTION, HOTFIX_ID_PREFIX,
};
use crate::version::Version;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, info_span, Instrument};

#[derive(Error, Debug)]
pub enum HotfixError {
    #[error(
        "Unable to find exactly one hotfix matching version \"{}\" or name \"{}\" ({matches} matched)",
        selector(.version.as_ref()),
        selector(.name.as_ref())
    )]
    Ambiguous {
        version: Option<Version>,
        name: Option<String>,
        matches: usize,
    },

    #[error("Hotfix {name} failed: {message}")]
    Failed { name: String, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn selector<T: fmt::Display>(value: Option<&T>) -> String {
    value.map_or_else(|| "NOT SET".to_string(), |v| v.to_string())
}

/// A one-off fix.
#[async_trait]
pub trait Hotfix: Send + Sync {
    fn setup(&mut self, _ctx: &MigrationContext) {}

    async fn apply(&self, ctx: &MigrationContext) -> anyhow::Result<()>;
}

pub type HotfixFactory = Arc<dyn Fn() -> Box<dyn Hotfix> + Send + Sync>;

/// A registered hotfix and its metadata.
#[derive(Clone)]
pub struct HotfixType {
    name: String,
    version: Version,
    profiles: BTreeSet<String>,
    factory: HotfixFactory,
}

impl HotfixType {
    pub fn of<H: Hotfix + Default + 'static>(name: impl Into<String>, version: u32) -> Self {
        Self::from_fn(name, version, || Box::new(H::default()) as Box<dyn Hotfix>)
    }

    pub fn from_fn<F>(name: impl Into<String>, version: u32, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Hotfix> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            version: Version::legacy(version),
            profiles: BTreeSet::new(),
            factory: Arc::new(factory),
        }
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profiles.insert(profile.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last segment of the fully-qualified name.
    pub fn type_name(&self) -> &str {
        self.name
            .rsplit(|c: char| c == '.' || c == ':')
            .next()
            .unwrap_or(&self.name)
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn record_id(&self, separator: char) -> String {
        versioned_document_id(HOTFIX_ID_PREFIX, self.type_name(), &self.version, separator)
    }

    fn selected_by(&self, options: &HotfixOptions) -> bool {
        if !matches_profiles(&self.profiles, &options.profiles) {
            return false;
        }
        match (options.version, options.name.as_deref()) {
            (Some(version), _) => self.version == version,
            (None, Some(name)) => self.type_name().eq_ignore_ascii_case(name),
            (None, None) => false,
        }
    }
}

impl fmt::Debug for HotfixType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotfixType")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("profiles", &self.profiles)
            .finish()
    }
}

/// Which hotfix to run. `version` wins over `name` when both are set.
#[derive(Debug, Clone)]
pub struct HotfixOptions {
    pub profiles: Vec<String>,
    pub version: Option<Version>,
    pub name: Option<String>,
    pub separator: char,
    pub database: Option<String>,
    pub staleness_timeout: Option<Duration>,
}

impl Default for HotfixOptions {
    fn default() -> Self {
        Self {
            profiles: Vec::new(),
            version: None,
            name: None,
            separator: DEFAULT_SEPARATOR,
            database: None,
            staleness_timeout: None,
        }
    }
}

impl HotfixOptions {
    pub fn by_version(version: u32) -> Self {
        Self {
            version: Some(Version::legacy(version)),
            ..Self::default()
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_profiles<I, P>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.profiles = profiles.into_iter().map(Into::into).collect();
        self
    }
}

/// Marker that a hotfix ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotfixRecord {
    pub id: String,
    pub name: String,
    pub run_on: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotfixOutcome {
    Applied(String),
    AlreadyApplied(String),
}

pub struct HotfixRunner {
    store: Arc<dyn DocumentStore>,
    hotfixes: Vec<HotfixType>,
}

impl HotfixRunner {
    pub fn new(store: Arc<dyn DocumentStore>, hotfixes: Vec<HotfixType>) -> Self {
        Self { store, hotfixes }
    }

    /// Pick the single hotfix `options` selects.
    pub fn select(&self, options: &HotfixOptions) -> Result<&HotfixType, HotfixError> {
        let matches: Vec<&HotfixType> = self
            .hotfixes
            .iter()
            .filter(|h| h.selected_by(options))
            .collect();

        match matches.as_slice() {
            [single] => Ok(*single),
            _ => Err(HotfixError::Ambiguous {
                version: options.version,
                name: options.name.clone(),
                matches: matches.len(),
            }),
        }
    }

    /// Apply the selected hotfix unless its record shows it already ran.
    pub async fn run(&self, options: &HotfixOptions) -> Result<HotfixOutcome, HotfixError> {
        let hotfix_type = self.select(options)?;
        let id = hotfix_type.record_id(options.separator);
        let span = info_span!(
            "hotfix",
            name = %hotfix_type.name(),
            version = %hotfix_type.version()
        );

        if self.store.load(&id).await?.is_some() {
            info!(parent: &span, id = %id, "Hotfix already applied");
            return Ok(HotfixOutcome::AlreadyApplied(id));
        }

        let ctx = MigrationContext::new(
            Arc::clone(&self.store),
            hotfix_type.name(),
            hotfix_type.version(),
        )
        .with_database(options.database.clone())
        .with_staleness_timeout(options.staleness_timeout)
        .with_span(span.clone());

        let failed = |message: String| HotfixError::Failed {
            name: hotfix_type.name().to_string(),
            message,
        };

        let hotfix = std::panic::catch_unwind(AssertUnwindSafe(|| {
            let mut hotfix = (hotfix_type.factory)();
            hotfix.setup(&ctx);
            hotfix
        }))
        .map_err(|panic| failed(format!("setup panicked: {}", panic_message(panic.as_ref()))))?;

        info!(parent: &span, "Applying hotfix");
        match AssertUnwindSafe(hotfix.apply(&ctx).instrument(span.clone()))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(failed(format!("{:#}", e))),
            Err(panic) => {
                return Err(failed(format!("panicked: {}", panic_message(panic.as_ref()))))
            }
        }

        let record = HotfixRecord {
            id: id.clone(),
            name: hotfix_type.type_name().to_string(),
            run_on: Utc::now(),
        };
        self.store
            .store(Document::new(
                id.clone(),
                HOTFIX_COLLECTION,
                serde_json::to_value(&record)?,
            ))
            .await?;

        info!(parent: &span, id = %id, "Hotfix applied");
        Ok(HotfixOutcome::Applied(id))
    }
}
