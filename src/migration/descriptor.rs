//! Migration registrations and the descriptors discovered from them.

use super::error::MigrationError;
use super::resolver::{MigrationResolver, ServiceProvider};
use super::types::Migration;
use crate::utils::versioned_document_id;
use crate::version::Version;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Builds a migration with no dependencies.
pub type MigrationFactory = Arc<dyn Fn() -> Box<dyn Migration> + Send + Sync>;

/// Builds a migration from injected services.
pub type InjectedFactory =
    Arc<dyn Fn(&ServiceProvider) -> anyhow::Result<Box<dyn Migration>> + Send + Sync>;

/// How a registered type is turned into a migration instance.
#[derive(Clone)]
pub enum Constructor {
    /// A base type that is registered but never instantiated.
    Abstract,
    Default(MigrationFactory),
    Injected(InjectedFactory),
}

/// A registered migration type: its fully-qualified name, declared metadata
/// and constructor.
///
/// ```ignore
/// let ty = MigrationType::of::<AddFullName>("app::migrations::AddFullName")
///     .version(3)
///     .profiles(["demo"]);
/// ```
#[derive(Clone)]
pub struct MigrationType {
    name: String,
    version: Option<Version>,
    profiles: BTreeSet<String>,
    description: String,
    constructor: Constructor,
}

impl MigrationType {
    /// Register a migration built through its `Default` impl.
    pub fn of<M: Migration + Default + 'static>(name: impl Into<String>) -> Self {
        Self::from_fn(name, || Box::new(M::default()) as Box<dyn Migration>)
    }

    /// Register a migration built by a closure.
    pub fn from_fn<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Migration> + Send + Sync + 'static,
    {
        Self::with_constructor(name, Constructor::Default(Arc::new(factory)))
    }

    /// Register a migration whose constructor needs injected services.
    pub fn injected<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ServiceProvider) -> anyhow::Result<Box<dyn Migration>> + Send + Sync + 'static,
    {
        Self::with_constructor(name, Constructor::Injected(Arc::new(factory)))
    }

    /// Register a base type that is skipped during discovery.
    pub fn abstract_base(name: impl Into<String>) -> Self {
        Self::with_constructor(name, Constructor::Abstract)
    }

    fn with_constructor(name: impl Into<String>, constructor: Constructor) -> Self {
        Self {
            name: name.into(),
            version: None,
            profiles: BTreeSet::new(),
            description: String::new(),
            constructor,
        }
    }

    /// Declare an integer version; it orders as `(0, n)`.
    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(Version::legacy(version));
        self
    }

    /// Declare a four-component version.
    pub fn full_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profiles.insert(profile.into());
        self
    }

    pub fn profiles<I, P>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.profiles.extend(profiles.into_iter().map(Into::into));
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
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

    pub fn declared_version(&self) -> Option<Version> {
        self.version
    }

    pub fn declared_profiles(&self) -> &BTreeSet<String> {
        &self.profiles
    }

    pub fn is_abstract(&self) -> bool {
        matches!(self.constructor, Constructor::Abstract)
    }

    pub fn constructor(&self) -> &Constructor {
        &self.constructor
    }

    /// Descriptor using the declared metadata.
    pub(crate) fn describe(&self) -> Result<MigrationDescriptor, MigrationError> {
        let version = self.version.ok_or_else(|| MigrationError::Discovery {
            name: self.name.clone(),
            reason: "type must declare migration metadata or be abstract".to_string(),
        })?;
        Ok(self.describe_as(version, self.profiles.clone()))
    }

    pub(crate) fn describe_as(
        &self,
        version: Version,
        profiles: BTreeSet<String>,
    ) -> MigrationDescriptor {
        MigrationDescriptor {
            migration_type: self.clone(),
            version,
            profiles,
        }
    }
}

impl fmt::Debug for MigrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationType")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("profiles", &self.profiles)
            .field("abstract", &self.is_abstract())
            .finish()
    }
}

/// A discovered migration with resolved metadata, ready to be run.
#[derive(Debug, Clone)]
pub struct MigrationDescriptor {
    migration_type: MigrationType,
    pub version: Version,
    pub profiles: BTreeSet<String>,
}

impl MigrationDescriptor {
    pub fn name(&self) -> &str {
        self.migration_type.name()
    }

    pub fn description(&self) -> &str {
        &self.migration_type.description
    }

    pub fn migration_type(&self) -> &MigrationType {
        &self.migration_type
    }

    /// Build a fresh migration instance.
    pub fn instantiate(
        &self,
        resolver: &dyn MigrationResolver,
    ) -> Result<Box<dyn Migration>, MigrationError> {
        resolver.resolve(&self.migration_type)
    }

    /// Deterministic id of this migration's record.
    pub fn record_id(&self, separator: char) -> String {
        versioned_document_id(
            crate::utils::RECORD_ID_PREFIX,
            self.migration_type.type_name(),
            &self.version,
            separator,
        )
    }
}
