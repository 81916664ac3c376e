//! Discovering the migrations a run should consider.
//!
//! Collectors turn registered [`MigrationType`]s into [`MigrationDescriptor`]s
//! sorted by ascending version, keeping only those that match the active
//! profiles. They are consulted afresh on every run.

use super::descriptor::{MigrationDescriptor, MigrationType};
use super::error::MigrationError;
use crate::utils::DEFAULT_SEPARATOR;
use crate::version::parse_full_name;
use std::collections::{BTreeMap, BTreeSet};

/// Source of ordered, profile-filtered migrations.
pub trait MigrationCollector: Send + Sync {
    /// Migrations matching `profiles`, in ascending version order.
    fn ordered_migrations(
        &self,
        profiles: &[String],
    ) -> Result<Vec<MigrationDescriptor>, MigrationError>;
}

/// A named group of registered migration types, such as all migrations of one
/// crate or module.
#[derive(Debug, Clone, Default)]
pub struct MigrationSource {
    name: String,
    types: Vec<MigrationType>,
}

impl MigrationSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: Vec::new(),
        }
    }

    pub fn register(mut self, migration_type: MigrationType) -> Self {
        self.types.push(migration_type);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn types(&self) -> &[MigrationType] {
        &self.types
    }
}

/// A migration with no profiles runs under every profile; otherwise one of its
/// profiles must be active. Profile names compare case-insensitively.
pub fn matches_profiles(migration_profiles: &BTreeSet<String>, active: &[String]) -> bool {
    migration_profiles.is_empty()
        || migration_profiles
            .iter()
            .any(|profile| active.iter().any(|a| a.eq_ignore_ascii_case(profile)))
}

/// Fail with a discovery error when two descriptors would share a record id,
/// since the second would read the first one's record as its own.
pub fn ensure_distinct_record_ids(
    descriptors: &[MigrationDescriptor],
    separator: char,
) -> Result<(), MigrationError> {
    let mut owners: BTreeMap<String, &str> = BTreeMap::new();
    for descriptor in descriptors {
        let id = descriptor.record_id(separator);
        if let Some(owner) = owners.insert(id.clone(), descriptor.name()) {
            return Err(MigrationError::Discovery {
                name: descriptor.name().to_string(),
                reason: format!("record id {} is already used by {}", id, owner),
            });
        }
    }
    Ok(())
}

/// Descriptors from declared metadata, skipping abstract types.
fn declared_descriptors<'a>(
    types: impl Iterator<Item = &'a MigrationType>,
    profiles: &[String],
) -> Result<Vec<MigrationDescriptor>, MigrationError> {
    let all = types
        .filter(|t| !t.is_abstract())
        .map(MigrationType::describe)
        .collect::<Result<Vec<_>, _>>()?;
    ensure_distinct_record_ids(&all, DEFAULT_SEPARATOR)?;

    let mut descriptors: Vec<_> = all
        .into_iter()
        .filter(|descriptor| matches_profiles(&descriptor.profiles, profiles))
        .collect();
    descriptors.sort_by(|a, b| a.version.cmp(&b.version));
    Ok(descriptors)
}

/// Scans every registered source for migrations with declared metadata.
#[derive(Debug, Clone, Default)]
pub struct SourceCollector {
    sources: Vec<MigrationSource>,
}

impl SourceCollector {
    pub fn new(sources: Vec<MigrationSource>) -> Self {
        Self { sources }
    }
}

impl MigrationCollector for SourceCollector {
    fn ordered_migrations(
        &self,
        profiles: &[String],
    ) -> Result<Vec<MigrationDescriptor>, MigrationError> {
        declared_descriptors(
            self.sources.iter().flat_map(|source| source.types.iter()),
            profiles,
        )
    }
}

/// Uses exactly the types it was given.
#[derive(Debug, Clone, Default)]
pub struct TypesCollector {
    types: Vec<MigrationType>,
}

impl TypesCollector {
    pub fn new(types: Vec<MigrationType>) -> Self {
        Self { types }
    }
}

impl MigrationCollector for TypesCollector {
    fn ordered_migrations(
        &self,
        profiles: &[String],
    ) -> Result<Vec<MigrationDescriptor>, MigrationError> {
        declared_descriptors(self.types.iter(), profiles)
    }
}

/// Takes each migration's version from its fully-qualified name.
///
/// Profiles are not supported: every non-abstract type is returned whatever
/// the active profiles are.
#[derive(Debug, Clone, Default)]
pub struct NameBasedCollector {
    types: Vec<MigrationType>,
}

impl NameBasedCollector {
    pub fn new(types: Vec<MigrationType>) -> Self {
        Self { types }
    }
}

impl MigrationCollector for NameBasedCollector {
    fn ordered_migrations(
        &self,
        _profiles: &[String],
    ) -> Result<Vec<MigrationDescriptor>, MigrationError> {
        let mut descriptors = self
            .types
            .iter()
            .filter(|t| !t.is_abstract())
            .map(|t| {
                let version = parse_full_name(t.name())?;
                Ok(t.describe_as(version, BTreeSet::new()))
            })
            .collect::<Result<Vec<_>, MigrationError>>()?;
        ensure_distinct_record_ids(&descriptors, DEFAULT_SEPARATOR)?;

        descriptors.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(descriptors)
    }
}
