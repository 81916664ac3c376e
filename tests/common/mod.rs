#![allow(dead_code)]

use async_trait::async_trait;
use docshift::migration::{
    InjectingResolver, Migration, MigrationContext, MigrationOptions, MigrationSource,
    MigrationType, ServiceProvider,
};
use docshift::store::{Document, DocumentStore, MemoryStore};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Create a temporary directory for testing
pub fn create_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Ordered log of migration invocations, shared with migrations through the
/// service provider.
#[derive(Default)]
pub struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    pub fn record(&self, entry: String) {
        self.entries.lock().expect("journal poisoned").push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().expect("journal poisoned").clone()
    }

    pub fn clear(&self) {
        self.entries.lock().expect("journal poisoned").clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    FailUp,
    PanicUp,
    /// Panic in `setup`, before either direction runs.
    PanicSetup,
    FailDown,
    /// Succeed after sleeping this many milliseconds.
    Slow(u64),
}

/// Migration that logs `up:<label>` / `down:<label>` to the journal and then
/// behaves as told. A failing setup logs `setup:<label>`.
pub struct Journaled {
    label: String,
    behavior: Behavior,
    journal: Arc<Journal>,
}

#[async_trait]
impl Migration for Journaled {
    fn setup(&mut self, _ctx: &MigrationContext) {
        if self.behavior == Behavior::PanicSetup {
            self.journal.record(format!("setup:{}", self.label));
            panic!("{} could not be set up", self.label);
        }
    }

    async fn up(&self, _ctx: &MigrationContext) -> anyhow::Result<()> {
        self.journal.record(format!("up:{}", self.label));
        match self.behavior {
            Behavior::FailUp => anyhow::bail!("{} refused to apply", self.label),
            Behavior::PanicUp => panic!("{} exploded", self.label),
            Behavior::Slow(ms) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(())
            }
            Behavior::Succeed | Behavior::FailDown | Behavior::PanicSetup => Ok(()),
        }
    }

    async fn down(&self, _ctx: &MigrationContext) -> anyhow::Result<()> {
        self.journal.record(format!("down:{}", self.label));
        match self.behavior {
            Behavior::FailDown => anyhow::bail!("{} refused to revert", self.label),
            _ => Ok(()),
        }
    }
}

fn journaled_type(name: String, label: &str, behavior: Behavior) -> MigrationType {
    let owned = label.to_string();
    MigrationType::injected(name, move |services| {
        Ok(Box::new(Journaled {
            label: owned.clone(),
            behavior,
            journal: services.require::<Journal>()?,
        }) as Box<dyn Migration>)
    })
}

/// Register a journaled migration named `tests::<label>`.
pub fn journaled(label: &str, version: u32, behavior: Behavior) -> MigrationType {
    journaled_type(format!("tests::{}", label), label, behavior).version(version)
}

/// Register a succeeding journaled migration that declares no version, for
/// name-based collection.
pub fn named(full_name: &str, label: &str) -> MigrationType {
    journaled_type(full_name.to_string(), label, Behavior::Succeed)
}

/// Options resolving migrations with `journal` injected.
pub fn options(journal: &Arc<Journal>, types: Vec<MigrationType>) -> MigrationOptions {
    let source = types
        .into_iter()
        .fold(MigrationSource::new("tests"), |source, ty| source.register(ty));

    MigrationOptions::new()
        .with_source(source)
        .with_resolver(Arc::new(InjectingResolver::new(
            ServiceProvider::new().add_shared(Arc::clone(journal)),
        )))
}

/// Alpha (1), Bravo (2), Charlie (3), all succeeding.
pub fn alphabet() -> Vec<MigrationType> {
    vec![
        journaled("Charlie", 3, Behavior::Succeed),
        journaled("Alpha", 1, Behavior::Succeed),
        journaled("Bravo", 2, Behavior::Succeed),
    ]
}

pub const ALPHA_ID: &str = "migrationrecord/alpha/1";
pub const BRAVO_ID: &str = "migrationrecord/bravo/2";
pub const CHARLIE_ID: &str = "migrationrecord/charlie/3";

/// Joins `FirstName` and `LastName` of every person into `Name`, and splits
/// them again on the way down.
#[derive(Default)]
pub struct AddFullName;

#[async_trait]
impl Migration for AddFullName {
    async fn up(&self, ctx: &MigrationContext) -> anyhow::Result<()> {
        ctx.alter()
            .collection("People", |person| {
                let Some(fields) = person.as_object_mut() else {
                    return false;
                };
                let first = fields.get("FirstName").and_then(Value::as_str);
                let last = fields.get("LastName").and_then(Value::as_str);
                let (Some(first), Some(last)) = (first, last) else {
                    return false;
                };

                let name = format!("{} {}", first, last);
                fields.remove("FirstName");
                fields.remove("LastName");
                fields.insert("Name".to_string(), Value::String(name));
                true
            })
            .await?;
        Ok(())
    }

    async fn down(&self, ctx: &MigrationContext) -> anyhow::Result<()> {
        ctx.alter()
            .collection("People", |person| {
                let Some(fields) = person.as_object_mut() else {
                    return false;
                };
                let Some(name) = fields.get("Name").and_then(Value::as_str) else {
                    return false;
                };

                let (first, last) = name.split_once(' ').unwrap_or((name, ""));
                let (first, last) = (first.to_string(), last.to_string());
                fields.remove("Name");
                fields.insert("FirstName".to_string(), Value::String(first));
                fields.insert("LastName".to_string(), Value::String(last));
                true
            })
            .await?;
        Ok(())
    }
}

/// Store a person document.
pub async fn seed_person(store: &MemoryStore, id: &str, first: &str, last: &str) {
    store
        .store(Document::new(
            id,
            "People",
            json!({"FirstName": first, "LastName": last}),
        ))
        .await
        .expect("Should store person");
}
