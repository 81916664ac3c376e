//! Turning registered migration types into instances.

use super::descriptor::{Constructor, MigrationType};
use super::error::MigrationError;
use super::types::Migration;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a migration instance from its registration.
pub trait MigrationResolver: Send + Sync {
    fn resolve(&self, migration_type: &MigrationType) -> Result<Box<dyn Migration>, MigrationError>;
}

/// Resolver for migrations without constructor dependencies.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResolver;

impl MigrationResolver for DefaultResolver {
    fn resolve(&self, migration_type: &MigrationType) -> Result<Box<dyn Migration>, MigrationError> {
        match migration_type.constructor() {
            Constructor::Default(factory) => Ok(factory()),
            Constructor::Abstract => Err(abstract_type(migration_type)),
            Constructor::Injected(_) => Err(MigrationError::Resolution {
                name: migration_type.name().to_string(),
                reason: "constructor requires injected services; use an InjectingResolver"
                    .to_string(),
            }),
        }
    }
}

/// Services available to injected migration constructors, keyed by type.
#[derive(Default, Clone)]
pub struct ServiceProvider {
    services: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ServiceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service, replacing any previous one of the same type.
    pub fn add<T: Any + Send + Sync>(mut self, service: T) -> Self {
        self.services.insert(TypeId::of::<T>(), Arc::new(service));
        self
    }

    pub fn add_shared<T: Any + Send + Sync>(mut self, service: Arc<T>) -> Self {
        self.services.insert(TypeId::of::<T>(), service);
        self
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|service| service.downcast::<T>().ok())
    }

    /// Like [`ServiceProvider::get`], failing when the service is missing.
    pub fn require<T: Any + Send + Sync>(&self) -> anyhow::Result<Arc<T>> {
        self.get::<T>()
            .ok_or_else(|| anyhow::anyhow!("no service registered for {}", type_name::<T>()))
    }
}

/// Resolver that hands a [`ServiceProvider`] to injected constructors.
#[derive(Clone)]
pub struct InjectingResolver {
    services: Arc<ServiceProvider>,
}

impl InjectingResolver {
    pub fn new(services: ServiceProvider) -> Self {
        Self {
            services: Arc::new(services),
        }
    }
}

impl MigrationResolver for InjectingResolver {
    fn resolve(&self, migration_type: &MigrationType) -> Result<Box<dyn Migration>, MigrationError> {
        match migration_type.constructor() {
            Constructor::Default(factory) => Ok(factory()),
            Constructor::Injected(factory) => {
                factory(&self.services).map_err(|e| MigrationError::Resolution {
                    name: migration_type.name().to_string(),
                    reason: format!("{:#}", e),
                })
            }
            Constructor::Abstract => Err(abstract_type(migration_type)),
        }
    }
}

fn abstract_type(migration_type: &MigrationType) -> MigrationError {
    MigrationError::Resolution {
        name: migration_type.name().to_string(),
        reason: "abstract types cannot be instantiated".to_string(),
    }
}
