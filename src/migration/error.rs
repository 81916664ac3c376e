use super::types::MigrationDirection;
use crate::store::StoreError;
use crate::version::VersionError;
use thiserror::Error;

/// Error types for migration operations.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// A registered type is unusable as a migration; the run does not start.
    #[error("Discovery failed for {name}: {reason}")]
    Discovery { name: String, reason: String },

    #[error("Could not resolve migration {name}: {reason}")]
    Resolution { name: String, reason: String },

    /// `up` or `down` failed and the error policy propagates instead of
    /// recording the failure.
    #[error("Migration {name} failed during {direction}: {message}")]
    Application {
        name: String,
        direction: MigrationDirection,
        message: String,
    },

    /// A failure is recorded against this migration and has not been marked
    /// fixed. Returned when the failure is first captured and on every later
    /// run that reaches the same record.
    #[error("Migration {id} halted the run during {direction}: {message}")]
    Halted {
        id: String,
        direction: MigrationDirection,
        message: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Version error: {0}")]
    Version(#[from] VersionError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
