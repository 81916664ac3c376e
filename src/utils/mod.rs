use crate::version::Version;
use std::any::Any;

/// Prefix of every migration record id.
pub const RECORD_ID_PREFIX: &str = "MigrationRecord";

/// Prefix of every hotfix record id.
pub const HOTFIX_ID_PREFIX: &str = "HotfixRecord";

/// Collection holding migration records.
pub const RECORD_COLLECTION: &str = "MigrationRecords";

/// Collection holding hotfix records.
pub const HOTFIX_COLLECTION: &str = "HotfixRecords";

/// Well-known compare-exchange key of the run lock.
pub const LOCK_KEY: &str = "LockMigrations";

/// Default separator between id parts.
pub const DEFAULT_SEPARATOR: char = '/';

/// Default lifetime of a run lock lease, in seconds.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 60 * 60;

/// Default name of the configuration file.
pub const CONFIG_FILE: &str = "docshift.json";

/// Turn a type name into id parts: underscores and separators become a single
/// separator, leading and trailing ones are dropped, and the result is
/// lower-cased.
pub fn normalize_type_name(type_name: &str, separator: char) -> String {
    type_name
        .split(|c: char| c == '_' || c == separator)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(&separator.to_string())
        .to_lowercase()
}

/// Version as it appears in ids: the bare number for integer-declared
/// versions, the dotted form otherwise.
pub fn version_tag(version: &Version) -> String {
    if version.is_legacy() {
        version.minor.to_string()
    } else {
        version.to_string()
    }
}

/// Deterministic `<prefix><sep><name><sep><version>` id, lower-cased.
pub fn versioned_document_id(
    prefix: &str,
    type_name: &str,
    version: &Version,
    separator: char,
) -> String {
    let name = normalize_type_name(type_name, separator);
    let mut parts = vec![prefix.to_lowercase()];
    if !name.is_empty() {
        parts.push(name);
    }
    parts.push(version_tag(version));
    parts.join(&separator.to_string())
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
