//! Migration versions.
//!
//! This module provides the four-component [`Version`] used to order
//! migrations, plus the parser that derives a version from a migration's
//! fully-qualified name.

mod parser;
mod types;

pub use parser::parse_full_name;
pub use types::{Version, VersionError};

use std::cmp::Ordering;

/// Compare two versions for the given run direction.
///
/// Forward runs visit versions in ascending order, reverse runs in descending
/// order.
pub fn compare_for_direction(a: &Version, b: &Version, ascending: bool) -> Ordering {
    if ascending {
        a.cmp(b)
    } else {
        b.cmp(a)
    }
}
