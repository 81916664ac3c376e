//! Derives a [`Version`] from a migration's fully-qualified name.
//!
//! Given `app.migrations.v2.M4_5_6_RenameField`, the first segment that looks
//! like a version (`v2`) and every version-looking segment after it (`M4_5_6_`)
//! contribute their numbers in order: `2.4.5.6`.

use super::types::{Version, VersionError};
use once_cell::sync::Lazy;
use regex::Regex;

/// One or two non-digit characters followed by one to four numeric groups,
/// each ended by a non-word character, an underscore or the end of the segment.
static VERSION_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<fragment>\D\D?(?:\d+(?:\W|_|$)){1,4})").expect("valid version regex")
});

static DIGIT_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\D{0,2}(?P<digits>\d+)(?:\W|_|$)").expect("valid digit regex"));

/// Parse the version encoded in a migration's fully-qualified name.
///
/// Rust paths (`a::b::C`) are accepted as well as dotted names. A single number
/// is treated as a legacy integer version and lands in the minor slot.
pub fn parse_full_name(full_name: &str) -> Result<Version, VersionError> {
    let normalized = full_name.replace("::", ".");

    let mut numbers: Vec<u32> = Vec::new();
    for segment in normalized
        .split('.')
        .skip_while(|segment| !VERSION_SEGMENT.is_match(segment))
    {
        let Some(captures) = VERSION_SEGMENT.captures(segment) else {
            continue;
        };

        for digits in DIGIT_GROUP.captures_iter(&captures["fragment"]) {
            numbers.push(parse_component(full_name, &digits["digits"])?);
        }
    }

    match numbers.as_slice() {
        [] => Err(VersionError::InvalidVersion {
            name: full_name.to_string(),
            reason: "no numbers found for version".to_string(),
        }),
        [minor] => Ok(Version::new(0, *minor, 0, 0)),
        parts if parts.len() > 4 => Err(VersionError::InvalidVersion {
            name: full_name.to_string(),
            reason: format!("too many version numbers ({})", parts.len()),
        }),
        parts => {
            let mut padded = [0u32; 4];
            padded[..parts.len()].copy_from_slice(parts);
            Ok(Version::new(padded[0], padded[1], padded[2], padded[3]))
        }
    }
}

fn parse_component(full_name: &str, digits: &str) -> Result<u32, VersionError> {
    let value: u64 = digits.parse().map_err(|_| VersionError::InvalidVersion {
        name: full_name.to_string(),
        reason: format!("'{}' is not a valid number", digits),
    })?;

    u32::try_from(value).map_err(|_| VersionError::OutOfRange(value))
}
