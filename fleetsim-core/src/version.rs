//! OS version catalog and upgrade rules.
//!
//! Versions are strings of the form "family + release" such as
//! `"Windows 11 23H2"` or `"Ubuntu 22.04 LTS"`. The first word is the family;
//! every following word that starts with a number contributes one numeric
//! component to the release key (`[11, 23]`, `[22.04]`). Release keys are
//! compared component by component.

use std::cmp::Ordering;

use serde::Serialize;

/// Versions installed on freshly generated devices.
pub const FLEET_OS_VERSIONS: [&str; 10] = [
    "Windows 10 21H2",
    "Windows 10 22H2",
    "Windows 11 21H2",
    "Windows 11 22H2",
    "Windows 11 23H2",
    "Ubuntu 20.04 LTS",
    "Ubuntu 22.04 LTS",
    "macOS Monterey",
    "macOS Ventura",
    "macOS Sonoma",
];

/// Versions offered by the wizard.
pub const SELECTABLE_OS_VERSIONS: [&str; 11] = [
    "Windows 10 21H2",
    "Windows 10 22H2",
    "Windows 11 21H2",
    "Windows 11 22H2",
    "Windows 11 23H2",
    "Ubuntu 20.04 LTS",
    "Ubuntu 22.04 LTS",
    "Ubuntu 24.04 LTS",
    "macOS Monterey 12.6",
    "macOS Ventura 13.5",
    "macOS Sonoma 14.2",
];

/// A parsed OS version string.
#[derive(Debug, Clone, PartialEq)]
pub struct OsVersion {
    pub family: String,
    pub release: Vec<f64>,
}

impl OsVersion {
    /// Parse a "family + release" string. Returns `None` for blank input.
    pub fn parse(s: &str) -> Option<Self> {
        let mut words = s.split_whitespace();
        let family = words.next()?.to_string();
        let release = words.filter_map(leading_number).collect();
        Some(Self { family, release })
    }

    /// Compare release keys. `None` when either side carries no number.
    pub fn compare_release(&self, other: &OsVersion) -> Option<Ordering> {
        if self.release.is_empty() || other.release.is_empty() {
            return None;
        }
        for (a, b) in self.release.iter().zip(other.release.iter()) {
            match a.partial_cmp(b)? {
                Ordering::Equal => continue,
                unequal => return Some(unequal),
            }
        }
        Some(self.release.len().cmp(&other.release.len()))
    }

    pub fn same_family(&self, other: &OsVersion) -> bool {
        self.family.eq_ignore_ascii_case(&other.family)
    }
}

/// Parse the numeric prefix of a word ("23H2" -> 23, "22.04" -> 22.04).
fn leading_number(word: &str) -> Option<f64> {
    let end = word
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
        .map(|(i, _)| i)
        .unwrap_or(word.len());
    word[..end].trim_end_matches('.').parse().ok()
}

/// True when `to` is an older release than `from`.
///
/// Versions whose release cannot be compared are not treated as downgrades.
pub fn is_downgrade(from: &str, to: &str) -> bool {
    match (OsVersion::parse(from), OsVersion::parse(to)) {
        (Some(from), Some(to)) => from.compare_release(&to) == Some(Ordering::Greater),
        _ => false,
    }
}

/// Outcome of the pre-flight compatibility check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Compatibility {
    pub is_compatible: bool,
    pub message: String,
}

/// Run the compatibility check between two versions.
pub fn check_compatibility(from: &str, to: &str) -> Compatibility {
    let (Some(from_v), Some(to_v)) = (OsVersion::parse(from), OsVersion::parse(to)) else {
        return Compatibility {
            is_compatible: false,
            message: "Both versions are required.".to_string(),
        };
    };

    if !from_v.same_family(&to_v) {
        Compatibility {
            is_compatible: false,
            message: "Cross-OS updates are restricted.".to_string(),
        }
    } else if is_downgrade(from, to) {
        Compatibility {
            is_compatible: false,
            message: "Version regression is not allowed.".to_string(),
        }
    } else {
        Compatibility {
            is_compatible: true,
            message: "Versions are compatible for upgrade.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_release_components() {
        let v = OsVersion::parse("Windows 11 23H2").unwrap();
        assert_eq!(v.family, "Windows");
        assert_eq!(v.release, vec![11.0, 23.0]);

        let u = OsVersion::parse("Ubuntu 22.04 LTS").unwrap();
        assert_eq!(u.release, vec![22.04]);

        let m = OsVersion::parse("macOS Ventura").unwrap();
        assert!(m.release.is_empty());

        assert!(OsVersion::parse("   ").is_none());
    }

    #[test]
    fn test_downgrade_detection() {
        assert!(is_downgrade("Windows 11 22H2", "Windows 10 21H2"));
        assert!(is_downgrade("Windows 11 23H2", "Windows 11 22H2"));
        assert!(!is_downgrade("Windows 11 22H2", "Windows 11 23H2"));
        assert!(!is_downgrade("Windows 10 22H2", "Windows 10 22H2"));
        assert!(is_downgrade("Ubuntu 22.04 LTS", "Ubuntu 20.04 LTS"));
        assert!(!is_downgrade("macOS Monterey", "macOS Sonoma"));
    }

    #[test]
    fn test_compatibility_rules() {
        let cross = check_compatibility("Windows 11 22H2", "Ubuntu 22.04 LTS");
        assert!(!cross.is_compatible);
        assert_eq!(cross.message, "Cross-OS updates are restricted.");

        let regression = check_compatibility("Windows 11 22H2", "Windows 10 21H2");
        assert!(!regression.is_compatible);
        assert_eq!(regression.message, "Version regression is not allowed.");

        assert!(check_compatibility("macOS Monterey 12.6", "macOS Sonoma 14.2").is_compatible);
    }

    #[test]
    fn test_catalogs_parse() {
        for v in FLEET_OS_VERSIONS.iter().chain(SELECTABLE_OS_VERSIONS.iter()) {
            assert!(OsVersion::parse(v).is_some(), "{v}");
        }
    }
}
