//! Name-based tag classification
//!
//! Both predicates look at the tag name only. Registry metadata never
//! influences whether a tag counts as a release or a development build.

use regex::Regex;
use std::sync::LazyLock;

// Prefix match: "1.2.3-slim" and "v8" qualify, "stable-1.2" does not.
static SEMVER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?\d+(\.\d+)*").unwrap_or_else(|e| panic!("semver pattern: {e}"))
});

static DEV: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(-dev$|-alpha|-beta|-rc|^sha256-|-r\d+$|nightly|latest)")
        .unwrap_or_else(|e| panic!("dev pattern: {e}"))
});

/// True if the name starts with an optional `v` and dot-separated integers
pub fn is_semver(name: &str) -> bool {
    SEMVER.is_match(name)
}

/// True for preview, revision, digest-alias and floating tags
pub fn is_dev(name: &str) -> bool {
    DEV.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semver_prefix_match() {
        for name in ["1", "1.2", "1.2.3", "v1.2.3", "3.12-slim", "1.21.0-alpine3.19", "8.0.1-foo"] {
            assert!(is_semver(name), "{name} should be semver");
        }
    }

    #[test]
    fn test_non_semver_names() {
        for name in ["latest", "slim", "bookworm", "V1.2", "stable-1.2", "", "v", "nightly-1.0"] {
            assert!(!is_semver(name), "{name} should not be semver");
        }
    }

    #[test]
    fn test_dev_markers() {
        for name in [
            "1.0-dev",
            "2.0.0-alpha.1",
            "2.0.0-BETA",
            "1.1.0-rc1",
            "sha256-abcdef.sig",
            "3.12-r2",
            "nightly",
            "build-Nightly-2024",
            "latest",
            "latest-dev",
            "LATEST",
        ] {
            assert!(is_dev(name), "{name} should be dev");
        }
    }

    #[test]
    fn test_release_names_are_not_dev() {
        for name in ["1.0.0", "3.12-slim", "1.0-development", "1.0-r", "r1", "1.0-r2a", "sha256"] {
            assert!(!is_dev(name), "{name} should not be dev");
        }
    }
}
