//! Validation of version and version-rule strings.

use crate::rule::{VersionRule, LATEST};
use crate::version::Version;
use once_cell::sync::Lazy;
use regex::Regex;

const VERSION_PATTERN: &str = r"\d{1,5}(?:\.\d{1,5})*";

static EXPLICIT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("^{VERSION_PATTERN}$")).expect("Invalid version regex")
});

static RULE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        "^(?:{LATEST}|{VERSION_PATTERN}-{VERSION_PATTERN}|{VERSION_PATTERN}\\+)$"
    ))
    .expect("Invalid version rule regex")
});

/// Checks version strings supplied by clients.
///
/// Restricted mode accepts explicit versions only. Full mode also accepts
/// `latest`, ranges and at-least rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionValidator {
    allow_rules: bool,
}

impl VersionValidator {
    pub fn new(allow_rules: bool) -> Self {
        Self { allow_rules }
    }

    pub fn restricted() -> Self {
        Self::new(false)
    }

    pub fn full() -> Self {
        Self::new(true)
    }

    pub fn is_valid(&self, input: &str) -> bool {
        let explicit = EXPLICIT_RE.is_match(input) && Version::parse(input).is_ok();
        if explicit || !self.allow_rules {
            return explicit;
        }
        // The pattern checks shape; segment bounds are checked by parsing.
        RULE_RE.is_match(input) && VersionRule::parse(input).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MALFORMED: [&str; 6] = ["", "a", "60000", ".", "1.", ".1"];

    #[test]
    fn test_latest_only_in_full_mode() {
        assert!(!VersionValidator::restricted().is_valid("latest"));
        assert!(VersionValidator::full().is_valid("latest"));
    }

    #[test]
    fn test_range() {
        assert!(!VersionValidator::restricted().is_valid("1.1-2.2"));
        let full = VersionValidator::full();
        for bad in ["-", "1.1-", "-1.1", "1.a-2.b", "1.-.2", "60000-1"] {
            assert!(!full.is_valid(bad), "{bad} should be rejected");
        }
        assert!(full.is_valid("1.1-2.2"));
    }

    #[test]
    fn test_at_least() {
        assert!(!VersionValidator::restricted().is_valid("1.0+"));
        let full = VersionValidator::full();
        for bad in ["+", "+1.0", "1.a+", ".1+", "1.+", ".+", "60000+"] {
            assert!(!full.is_valid(bad), "{bad} should be rejected");
        }
        assert!(full.is_valid("1.0+"));
    }

    #[test]
    fn test_explicit_in_both_modes() {
        for validator in [VersionValidator::restricted(), VersionValidator::full()] {
            for bad in MALFORMED {
                assert!(!validator.is_valid(bad), "{bad} should be rejected");
            }
            assert!(validator.is_valid("1.4"));
        }
    }

    #[test]
    fn test_six_digit_group_rejected() {
        assert!(!VersionValidator::restricted().is_valid("100000"));
        assert!(VersionValidator::restricted().is_valid("32767.0"));
    }
}
