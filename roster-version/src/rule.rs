//! Version-selection rules.
//!
//! Grammar:
//!
//! ```text
//! rule    := "latest" | version "-" version | version "+"
//! version := digits ("." digits)*      each group <= 32767
//! ```
//!
//! Matching always returns candidates highest version first. Ranges are
//! half-open: `1.4-1.8` selects `1.4 <= v < 1.8`, and the bounds may be
//! given in either order. A bare version is not a rule; only
//! [`version_match_rule`] treats it as an exact match.

use crate::version::{key_version, Version};
use roster_core::KeyValue;

pub const LATEST: &str = "latest";

/// A parsed version-selection rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionRule {
    Latest,
    Exact(Version),
    Range(Version, Version),
    AtLeast(Version),
}

impl VersionRule {
    /// Parse a rule. `None` when the text is not a valid rule.
    pub fn parse(rule: &str) -> Option<Self> {
        if rule == LATEST {
            return Some(VersionRule::Latest);
        }
        if let Some(low) = rule.strip_suffix('+') {
            return Version::parse(low).ok().map(VersionRule::AtLeast);
        }
        if let Some((a, b)) = rule.split_once('-') {
            let a = Version::parse(a).ok()?;
            let b = Version::parse(b).ok()?;
            return Some(VersionRule::Range(a, b));
        }
        None
    }

    /// True when `version` falls inside this rule. `Latest` cannot be
    /// decided for a single version and always answers true.
    pub fn contains(&self, version: &Version) -> bool {
        match self {
            VersionRule::Latest => true,
            VersionRule::Exact(v) => version == v,
            VersionRule::Range(a, b) => {
                let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                version >= lo && version < hi
            }
            VersionRule::AtLeast(lo) => version >= lo,
        }
    }

    /// Select matching candidates, highest version first.
    ///
    /// Candidates whose version does not parse never match. `Latest`
    /// yields the highest valid candidate, the earliest one on ties.
    pub fn select<'a, T>(&self, candidates: &'a [T], version_of: impl Fn(&T) -> &str) -> Vec<&'a T> {
        let valid = candidates
            .iter()
            .filter_map(|c| Version::parse(version_of(c)).ok().map(|v| (v, c)));

        if let VersionRule::Latest = self {
            let mut best: Option<(Version, &'a T)> = None;
            for (v, c) in valid {
                if best.as_ref().map_or(true, |(top, _)| v > *top) {
                    best = Some((v, c));
                }
            }
            return best.map(|(_, c)| c).into_iter().collect();
        }

        let mut matched: Vec<(Version, &'a T)> = valid.filter(|(v, _)| self.contains(v)).collect();
        // Stable, so equal versions keep their input order.
        matched.sort_by(|(a, _), (b, _)| b.cmp(a));
        matched.into_iter().map(|(_, c)| c).collect()
    }

    /// Select registry entries, reading each version from the last key
    /// segment.
    pub fn select_kvs<'a>(&self, kvs: &'a [KeyValue]) -> Vec<&'a KeyValue> {
        self.select(kvs, |kv| key_version(&kv.key))
    }
}

/// Parse a rule string. Returns `None` for empty or malformed input.
pub fn parse_version_rule(rule: &str) -> Option<VersionRule> {
    VersionRule::parse(rule)
}

/// Decide whether a single version satisfies a rule string.
///
/// `latest` is true for every version. Text that is not a rule falls back
/// to equality, by string or by parsed version.
pub fn version_match_rule(version: &str, rule: &str) -> bool {
    if rule.is_empty() {
        return false;
    }
    if let Some(parsed) = VersionRule::parse(rule) {
        return Version::parse(version).is_ok_and(|v| parsed.contains(&v));
    }
    if version == rule {
        return true;
    }
    match (Version::parse(version), Version::parse(rule)) {
        (Ok(v), Ok(expected)) => VersionRule::Exact(expected).contains(&v),
        _ => false,
    }
}
