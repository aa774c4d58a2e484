//! Dotted numeric versions.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest value a single version segment may hold.
pub const MAX_SEGMENT: u32 = 32767;

/// Reason a version string was rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VersionParseError {
    #[error("Empty version")]
    Empty,

    #[error("Segment {segment:?} of {input:?} is not a decimal number")]
    NotNumeric { input: String, segment: String },

    #[error("Segment {segment} of {input:?} exceeds {max}", max = MAX_SEGMENT)]
    SegmentTooLarge { input: String, segment: String },
}

/// A parsed version: non-empty sequence of segments, each in `[0, 32767]`.
///
/// Comparison pads the shorter version with trailing zeros, so `1.0` and
/// `1.0.0` are equal.
#[derive(Debug, Clone)]
pub struct Version {
    segments: Vec<u16>,
}

impl Version {
    pub fn parse(input: &str) -> Result<Self, VersionParseError> {
        if input.is_empty() {
            return Err(VersionParseError::Empty);
        }

        let mut segments = Vec::new();
        for part in input.split('.') {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionParseError::NotNumeric {
                    input: input.to_string(),
                    segment: part.to_string(),
                });
            }
            // Long digit runs overflow u32 before they can be range-checked.
            let value = part
                .parse::<u32>()
                .ok()
                .filter(|v| *v <= MAX_SEGMENT)
                .ok_or_else(|| VersionParseError::SegmentTooLarge {
                    input: input.to_string(),
                    segment: part.to_string(),
                })?;
            segments.push(value as u16);
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[u16] {
        &self.segments
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for s in &self.segments {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{s}")?;
            first = false;
        }
        Ok(())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        for i in 0..len {
            let a = self.segments.get(i).copied().unwrap_or(0);
            let b = other.segments.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

/// Compare two version strings. `None` when either side is invalid.
pub fn compare(a: &str, b: &str) -> Option<Ordering> {
    let a = Version::parse(a).ok()?;
    let b = Version::parse(b).ok()?;
    Some(a.cmp(&b))
}

/// Stable in-place sort, highest version first.
///
/// Invalid versions are incomparable with everything: an item only moves
/// past a neighbour it is strictly greater than, so invalid entries keep
/// their position relative to whatever they sit next to.
pub fn sort_descending<T>(items: &mut [T], version_of: impl Fn(&T) -> &str) {
    let parsed: Vec<Option<Version>> = items
        .iter()
        .map(|item| Version::parse(version_of(item)).ok())
        .collect();
    let mut order: Vec<usize> = (0..items.len()).collect();

    for i in 1..order.len() {
        let mut j = i;
        while j > 0 {
            let greater = match (&parsed[order[j]], &parsed[order[j - 1]]) {
                (Some(cur), Some(prev)) => cur > prev,
                _ => false,
            };
            if !greater {
                break;
            }
            order.swap(j, j - 1);
            j -= 1;
        }
    }

    apply_permutation(items, order);
}

// Moves items so that position i holds the element previously at order[i].
fn apply_permutation<T>(items: &mut [T], mut order: Vec<usize>) {
    for i in 0..order.len() {
        let mut current = i;
        while order[current] != i {
            let next = order[current];
            items.swap(current, next);
            order[current] = current;
            current = next;
        }
        order[current] = current;
    }
}

/// Version encoded in the last `/`-separated segment of a registry key.
pub fn key_version(key: &[u8]) -> &str {
    let tail = key.rsplit(|b| *b == b'/').next().unwrap_or_default();
    std::str::from_utf8(tail).unwrap_or_default()
}
