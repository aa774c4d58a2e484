//! ROSTER Version - Version Rules
//!
//! Parses dotted numeric versions, orders them, and evaluates the
//! version-selection rules consumers use to pick provider versions
//! (`latest`, `1.4-1.8`, `1.6+`, or an explicit version).

pub mod rule;
pub mod validator;
pub mod version;

pub use rule::{parse_version_rule, version_match_rule, VersionRule, LATEST};
pub use validator::VersionValidator;
pub use version::{compare, key_version, sort_descending, Version, VersionParseError, MAX_SEGMENT};
