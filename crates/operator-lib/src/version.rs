//! Vertica server version handling
//!
//! The running version is published on the VerticaDB through the
//! `vertica.com/version` annotation, in the form `v11.0.2-1`.

use std::cmp::Ordering;
use std::fmt;

/// First version with the read-only node state
pub const NODES_HAVE_READ_ONLY_STATE_VERSION: &str = "v11.0.2";
/// First version that ships the https server
pub const HTTP_SERVER_MIN_VERSION: &str = "v12.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl VersionInfo {
    /// Parse a version string such as `v11.0.2`, `11.1.0` or `v12.0.1-0`.
    pub fn parse(version: &str) -> Option<Self> {
        let trimmed = version.trim().trim_start_matches('v');
        let core = trimmed.split('-').next()?;
        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next().unwrap_or("0").parse().ok()?;
        Some(Self {
            major,
            minor,
            patch,
        })
    }

    pub fn is_equal_or_newer(&self, other: &str) -> bool {
        match Self::parse(other) {
            Some(o) => *self >= o,
            None => false,
        }
    }

    pub fn is_older(&self, other: &str) -> bool {
        match Self::parse(other) {
            Some(o) => *self < o,
            None => false,
        }
    }
}

impl PartialOrd for VersionInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}
