use crate::error::{CoreError, Result};
use std::cmp::Ordering;
use std::fmt;

/// Parsed server version, e.g. `v24.3.0-1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionInfo {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl VersionInfo {
    /// Parse `v24.3.0`, `24.3.0` or `v24.3.0-1`. Anything after a dash is a
    /// hotfix suffix and is ignored.
    pub fn parse(version: &str) -> Result<Self> {
        let trimmed = version.trim();
        let core = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let core = core.split('-').next().unwrap_or(core);
        let mut parts = core.split('.');
        let mut next = || -> Result<u32> {
            parts
                .next()
                .and_then(|p| p.parse::<u32>().ok())
                .ok_or_else(|| CoreError::invalid_version(version))
        };
        let major = next()?;
        let minor = next()?;
        let patch = next()?;
        Ok(Self {
            major,
            minor,
            patch,
        })
    }

    /// True if this version is strictly older than `other`
    pub fn is_older(&self, other: &VersionInfo) -> bool {
        self.cmp(other) == Ordering::Less
    }

    /// True if this version is at or above `min`, given in string form
    pub fn is_equal_or_newer(&self, min: &str) -> Result<bool> {
        Ok(!self.is_older(&VersionInfo::parse(min)?))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variants() {
        let v = VersionInfo::parse("v24.3.0-1").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (24, 3, 0));
        assert_eq!(VersionInfo::parse("23.4.0").unwrap().to_string(), "v23.4.0");
        assert!(VersionInfo::parse("v24").is_err());
        assert!(VersionInfo::parse("latest").is_err());
    }

    #[test]
    fn test_ordering() {
        let old = VersionInfo::parse("v24.2.0").unwrap();
        let new = VersionInfo::parse("v24.3.0").unwrap();
        assert!(old.is_older(&new));
        assert!(!new.is_older(&old));
        assert!(new.is_equal_or_newer("v24.3.0").unwrap());
        assert!(!old.is_equal_or_newer("v24.3.0").unwrap());
    }
}
