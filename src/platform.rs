// src/platform.rs

//! Platform identity for bottle selection
//!
//! A platform is written `os-arch[-tag]`, for example `linux-x86_64` or
//! `macos-x86_64-high_sierra`. The optional tag carries an ABI or OS release
//! name. Matching is exact and component-wise: binary compatibility cannot be
//! inferred from neighbouring tags, so there is no fuzzy or fallback matching.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Characters that turn a component into a pattern rather than a concrete value
const WILDCARD_CHARS: &[char] = &['*', '?'];

/// A fully-qualified platform identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Platform {
    os: String,
    arch: String,
    tag: Option<String>,
}

impl Platform {
    /// Create a platform from its components (lowercased)
    pub fn new(os: &str, arch: &str) -> Self {
        Self {
            os: os.trim().to_lowercase(),
            arch: arch.trim().to_lowercase(),
            tag: None,
        }
    }

    /// Attach an ABI / OS-release tag
    pub fn with_tag(mut self, tag: &str) -> Self {
        let tag = tag.trim().to_lowercase();
        self.tag = if tag.is_empty() { None } else { Some(tag) };
        self
    }

    /// The platform this binary was compiled for
    pub fn current() -> Self {
        Self::new(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Parse `os-arch[-tag]`
    ///
    /// Wildcard characters are accepted here so callers can report them
    /// precisely; use [`Platform::require_concrete`] before matching.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.trim().splitn(3, '-');
        let os = parts.next().unwrap_or_default();
        let arch = parts.next().unwrap_or_default();
        let tag = parts.next();

        if os.is_empty() || arch.is_empty() || tag.is_some_and(str::is_empty) {
            return Err(Error::InvalidPlatform(format!(
                "'{}' is not of the form os-arch[-tag]",
                s
            )));
        }

        let platform = Self::new(os, arch);
        Ok(match tag {
            Some(tag) => platform.with_tag(tag),
            None => platform,
        })
    }

    pub fn os(&self) -> &str {
        &self.os
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// True when no component contains a wildcard
    pub fn is_concrete(&self) -> bool {
        [Some(self.os.as_str()), Some(self.arch.as_str()), self.tag.as_deref()]
            .into_iter()
            .flatten()
            .all(|c| !c.contains(WILDCARD_CHARS))
    }

    /// Fail with `InvalidPlatform` unless the identifier is concrete
    pub fn require_concrete(&self) -> Result<()> {
        if self.is_concrete() {
            Ok(())
        } else {
            Err(Error::InvalidPlatform(format!(
                "'{}' contains a wildcard; a concrete platform is required",
                self
            )))
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{}-{}-{}", self.os, self.arch, tag),
            None => write!(f, "{}-{}", self.os, self.arch),
        }
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        let p = Platform::parse("macos-x86_64-high_sierra").unwrap();
        assert_eq!(p.os(), "macos");
        assert_eq!(p.arch(), "x86_64");
        assert_eq!(p.tag(), Some("high_sierra"));
        assert_eq!(p.to_string(), "macos-x86_64-high_sierra");

        let linux: Platform = "Linux-X64".parse().unwrap();
        assert_eq!(linux.to_string(), "linux-x64");
        assert_eq!(linux.tag(), None);
    }

    #[test]
    fn test_parse_rejects_incomplete() {
        assert!(Platform::parse("linux").is_err());
        assert!(Platform::parse("-x86_64").is_err());
        assert!(Platform::parse("linux-x86_64-").is_err());
        assert!(Platform::parse("").is_err());
    }

    #[test]
    fn test_wildcards_are_not_concrete() {
        assert!(!Platform::parse("linux-*").unwrap().is_concrete());
        assert!(!Platform::parse("macos-x86_64-?").unwrap().is_concrete());
        assert!(Platform::parse("linux-*").unwrap().require_concrete().is_err());
        assert!(Platform::current().is_concrete());
    }

    #[test]
    fn test_tag_is_significant() {
        let sierra = Platform::parse("macos-x86_64-sierra").unwrap();
        let high_sierra = Platform::parse("macos-x86_64-high_sierra").unwrap();
        let untagged = Platform::parse("macos-x86_64").unwrap();
        assert_ne!(sierra, high_sierra);
        assert_ne!(sierra, untagged);
    }
}
