// src/recipe/kitchen/toolchain.rs

//! Compiler detection
//!
//! Candidate names are classified by an ordered list of rules; the first rule
//! that matches wins. New compiler names are supported by appending a rule.

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

/// Compiler family recognized from a command name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerKind {
    Gcc,
    Clang,
    Generic,
}

impl fmt::Display for CompilerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gcc => "gcc",
            Self::Clang => "clang",
            Self::Generic => "cc",
        })
    }
}

/// How a rule tests a compiler name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamePattern {
    Prefix(String),
    Suffix(String),
    Contains(String),
}

impl NamePattern {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Prefix(p) => name.starts_with(p.as_str()),
            Self::Suffix(s) => name.ends_with(s.as_str()),
            Self::Contains(c) => name.contains(c.as_str()),
        }
    }
}

/// Ordered `(pattern, kind)` rules
#[derive(Debug, Clone)]
pub struct CompilerMatcher {
    rules: Vec<(NamePattern, CompilerKind)>,
}

impl Default for CompilerMatcher {
    fn default() -> Self {
        Self {
            rules: vec![
                (NamePattern::Prefix("gcc".into()), CompilerKind::Gcc),
                (NamePattern::Prefix("cc".into()), CompilerKind::Generic),
                (NamePattern::Suffix("gcc".into()), CompilerKind::Gcc),
                (NamePattern::Suffix("cc".into()), CompilerKind::Generic),
                (NamePattern::Contains("clang".into()), CompilerKind::Clang),
            ],
        }
    }
}

impl CompilerMatcher {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule; it is consulted after every existing rule
    pub fn with_rule(mut self, pattern: NamePattern, kind: CompilerKind) -> Self {
        self.rules.push((pattern, kind));
        self
    }

    /// Classify a compiler by the file name part of `name`
    pub fn classify(&self, name: &str) -> Option<CompilerKind> {
        let base = name.rsplit('/').next().unwrap_or(name);
        self.rules
            .iter()
            .find(|(pattern, _)| pattern.matches(base))
            .map(|(_, kind)| *kind)
    }
}

/// A compiler found on the search path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedCompiler {
    pub name: String,
    pub path: PathBuf,
    pub kind: CompilerKind,
}

/// Pick the first candidate that classifies and exists on `search_path`
pub fn select_compiler(
    matcher: &CompilerMatcher,
    candidates: &[String],
    search_path: Option<OsString>,
) -> Option<SelectedCompiler> {
    let cwd = std::env::current_dir().ok()?;

    candidates.iter().find_map(|name| {
        let kind = matcher.classify(name)?;
        let path = which::which_in(name, search_path.clone(), &cwd).ok()?;
        debug!("Selected compiler {} ({}) at {}", name, kind, path.display());
        Some(SelectedCompiler {
            name: name.clone(),
            path,
            kind,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_matching_rule_wins() {
        let m = CompilerMatcher::default();
        assert_eq!(m.classify("gcc"), Some(CompilerKind::Gcc));
        assert_eq!(m.classify("gcc-12"), Some(CompilerKind::Gcc));
        assert_eq!(m.classify("cc"), Some(CompilerKind::Generic));
        assert_eq!(m.classify("x86_64-linux-gnu-gcc"), Some(CompilerKind::Gcc));
        assert_eq!(m.classify("icc"), Some(CompilerKind::Generic));
        assert_eq!(m.classify("clang"), Some(CompilerKind::Clang));
        assert_eq!(m.classify("/usr/bin/clang-15"), Some(CompilerKind::Clang));
        assert_eq!(m.classify("tcc-wrapper"), None);
    }

    #[test]
    fn test_appended_rules_extend_without_reordering() {
        let m = CompilerMatcher::default()
            .with_rule(NamePattern::Prefix("tcc".into()), CompilerKind::Generic)
            .with_rule(NamePattern::Contains("gcc".into()), CompilerKind::Clang);
        assert_eq!(m.classify("tcc-wrapper"), Some(CompilerKind::Generic));
        // earlier rule still decides
        assert_eq!(m.classify("gcc"), Some(CompilerKind::Gcc));
        assert_eq!(CompilerMatcher::empty().classify("gcc"), None);
    }

    #[test]
    fn test_select_from_search_path() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("clang");
        std::fs::write(&fake, "#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let candidates = vec!["nosuchcc".to_string(), "clang".to_string()];
        let selected = select_compiler(
            &CompilerMatcher::default(),
            &candidates,
            Some(dir.path().as_os_str().to_owned()),
        )
        .unwrap();
        assert_eq!(selected.name, "clang");
        assert_eq!(selected.kind, CompilerKind::Clang);
        assert_eq!(selected.path, fake);
    }
}
