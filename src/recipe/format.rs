// src/recipe/format.rs

//! Recipe file format definitions
//!
//! A recipe is the descriptor for one package: where its source lives, how to
//! verify it, which prebuilt bottles exist, which patches to apply, how to
//! build and install it, and how to smoke-test the result. Recipes are TOML
//! and are read-only once loaded.

use crate::error::{Error, Result};
use crate::platform::Platform;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Substitution variables, keyed by name without the `%(...)s` wrapper
pub type Vars = BTreeMap<String, String>;

/// A complete recipe for one package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    /// Package metadata
    pub package: PackageSection,

    /// Source archive and its checksum
    pub source: SourceSection,

    /// Declared dependencies, in declaration order
    #[serde(default)]
    pub dependencies: Vec<Dependency>,

    /// Prebuilt bottles (optional)
    #[serde(default)]
    pub bottle: Option<BottleSection>,

    /// Patches applied in order before the build
    #[serde(default)]
    pub patches: Vec<PatchInfo>,

    /// Build instructions
    #[serde(default)]
    pub build: BuildSection,

    /// Smoke test run against the installed keg (optional)
    #[serde(default)]
    pub test: Option<TestSection>,

    /// Extra variables for substitution
    #[serde(default)]
    pub variables: Vars,
}

impl Recipe {
    /// Substitute `%(key)s` patterns in a template
    ///
    /// Lookup order: `vars`, then the built-ins `name`/`version`, then the
    /// recipe's `[variables]` section.
    pub fn substitute(&self, template: &str, vars: &Vars) -> Result<String> {
        substitute(template, |key| {
            vars.get(key)
                .map(String::as_str)
                .or(match key {
                    "name" => Some(self.package.name.as_str()),
                    "version" => Some(self.package.version.as_str()),
                    _ => None,
                })
                .or_else(|| self.variables.get(key).map(String::as_str))
                .map(str::to_string)
        })
    }

    /// Get the source URL with variables substituted
    pub fn source_url(&self) -> Result<String> {
        self.substitute(&self.source.url, &Vars::new())
    }

    /// Get the archive filename from the source URL
    pub fn archive_filename(&self) -> String {
        self.source_url()
            .unwrap_or_else(|_| self.source.url.clone())
            .split('/')
            .next_back()
            .filter(|s| !s.is_empty())
            .unwrap_or("source.tar.gz")
            .to_string()
    }

    /// Dependencies that affect the build environment
    pub fn build_dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies
            .iter()
            .filter(|d| d.phase == DependencyPhase::Build)
    }
}

/// Replace every `%(key)s` in `template` using `lookup`
///
/// An unknown `dep.<name>` key is reported as a missing dependency, any other
/// unknown key as a missing variable. Text without a closing `)s` is kept.
pub fn substitute(template: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("%(") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find(")s") else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };

        let key = &after[..end];
        match lookup(key) {
            Some(value) => out.push_str(&value),
            None => {
                return Err(match key.strip_prefix("dep.") {
                    Some(dep) => Error::DependencyNotFound {
                        name: dep.to_string(),
                        phase: DependencyPhase::Build.to_string(),
                    },
                    None => Error::MissingVariable(key.to_string()),
                });
            }
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Package metadata section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSection {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
}

/// Source archive section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSection {
    /// Archive URL (supports `%(version)s` and `%(name)s`)
    pub url: String,
    /// Checksum as `algorithm:hex`, or bare SHA-256 hex
    pub checksum: String,
}

/// A declared dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(default)]
    pub phase: DependencyPhase,
}

/// When a dependency is needed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyPhase {
    /// Needed only while building
    Build,
    /// Needed by the installed package
    #[default]
    Run,
}

impl DependencyPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Run => "run",
        }
    }
}

impl fmt::Display for DependencyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prebuilt binary artifacts ("bottles")
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BottleSection {
    /// Base URL bottles are downloaded from
    #[serde(default)]
    pub root_url: Option<String>,

    /// Where the bottle may be poured
    #[serde(default)]
    pub cellar: CellarPolicy,

    /// Default rebuild revision for entries that don't set their own
    #[serde(default)]
    pub rebuild: u32,

    /// Platform identifier -> checksum (or `{ checksum, rebuild, tag }`)
    #[serde(default)]
    pub platforms: BTreeMap<String, BottleEntrySpec>,
}

/// A bottle table value as written in the recipe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BottleEntrySpec {
    Checksum(String),
    Detailed {
        checksum: String,
        #[serde(default)]
        rebuild: Option<u32>,
        /// Platform tag used in the upstream bottle file name
        #[serde(default)]
        tag: Option<String>,
    },
}

/// A resolved bottle table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BottleEntry {
    pub checksum: String,
    pub rebuild: u32,
    /// Overrides the platform identifier in the download file name
    pub tag: Option<String>,
}

impl BottleSection {
    /// Parse the platform keys and apply the default rebuild revision
    ///
    /// Fails if a key is not a concrete platform, or if two keys name the
    /// same platform after normalization. Entries that share a checksum are
    /// kept as separate entries.
    pub fn entries(&self) -> Result<BTreeMap<Platform, BottleEntry>> {
        let mut entries = BTreeMap::new();

        for (key, spec) in &self.platforms {
            let platform = Platform::parse(key)?;
            platform.require_concrete()?;

            let entry = match spec {
                BottleEntrySpec::Checksum(checksum) => BottleEntry {
                    checksum: checksum.clone(),
                    rebuild: self.rebuild,
                    tag: None,
                },
                BottleEntrySpec::Detailed {
                    checksum,
                    rebuild,
                    tag,
                } => BottleEntry {
                    checksum: checksum.clone(),
                    rebuild: rebuild.unwrap_or(self.rebuild),
                    tag: tag.clone(),
                },
            };

            if let Some(tag) = &entry.tag
                && (tag.is_empty() || tag.contains(['/', '\\']) || tag.starts_with('.'))
            {
                return Err(Error::ParseError(format!(
                    "Invalid bottle tag {:?} for {}",
                    tag, platform
                )));
            }

            if entries.insert(platform.clone(), entry).is_some() {
                return Err(Error::ParseError(format!(
                    "Duplicate bottle platform: {}",
                    platform
                )));
            }
        }

        Ok(entries)
    }
}

/// Relocation policy for a bottle
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CellarPolicy {
    /// Pourable under any prefix, no rewriting needed
    #[default]
    AnySkipRelocation,
    /// Pourable under any prefix after `@@PREFIX@@` placeholders are rewritten
    Any,
    /// Only pourable under this exact prefix
    Path(String),
}

impl From<String> for CellarPolicy {
    fn from(s: String) -> Self {
        match s.trim_start_matches(':') {
            "any_skip_relocation" => Self::AnySkipRelocation,
            "any" => Self::Any,
            _ => Self::Path(s),
        }
    }
}

impl From<CellarPolicy> for String {
    fn from(policy: CellarPolicy) -> Self {
        match policy {
            CellarPolicy::AnySkipRelocation => "any_skip_relocation".to_string(),
            CellarPolicy::Any => "any".to_string(),
            CellarPolicy::Path(p) => p,
        }
    }
}

/// One patch document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatchInfo {
    /// Identifier used in diagnostics (defaults to `patch-<n>`)
    #[serde(default)]
    pub id: Option<String>,

    /// Upstream commit the patch came from (advisory, for audit)
    #[serde(default)]
    pub commit: Option<String>,

    /// One-line summary
    #[serde(default)]
    pub subject: Option<String>,

    /// Leading path components to strip (like `patch -p`)
    #[serde(default = "default_strip")]
    pub strip: u32,

    /// Inline unified diff
    #[serde(default)]
    pub diff: Option<String>,

    /// Diff file relative to the recipe; loaded into `diff` at parse time
    #[serde(default)]
    pub file: Option<String>,
}

fn default_strip() -> u32 {
    1
}

impl PatchInfo {
    /// The patch identifier, given its 0-based position in the recipe
    pub fn display_id(&self, index: usize) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("patch-{}", index + 1))
    }
}

/// Build instructions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildSection {
    /// Subdirectory of the source tree to run steps in
    #[serde(default)]
    pub workdir: Option<String>,

    /// Extra environment for every step (values are substituted)
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Ordered build and install steps
    #[serde(default)]
    pub steps: Vec<BuildStep>,
}

/// A single build step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildStep {
    /// Run a shell command in the source tree
    Run { run: String },
    /// Copy files from the source tree into a keg directory
    Install {
        install: InstallDir,
        files: Vec<String>,
    },
}

/// Keg directories an install step can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallDir {
    Bin,
    Sbin,
    Lib,
    Libexec,
    Include,
    Share,
    Etc,
}

impl InstallDir {
    pub const ALL: [InstallDir; 7] = [
        Self::Bin,
        Self::Sbin,
        Self::Lib,
        Self::Libexec,
        Self::Include,
        Self::Share,
        Self::Etc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bin => "bin",
            Self::Sbin => "sbin",
            Self::Lib => "lib",
            Self::Libexec => "libexec",
            Self::Include => "include",
            Self::Share => "share",
            Self::Etc => "etc",
        }
    }
}

/// Smoke test specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSection {
    /// Files written into the test workspace (relative path -> content)
    #[serde(default)]
    pub fixtures: BTreeMap<String, String>,

    /// Shell command (supports `%(bin)s`, `%(testpath)s`, ...)
    pub command: String,

    #[serde(default)]
    pub expected_exit_code: i32,

    /// Compared exactly after trailing whitespace is trimmed
    #[serde(default)]
    pub expected_output: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vars {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_substitute_lookup_order() {
        let recipe: Recipe = toml::from_str(
            r#"
[package]
name = "quantor"
version = "3.2"

[source]
url = "http://fmv.jku.at/quantor/%(name)s-%(version)s.tar.gz"
checksum = "sha256:00"

[variables]
flags = "-O2"
version = "shadowed"
"#,
        )
        .unwrap();

        assert_eq!(
            recipe.source_url().unwrap(),
            "http://fmv.jku.at/quantor/quantor-3.2.tar.gz"
        );
        assert_eq!(recipe.archive_filename(), "quantor-3.2.tar.gz");

        let out = recipe
            .substitute("%(bin)s/quantor %(flags)s", &vars(&[("bin", "/k/bin")]))
            .unwrap();
        assert_eq!(out, "/k/bin/quantor -O2");
    }

    #[test]
    fn test_substitute_errors() {
        let err = substitute("./configure --picosat=%(dep.picosat)s/lib", |_| None).unwrap_err();
        assert!(matches!(err, Error::DependencyNotFound { ref name, .. } if name == "picosat"));

        let err = substitute("%(nope)s", |_| None).unwrap_err();
        assert!(matches!(err, Error::MissingVariable(ref k) if k == "nope"));

        // Unterminated pattern is left alone
        assert_eq!(substitute("printf '%(x'", |_| None).unwrap(), "printf '%(x'");
    }

    #[test]
    fn test_bottle_entries() {
        let section: BottleSection = toml::from_str(
            r#"
rebuild = 1
[platforms]
"macos-x86_64-high_sierra" = "sha256:e44188a9"
"macos-x86_64-sierra" = "sha256:e44188a9"
"linux-x86_64" = { checksum = "sha256:33db76fa", rebuild = 3 }
"#,
        )
        .unwrap();

        let entries = section.entries().unwrap();
        assert_eq!(entries.len(), 3);

        let linux = &entries[&Platform::parse("linux-x86_64").unwrap()];
        assert_eq!(linux.rebuild, 3);
        let sierra = &entries[&Platform::parse("macos-x86_64-sierra").unwrap()];
        assert_eq!(sierra.rebuild, 1);
        assert_eq!(sierra.checksum, "sha256:e44188a9");
        assert_eq!(sierra.tag, None);
    }

    #[test]
    fn test_bottle_entry_tags() {
        let section: BottleSection = toml::from_str(
            r#"
[platforms]
"linux-x86_64" = { checksum = "sha256:33db76fa", tag = "x86_64_linux" }
"#,
        )
        .unwrap();
        let entries = section.entries().unwrap();
        let linux = &entries[&Platform::parse("linux-x86_64").unwrap()];
        assert_eq!(linux.tag.as_deref(), Some("x86_64_linux"));
        assert_eq!(linux.rebuild, 0);

        let escaping: BottleSection = toml::from_str(
            r#"
[platforms]
"linux-x86_64" = { checksum = "sha256:33db76fa", tag = "../x86_64_linux" }
"#,
        )
        .unwrap();
        assert!(matches!(escaping.entries(), Err(Error::ParseError(_))));
    }

    #[test]
    fn test_bottle_entries_reject_duplicates_and_wildcards() {
        let mut section = BottleSection::default();
        section
            .platforms
            .insert("linux-x86_64".into(), BottleEntrySpec::Checksum("a".into()));
        section
            .platforms
            .insert("LINUX-x86_64".into(), BottleEntrySpec::Checksum("b".into()));
        assert!(section.entries().is_err());

        let mut wild = BottleSection::default();
        wild.platforms
            .insert("linux-*".into(), BottleEntrySpec::Checksum("a".into()));
        assert!(matches!(wild.entries(), Err(Error::InvalidPlatform(_))));
    }

    #[test]
    fn test_cellar_policy_strings() {
        assert_eq!(
            CellarPolicy::from(":any_skip_relocation".to_string()),
            CellarPolicy::AnySkipRelocation
        );
        assert_eq!(CellarPolicy::from("any".to_string()), CellarPolicy::Any);
        assert_eq!(
            CellarPolicy::from("/opt/cellar".to_string()),
            CellarPolicy::Path("/opt/cellar".to_string())
        );
    }

    #[test]
    fn test_build_steps_untagged() {
        let build: BuildSection = toml::from_str(
            r#"
[[steps]]
run = "make"

[[steps]]
install = "bin"
files = ["quantor"]
"#,
        )
        .unwrap();

        assert_eq!(build.steps[0], BuildStep::Run { run: "make".into() });
        assert_eq!(
            build.steps[1],
            BuildStep::Install {
                install: InstallDir::Bin,
                files: vec!["quantor".into()],
            }
        );
    }
}
