// src/recipe/kitchen/config.rs

//! Configuration and result types for the Kitchen

use crate::platform::Platform;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::keg::{InstallOrigin, InstalledArtifact};
use super::patch::PatchReport;
use super::state::CookState;

/// Default install prefix
pub const DEFAULT_PREFIX: &str = "/opt/cellar";

/// Configuration for the Kitchen
///
/// Everything a pipeline run depends on is carried here and threaded
/// through explicitly; the Kitchen reads no process-global settings.
#[derive(Debug, Clone)]
pub struct KitchenConfig {
    /// Root under which kegs are installed
    pub prefix: PathBuf,
    /// Directory for cached source and bottle archives
    pub cache_dir: PathBuf,
    /// Platform used for bottle selection (must be concrete)
    pub platform: Platform,
    /// Skip bottle lookup and always build from source
    pub build_from_source: bool,
    /// Replace an already installed keg of the same version
    pub force: bool,
    /// Number of parallel jobs (exported as MAKEFLAGS)
    pub jobs: u32,
    /// Timeout for each build step
    pub build_timeout: Duration,
    /// Timeout for the smoke test
    pub test_timeout: Duration,
    /// Roots searched for build dependencies, in order
    pub dependency_roots: Vec<PathBuf>,
    /// Compiler names tried in order when selecting `CC`
    pub compilers: Vec<String>,
}

impl Default for KitchenConfig {
    fn default() -> Self {
        let jobs = std::thread::available_parallelism()
            .map(|p| p.get() as u32)
            .unwrap_or(4);
        let prefix = PathBuf::from(DEFAULT_PREFIX);

        Self {
            dependency_roots: vec![prefix.clone()],
            prefix,
            cache_dir: default_cache_dir(),
            platform: Platform::current(),
            build_from_source: false,
            force: false,
            jobs,
            build_timeout: Duration::from_secs(3600), // 1 hour
            test_timeout: Duration::from_secs(60),
            compilers: vec!["cc".to_string(), "gcc".to_string(), "clang".to_string()],
        }
    }
}

impl KitchenConfig {
    /// Default configuration installing under `prefix`
    ///
    /// Dependencies are looked up under the same prefix.
    pub fn with_prefix(prefix: &Path) -> Self {
        Self {
            prefix: prefix.to_path_buf(),
            dependency_roots: vec![prefix.to_path_buf()],
            ..Self::default()
        }
    }

    /// Configuration that never pours bottles
    pub fn from_source(prefix: &Path) -> Self {
        Self {
            build_from_source: true,
            ..Self::with_prefix(prefix)
        }
    }
}

/// `dirs::cache_dir()/cellar`, or `/var/cache/cellar` when there is none
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("cellar"))
        .unwrap_or_else(|| PathBuf::from("/var/cache/cellar"))
}

/// Result of cooking a recipe
#[derive(Debug)]
pub struct CookResult {
    pub name: String,
    pub version: String,
    /// Path of the installed keg
    pub keg: PathBuf,
    /// Installed files by role
    pub installed: InstalledArtifact,
    pub origin: InstallOrigin,
    /// States visited, `Start` through `Done`
    pub trace: Vec<CookState>,
    /// Patch outcomes (empty for bottle installs)
    pub patches: PatchReport,
    /// Build log
    pub log: String,
    /// Warnings generated during the run
    pub warnings: Vec<String>,
}
