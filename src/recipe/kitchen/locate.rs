// src/recipe/kitchen/locate.rs

//! Build dependency location

use crate::error::{Error, Result};
use crate::recipe::format::DependencyPhase;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// Resolves a dependency name to an absolute installation path
///
/// This keeps the Kitchen decoupled from however dependencies were
/// installed; it only needs a directory to point the build at.
pub trait DependencyLocator: Send + Sync {
    fn locate(&self, name: &str, phase: DependencyPhase) -> Result<PathBuf>;
}

/// Looks for kegs under a list of roots
///
/// For each root, in order, tries `<root>/opt/<name>` (the link written when
/// a keg is finished) and then `<root>/<name>`.
#[derive(Debug, Clone, Default)]
pub struct PrefixLocator {
    roots: Vec<PathBuf>,
}

impl PrefixLocator {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }
}

impl DependencyLocator for PrefixLocator {
    fn locate(&self, name: &str, phase: DependencyPhase) -> Result<PathBuf> {
        for root in &self.roots {
            for candidate in [root.join("opt").join(name), root.join(name)] {
                if candidate.is_dir() {
                    let path = candidate.canonicalize().unwrap_or(candidate);
                    debug!("Located {} at {}", name, path.display());
                    return Ok(path);
                }
            }
        }

        Err(Error::DependencyNotFound {
            name: name.to_string(),
            phase: phase.to_string(),
        })
    }
}

/// Fixed name -> path table
#[derive(Debug, Clone, Default)]
pub struct StaticLocator {
    paths: HashMap<String, PathBuf>,
}

impl StaticLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, path: impl Into<PathBuf>) -> Self {
        self.paths.insert(name.to_string(), path.into());
        self
    }
}

impl DependencyLocator for StaticLocator {
    fn locate(&self, name: &str, phase: DependencyPhase) -> Result<PathBuf> {
        self.paths
            .get(name)
            .cloned()
            .ok_or_else(|| Error::DependencyNotFound {
                name: name.to_string(),
                phase: phase.to_string(),
            })
    }
}
