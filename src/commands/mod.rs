// src/commands/mod.rs
//! Command handlers for the cellar CLI

mod cook;
mod recipe;
mod system;

pub use cook::{cmd_fetch, cmd_install, cmd_test};
pub use recipe::{cmd_resolve, cmd_validate};
pub use system::cmd_completions;

use crate::cli::KitchenArgs;
use anyhow::{Context, Result};
use cellar::recipe::{parse_recipe_file, Kitchen, KitchenConfig, Recipe};
use cellar::Platform;
use std::path::Path;
use std::time::Duration;

/// Map the shared CLI flags onto a kitchen configuration
pub fn kitchen_config(args: &KitchenArgs) -> Result<KitchenConfig> {
    let mut config = KitchenConfig::with_prefix(&args.prefix);

    if let Some(dir) = &args.cache_dir {
        config.cache_dir = dir.clone();
    }
    if let Some(platform) = &args.platform {
        config.platform = Platform::parse(platform)
            .with_context(|| format!("Invalid --platform: {}", platform))?;
    }
    config.dependency_roots.extend(args.dep_roots.iter().cloned());
    config.build_from_source = args.build_from_source;
    config.force = args.force;
    if let Some(jobs) = args.jobs {
        config.jobs = jobs.max(1);
    }
    if let Some(secs) = args.build_timeout {
        config.build_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = args.test_timeout {
        config.test_timeout = Duration::from_secs(secs);
    }

    Ok(config)
}

fn open_kitchen(args: &KitchenArgs) -> Result<Kitchen> {
    let config = kitchen_config(args)?;
    Kitchen::new(config).context("Failed to set up the kitchen")
}

fn load_recipe(path: &Path) -> Result<Recipe> {
    parse_recipe_file(path)
        .with_context(|| format!("Failed to parse recipe: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args() -> KitchenArgs {
        KitchenArgs {
            prefix: PathBuf::from("/tmp/cellar"),
            cache_dir: None,
            platform: None,
            dep_roots: vec![],
            build_from_source: false,
            force: false,
            jobs: None,
            build_timeout: None,
            test_timeout: None,
        }
    }

    #[test]
    fn test_kitchen_config_from_flags() {
        let mut a = args();
        a.platform = Some("macos-x86_64-high_sierra".to_string());
        a.dep_roots = vec![PathBuf::from("/usr/local")];
        a.jobs = Some(0);
        a.test_timeout = Some(5);

        let config = kitchen_config(&a).unwrap();
        assert_eq!(config.prefix, PathBuf::from("/tmp/cellar"));
        assert_eq!(config.platform.to_string(), "macos-x86_64-high_sierra");
        assert_eq!(
            config.dependency_roots,
            vec![PathBuf::from("/tmp/cellar"), PathBuf::from("/usr/local")]
        );
        assert_eq!(config.jobs, 1);
        assert_eq!(config.test_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_kitchen_config_rejects_bad_platform() {
        let mut a = args();
        a.platform = Some("linux".to_string());
        assert!(kitchen_config(&a).is_err());
    }
}
