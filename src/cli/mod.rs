// src/cli/mod.rs
//! CLI definitions for cellar
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations are in the `commands` module.

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cellar")]
#[command(author = "Cellar Contributors")]
#[command(version)]
#[command(about = "Bottle-first package installer with verified, tested installs", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install a package from its recipe (bottle first, then source)
    Install {
        /// Path to the recipe file
        recipe: PathBuf,

        #[command(flatten)]
        kitchen: KitchenArgs,
    },

    /// Re-run the smoke test against an installed package
    Test {
        /// Path to the recipe file
        recipe: PathBuf,

        #[command(flatten)]
        kitchen: KitchenArgs,
    },

    /// Download and verify the source archive into the cache
    Fetch {
        /// Path to the recipe file
        recipe: PathBuf,

        #[command(flatten)]
        kitchen: KitchenArgs,
    },

    /// Show whether a bottle would be poured or the source built
    Resolve {
        /// Path to the recipe file
        recipe: PathBuf,

        #[command(flatten)]
        kitchen: KitchenArgs,
    },

    /// Parse and validate a recipe without touching the prefix
    Validate {
        /// Path to the recipe file
        recipe: PathBuf,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Flags shared by every command that drives the kitchen
#[derive(Args, Debug, Clone)]
pub struct KitchenArgs {
    /// Install prefix (kegs go to <prefix>/<name>/<version>)
    #[arg(long, default_value = cellar::recipe::kitchen::DEFAULT_PREFIX)]
    pub prefix: PathBuf,

    /// Directory for cached archives
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Platform identifier used to select a bottle (os-arch[-tag])
    #[arg(long)]
    pub platform: Option<String>,

    /// Additional root searched for build dependencies (repeatable)
    #[arg(long = "dep-root", value_name = "DIR")]
    pub dep_roots: Vec<PathBuf>,

    /// Skip bottles and always build from source
    #[arg(long)]
    pub build_from_source: bool,

    /// Replace an installed keg of the same version
    #[arg(short, long)]
    pub force: bool,

    /// Number of parallel build jobs
    #[arg(short, long)]
    pub jobs: Option<u32>,

    /// Timeout for each build step, in seconds
    #[arg(long, value_name = "SECS")]
    pub build_timeout: Option<u64>,

    /// Timeout for the smoke test, in seconds
    #[arg(long, value_name = "SECS")]
    pub test_timeout: Option<u64>,
}
