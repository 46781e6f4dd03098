// src/recipe/mod.rs

//! Recipe system for installing packages from bottles or source
//!
//! A recipe describes one package:
//! - The source archive and its checksum
//! - Prebuilt bottles keyed by platform
//! - Patches to apply before building
//! - Build dependencies and build steps
//! - A smoke test run against the installed keg
//!
//! # Culinary Terminology
//!
//! - **Recipe**: The package descriptor (like a recipe card)
//! - **Bottle**: A prebuilt, checksummed binary archive for one platform
//! - **Kitchen**: Drives a recipe through the install pipeline
//! - **Cook**: One source build in its own scratch directory
//! - **Simmer**: Running the build steps
//! - **Keg**: The installed tree `<prefix>/<name>/<version>`
//! - **Taste**: The post-install smoke test
//!
//! # Example Recipe
//!
//! ```toml
//! [package]
//! name = "quantor"
//! version = "3.2"
//!
//! [source]
//! url = "http://fmv.jku.at/quantor/quantor-%(version)s.tar.gz"
//! checksum = "sha256:7a82ebfd1c8ecc250325f311e725f6263bf69b412edcc2b600db2a25937d1189"
//!
//! [[dependencies]]
//! name = "picosat"
//! phase = "build"
//!
//! [build]
//! steps = [
//!     { run = "./configure --picosat=%(dep.picosat)s" },
//!     { run = "make" },
//!     { install = "bin", files = ["quantor"] },
//! ]
//! ```

pub mod bottle;
pub mod format;
pub mod kitchen;
pub mod parser;

pub use bottle::{BottleMatch, NoBottle, ResolvedArtifact};
pub use format::{
    BuildSection, BuildStep, CellarPolicy, Dependency, DependencyPhase, InstallDir, PatchInfo,
    Recipe, SourceSection, TestSection, Vars,
};
pub use kitchen::{
    CookFailure, CookResult, CookState, FetchReport, Kitchen, KitchenConfig,
};
pub use parser::{parse_recipe, parse_recipe_file, validate_recipe};
