// src/lib.rs

//! Cellar: a bottle-first package installer
//!
//! Installs packages described by TOML recipes into a prefix. A prebuilt
//! bottle is poured when one exists for the exact platform; otherwise the
//! source is fetched, verified, patched and built. Every install is smoke
//! tested before it becomes visible.
//!
//! # Architecture
//!
//! - Checksum gate: no archive is unpacked before its digest matches
//! - Staged installs: kegs are built aside and promoted with a rename
//! - Explicit pipeline: every run is a trace of named stages, and a failure
//!   names the stage it happened in

pub mod compression;
mod error;
pub mod hash;
pub mod platform;
pub mod recipe;

pub use error::{Error, Result};
pub use hash::{Hash, HashAlgorithm};
pub use platform::Platform;
pub use recipe::{CookFailure, CookResult, CookState, Kitchen, KitchenConfig, Recipe};
