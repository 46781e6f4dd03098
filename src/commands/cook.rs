// src/commands/cook.rs

//! Install, test and fetch commands: drive a recipe through the kitchen

use super::{load_recipe, open_kitchen};
use crate::cli::KitchenArgs;
use anyhow::{Context, Result};
use cellar::recipe::kitchen::InstallOrigin;
use cellar::recipe::{validate_recipe, CookFailure};
use std::path::Path;
use tracing::info;

/// Install a package from a recipe
///
/// Pours a bottle when one matches the platform, otherwise builds from
/// source. The keg is only left in place if its smoke test passes.
pub fn cmd_install(recipe_path: &Path, args: &KitchenArgs) -> Result<()> {
    println!("Reading recipe: {}", recipe_path.display());
    let recipe = load_recipe(recipe_path)?;
    println!("Recipe: {} version {}", recipe.package.name, recipe.package.version);

    let warnings = validate_recipe(&recipe).context("Recipe validation failed")?;
    for warning in &warnings {
        println!("Warning: {}", warning);
    }

    let kitchen = open_kitchen(args)?;
    let config = kitchen.config();
    if config.build_from_source {
        println!("Building from source with {} parallel jobs...", config.jobs);
    } else {
        println!("Installing for {} into {}", config.platform, config.prefix.display());
    }

    let result = kitchen.cook(&recipe).map_err(stage_failure)?;

    match &result.origin {
        InstallOrigin::Bottle { platform, .. } => {
            println!("\n[COMPLETE] Poured {} bottle: {}", platform, result.keg.display())
        }
        InstallOrigin::Source => {
            println!("\n[COMPLETE] Built from source: {}", result.keg.display());
            if !result.patches.applied.is_empty() || !result.patches.already_applied.is_empty() {
                println!(
                    "  - Patches: {} applied, {} already present",
                    result.patches.applied.len(),
                    result.patches.already_applied.len()
                );
            }
        }
    }
    println!(
        "  - {} file(s): {} executable(s), {} librar{}",
        result.installed.len(),
        result.installed.executables.len(),
        result.installed.libraries.len(),
        if result.installed.libraries.len() == 1 { "y" } else { "ies" }
    );

    if !result.warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &result.warnings {
            println!("  - {}", warning);
        }
    }

    info!(
        "Installed {} {} ({})",
        result.name,
        result.version,
        result
            .trace
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    );
    Ok(())
}

/// Re-run the smoke test of an installed package
pub fn cmd_test(recipe_path: &Path, args: &KitchenArgs) -> Result<()> {
    let recipe = load_recipe(recipe_path)?;
    let kitchen = open_kitchen(args)?;

    kitchen.test(&recipe).map_err(stage_failure)?;
    println!("[OK] {} {} passed its test", recipe.package.name, recipe.package.version);
    Ok(())
}

/// Fetch and verify the source archive without building
pub fn cmd_fetch(recipe_path: &Path, args: &KitchenArgs) -> Result<()> {
    let recipe = load_recipe(recipe_path)?;
    let kitchen = open_kitchen(args)?;

    let report = kitchen.fetch(&recipe).map_err(stage_failure)?;
    println!(
        "[COMPLETE] {} ({} bytes{})",
        report.url,
        report.size,
        if report.from_cache { ", already cached" } else { "" }
    );
    println!("  - Cached as {}", report.key);
    println!("\n[OK] Source is cached. Ready for offline build.");
    Ok(())
}

/// Print the stage trace of a failed run and hand the failure to `main`
fn stage_failure(failure: CookFailure) -> anyhow::Error {
    eprintln!(
        "[FAILED] at {} (trace: {})",
        failure.stage,
        failure
            .trace
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    );
    failure.into()
}
