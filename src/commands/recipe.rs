// src/commands/recipe.rs

//! Recipe inspection commands

use super::{kitchen_config, load_recipe};
use crate::cli::KitchenArgs;
use anyhow::{Context, Result};
use cellar::recipe::{bottle, validate_recipe, NoBottle, ResolvedArtifact};
use std::path::Path;

/// Validate a recipe and print its warnings
pub fn cmd_validate(recipe_path: &Path) -> Result<()> {
    let recipe = load_recipe(recipe_path)?;
    let warnings = validate_recipe(&recipe).context("Recipe validation failed")?;

    println!("Recipe: {} version {}", recipe.package.name, recipe.package.version);
    for warning in &warnings {
        println!("Warning: {}", warning);
    }
    if warnings.is_empty() {
        println!("[OK] No issues found");
    } else {
        println!("[OK] {} warning(s)", warnings.len());
    }
    Ok(())
}

/// Show what an install would do for the configured platform
pub fn cmd_resolve(recipe_path: &Path, args: &KitchenArgs) -> Result<()> {
    let recipe = load_recipe(recipe_path)?;
    let config = kitchen_config(args)?;

    let resolved = if config.build_from_source {
        ResolvedArtifact::BuildFromSource(NoBottle::Requested)
    } else {
        bottle::resolve_for_prefix(&recipe, &config.platform, &config.prefix)
            .context("Bottle resolution failed")?
    };

    match resolved {
        ResolvedArtifact::Bottle(found) => {
            println!("bottle {} (rebuild {})", found.platform, found.rebuild);
            println!("  checksum: {}", found.checksum);
            match &found.url {
                Some(url) => println!("  url: {}", url),
                None => println!("  url: none (must already be cached)"),
            }
        }
        ResolvedArtifact::BuildFromSource(reason) => {
            println!("source ({})", reason);
            println!("  url: {}", recipe.source_url()?);
            println!("  checksum: {}", recipe.source.checksum);
        }
    }
    Ok(())
}
