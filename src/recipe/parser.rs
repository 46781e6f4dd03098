// src/recipe/parser.rs

//! Recipe file parsing and validation

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::recipe::format::{BuildStep, Recipe};
use std::collections::HashSet;
use std::path::{Component, Path};

/// Parse a recipe from a TOML string
///
/// Patches that reference a `file` are left unresolved; use
/// [`parse_recipe_file`] to load them relative to the recipe.
pub fn parse_recipe(content: &str) -> Result<Recipe> {
    toml::from_str(content).map_err(|e| Error::ParseError(format!("Invalid recipe: {}", e)))
}

/// Parse a recipe from a file, loading patch files next to it
pub fn parse_recipe_file(path: &Path) -> Result<Recipe> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::IoError(format!("Failed to read recipe file: {}", e)))?;

    let mut recipe = parse_recipe(&content)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    for patch in &mut recipe.patches {
        if patch.diff.is_some() {
            continue;
        }
        if let Some(file) = &patch.file {
            let patch_path = base.join(file);
            let diff = std::fs::read_to_string(&patch_path).map_err(|e| {
                Error::IoError(format!(
                    "Failed to read patch file {}: {}",
                    patch_path.display(),
                    e
                ))
            })?;
            patch.diff = Some(diff);
        }
    }

    Ok(recipe)
}

/// Validate a recipe for completeness and correctness
///
/// Returns warnings for things that are allowed but probably unintended.
pub fn validate_recipe(recipe: &Recipe) -> Result<Vec<String>> {
    let mut warnings = Vec::new();

    if recipe.package.name.is_empty() {
        return Err(Error::ParseError("Recipe package name cannot be empty".to_string()));
    }
    if recipe.package.version.is_empty() {
        return Err(Error::ParseError("Recipe package version cannot be empty".to_string()));
    }

    Hash::parse_prefixed(&recipe.source.checksum).map_err(|e| {
        Error::ParseError(format!(
            "Invalid source checksum {}: {}",
            recipe.source.checksum, e
        ))
    })?;

    let mut seen = HashSet::new();
    for dep in &recipe.dependencies {
        if !seen.insert(dep.name.as_str()) {
            return Err(Error::ParseError(format!(
                "Duplicate dependency: {}",
                dep.name
            )));
        }
    }

    if let Some(bottle) = &recipe.bottle {
        for (platform, entry) in bottle.entries()? {
            Hash::parse_prefixed(&entry.checksum).map_err(|e| {
                Error::ParseError(format!("Invalid bottle checksum for {}: {}", platform, e))
            })?;
        }
        if bottle.root_url.is_none() && !bottle.platforms.is_empty() {
            warnings.push("Bottle entries declared without a root_url".to_string());
        }
    }

    for (index, patch) in recipe.patches.iter().enumerate() {
        let id = patch.display_id(index);
        if patch.diff.is_none() && patch.file.is_none() {
            return Err(Error::ParseError(format!(
                "Patch {} has neither diff nor file",
                id
            )));
        }
        if patch.commit.is_none() {
            warnings.push(format!("Patch {} has no commit identity", id));
        }
    }

    for (index, step) in recipe.build.steps.iter().enumerate() {
        if let BuildStep::Install { files, .. } = step
            && files.is_empty()
        {
            return Err(Error::ParseError(format!(
                "Install step {} lists no files",
                index + 1
            )));
        }
    }
    if recipe.build.steps.is_empty() {
        warnings.push("No build steps specified".to_string());
    }

    match &recipe.test {
        Some(test) => {
            for path in test.fixtures.keys() {
                if !is_workspace_relative(Path::new(path)) {
                    return Err(Error::ParseError(format!(
                        "Test fixture path must be relative and stay inside the workspace: {}",
                        path
                    )));
                }
            }
        }
        None => warnings.push("Missing test section".to_string()),
    }

    if recipe.package.description.is_none() {
        warnings.push("Missing package description".to_string());
    }

    Ok(warnings)
}

/// True for a non-empty relative path with no `..` or root components
pub(crate) fn is_workspace_relative(path: &Path) -> bool {
    path.components().next().is_some()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
