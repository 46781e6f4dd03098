// src/recipe/kitchen/cook.rs

//! Cook: source build execution for a single recipe

use crate::error::{Error, Result};
use crate::recipe::format::{BuildStep, InstallDir, Recipe, Vars};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::Kitchen;
use super::archive::{extract_archive, source_root};
use super::keg::{keg_vars, StagedKeg};
use super::patch::{apply_patches, PatchReport};
use super::process::run_shell;
use super::toolchain::select_compiler;

/// A single source build
pub struct Cook<'a> {
    pub(super) kitchen: &'a Kitchen,
    pub(super) recipe: &'a Recipe,
    /// Temporary build directory
    pub(super) build_dir: TempDir,
    /// Source directory within build_dir
    pub(super) source_dir: PathBuf,
    /// Build log accumulator
    pub(super) log: String,
    /// Warnings
    pub(super) warnings: Vec<String>,
}

impl<'a> Cook<'a> {
    pub(super) fn new(kitchen: &'a Kitchen, recipe: &'a Recipe) -> Result<Self> {
        let build_dir = tempfile::Builder::new()
            .prefix(&format!("cellar-{}-", recipe.package.name))
            .tempdir()
            .map_err(|e| Error::IoError(format!("Failed to create build directory: {}", e)))?;

        let source_dir = build_dir.path().join("source");
        fs::create_dir_all(&source_dir)?;

        Ok(Self {
            kitchen,
            recipe,
            build_dir,
            source_dir,
            log: String::new(),
            warnings: Vec::new(),
        })
    }

    /// Unpack verified source bytes
    pub(super) fn unpack(&mut self, archive: &[u8]) -> Result<()> {
        debug!("Unpacking in {}", self.build_dir.path().display());
        extract_archive(archive, &self.source_dir)?;
        self.source_dir = source_root(&self.source_dir)?;
        self.log_line(&format!(
            "Extracted source to {}",
            self.source_dir.display()
        ));
        Ok(())
    }

    /// Apply the recipe's patches in order
    pub(super) fn patch(&mut self) -> Result<PatchReport> {
        let patches = &self.recipe.patches;
        if patches.is_empty() {
            return Ok(PatchReport::default());
        }
        let report = apply_patches(&self.source_dir, patches)?;
        for id in &report.applied {
            self.log_line(&format!("Applied patch: {}", id));
        }
        for id in &report.already_applied {
            self.log_line(&format!("Patch already applied: {}", id));
        }
        Ok(report)
    }

    /// Locate every build-phase dependency
    pub(super) fn locate_dependencies(&mut self) -> Result<BTreeMap<String, PathBuf>> {
        let (kitchen, recipe) = (self.kitchen, self.recipe);
        let mut located = BTreeMap::new();
        for dep in recipe.build_dependencies() {
            let path = kitchen.locator.locate(&dep.name, dep.phase)?;
            self.log_line(&format!("Dependency {}: {}", dep.name, path.display()));
            located.insert(dep.name.clone(), path);
        }
        Ok(located)
    }

    /// Simmer: run the build steps, installing into `keg`
    ///
    /// Steps see `%(prefix)s` and the install dirs at `target`, the keg's final
    /// path, so whatever they embed stays valid after promotion. Files they
    /// install under `$DESTDIR` are moved into the staged keg afterwards.
    pub(super) fn simmer(
        &mut self,
        keg: &StagedKeg,
        target: &Path,
        deps: &BTreeMap<String, PathBuf>,
    ) -> Result<()> {
        let recipe = self.recipe;
        let build = &recipe.build;
        let kitchen = self.kitchen;
        let config = &kitchen.config;

        // Determine working directory
        let workdir = match &build.workdir {
            Some(wd) => self.source_dir.join(wd),
            None => self.source_dir.clone(),
        };

        let destdir = keg.destdir()?;
        let mut vars: Vars = keg_vars(target);
        vars.insert("destdir".to_string(), destdir.to_string_lossy().into_owned());
        vars.insert("jobs".to_string(), config.jobs.to_string());
        for (name, path) in deps {
            vars.insert(format!("dep.{}", name), path.to_string_lossy().into_owned());
        }

        let env = self.environment(&vars, deps)?;

        for (index, step) in build.steps.iter().enumerate() {
            let number = index + 1;
            match step {
                BuildStep::Run { run } => {
                    let command = recipe.substitute(run, &vars)?;
                    self.run_step(number, &command, &workdir, &env)?;
                }
                BuildStep::Install { install, files } => {
                    self.install_step(number, *install, files, &workdir, keg, &vars)?;
                }
            }
        }

        let (moved, strays) = keg.absorb_destdir(target)?;
        if moved > 0 {
            self.log_line(&format!("Collected {} file(s) installed under DESTDIR", moved));
        }
        for stray in strays {
            self.warnings.push(format!(
                "Ignored {}: installed outside {}",
                stray.display(),
                target.display()
            ));
        }

        Ok(())
    }

    /// Environment shared by every build step
    fn environment(
        &mut self,
        vars: &Vars,
        deps: &BTreeMap<String, PathBuf>,
    ) -> Result<Vec<(String, String)>> {
        let kitchen = self.kitchen;
        let recipe = self.recipe;
        let config = &kitchen.config;

        let mut search: Vec<PathBuf> = deps.values().map(|p| p.join("bin")).collect();
        if let Some(existing) = std::env::var_os("PATH") {
            search.extend(std::env::split_paths(&existing));
        }
        let path: OsString = std::env::join_paths(search)
            .map_err(|e| Error::IoError(format!("Invalid PATH: {}", e)))?;

        let mut env = vec![
            ("PATH".to_string(), path.to_string_lossy().into_owned()),
            ("MAKEFLAGS".to_string(), format!("-j{}", config.jobs)),
        ];
        if let Some(destdir) = vars.get("destdir") {
            env.push(("DESTDIR".to_string(), destdir.clone()));
        }

        if !recipe.build.environment.contains_key("CC") {
            match select_compiler(&kitchen.matcher, &config.compilers, Some(path.clone())) {
                Some(cc) => {
                    self.log_line(&format!("Compiler: {} ({})", cc.path.display(), cc.kind));
                    env.push(("CC".to_string(), cc.name));
                }
                None => {
                    debug!("No compiler found among {:?}", config.compilers);
                }
            }
        }

        for (key, value) in &recipe.build.environment {
            env.push((key.clone(), recipe.substitute(value, vars)?));
        }

        Ok(env)
    }

    /// Run one shell step
    fn run_step(
        &mut self,
        step: usize,
        command: &str,
        workdir: &Path,
        env: &[(String, String)],
    ) -> Result<()> {
        info!("Running build step {}: {}", step, command);

        let output = run_shell(command, workdir, env, self.kitchen.config.build_timeout)?;
        self.log_build_output(step, command, &output.stdout, &output.stderr);

        if !output.success() {
            return Err(Error::BuildFailed {
                step,
                exit_code: output.exit_code,
                output: output.combined(),
            });
        }

        Ok(())
    }

    /// Copy named files from the build tree into a keg directory
    fn install_step(
        &mut self,
        step: usize,
        dir: InstallDir,
        files: &[String],
        workdir: &Path,
        keg: &StagedKeg,
        vars: &Vars,
    ) -> Result<()> {
        let dest_dir = keg.dir(dir)?;
        self.log_line(&format!("=== step {} (install {}) ===", step, dir.as_str()));

        for file in files {
            let file = self.recipe.substitute(file, vars)?;
            let source = workdir.join(&file);
            let missing = || Error::BuildFailed {
                step,
                exit_code: None,
                output: format!("{} was not produced by the build", file),
            };

            let name = source.file_name().ok_or_else(missing)?;
            let dest = dest_dir.join(name);

            if source.is_dir() {
                copy_tree(&source, &dest)?;
            } else if source.is_file() {
                fs::copy(&source, &dest)?;
            } else {
                return Err(missing());
            }
            self.log_line(&format!("Installed {} -> {}", file, dest.display()));
        }

        Ok(())
    }

    fn log_line(&mut self, line: &str) {
        self.log.push_str(line);
        self.log.push('\n');
    }

    /// Log build step output (stdout/stderr) with a step header
    fn log_build_output(&mut self, step: usize, command: &str, stdout: &str, stderr: &str) {
        self.log_line(&format!("=== step {} ===", step));
        self.log_line(&format!("$ {}", command));
        if !stdout.is_empty() {
            self.log.push_str(stdout);
            self.log.push('\n');
        }
        if !stderr.is_empty() {
            self.log.push_str(stderr);
            self.log.push('\n');
        }
    }
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(|e| Error::IoError(format!("Failed to walk {}: {}", from.display(), e)))?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| Error::IoError(e.to_string()))?;
        let dest = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}
