// src/recipe/kitchen/keg.rs

//! Install layout
//!
//! A keg is one installed version of one package: `<prefix>/<name>/<version>`.
//! Kegs are assembled in a staging directory inside the prefix and promoted
//! with a single rename, so an aborted run never leaves a partial keg behind.
//! A promoted keg can still be rolled back until it is committed.

use crate::compression::CompressionFormat;
use crate::error::{Error, Result};
use crate::recipe::format::{InstallDir, Vars};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Receipt written at the top of every keg
pub const RECEIPT_FILE: &str = "INSTALL_RECEIPT.json";

/// Placeholder rewritten to the real prefix in relocatable bottles
pub const PREFIX_PLACEHOLDER: &str = "@@PREFIX@@";

/// Where kegs and their links live under a prefix
#[derive(Debug, Clone)]
pub struct Layout {
    prefix: PathBuf,
}

impl Layout {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn keg_path(&self, name: &str, version: &str) -> PathBuf {
        self.prefix.join(name).join(version)
    }

    /// Stable link to the current keg of `name`
    pub fn opt_link(&self, name: &str) -> PathBuf {
        self.prefix.join("opt").join(name)
    }
}

/// Substitution variables for a keg rooted at `root`: `prefix` and one per install dir
pub fn keg_vars(root: &Path) -> Vars {
    let mut vars = Vars::new();
    vars.insert("prefix".to_string(), root.to_string_lossy().into_owned());
    for dir in InstallDir::ALL {
        vars.insert(
            dir.as_str().to_string(),
            root.join(dir.as_str()).to_string_lossy().into_owned(),
        );
    }
    vars
}

/// Role of an installed file, decided by its top-level keg directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    Executable,
    Library,
    Data,
}

impl FileRole {
    pub fn of(relative: &Path) -> Self {
        match relative.components().next() {
            Some(Component::Normal(top)) => match top.to_str() {
                Some("bin" | "sbin" | "libexec") => Self::Executable,
                Some("lib" | "include") => Self::Library,
                _ => Self::Data,
            },
            _ => Self::Data,
        }
    }
}

/// Files of an installed keg, relative to the keg root, partitioned by role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledArtifact {
    pub executables: BTreeSet<PathBuf>,
    pub libraries: BTreeSet<PathBuf>,
    pub data: BTreeSet<PathBuf>,
}

impl InstalledArtifact {
    /// Inventory every file and symlink under `root`, ignoring the receipt
    pub fn scan(root: &Path) -> Result<Self> {
        let mut artifact = Self::default();

        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry =
                entry.map_err(|e| Error::IoError(format!("Failed to scan keg: {}", e)))?;
            if entry.file_type().is_dir() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| Error::IoError(e.to_string()))?
                .to_path_buf();
            if relative == Path::new(RECEIPT_FILE) {
                continue;
            }
            artifact.insert(relative);
        }

        Ok(artifact)
    }

    pub fn insert(&mut self, relative: PathBuf) {
        match FileRole::of(&relative) {
            FileRole::Executable => self.executables.insert(relative),
            FileRole::Library => self.libraries.insert(relative),
            FileRole::Data => self.data.insert(relative),
        };
    }

    pub fn len(&self) -> usize {
        self.executables.len() + self.libraries.len() + self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How a keg was produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InstallOrigin {
    Bottle { platform: String, rebuild: u32 },
    Source,
}

impl InstallOrigin {
    pub fn is_bottle(&self) -> bool {
        matches!(self, Self::Bottle { .. })
    }
}

/// Contents of `INSTALL_RECEIPT.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub name: String,
    pub version: String,
    pub platform: String,
    pub origin: InstallOrigin,
    pub installed_at: String,
    pub files: InstalledArtifact,
}

impl InstallReceipt {
    pub fn new(
        name: &str,
        version: &str,
        platform: &str,
        origin: InstallOrigin,
        files: InstalledArtifact,
    ) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            platform: platform.to_string(),
            origin,
            installed_at: Utc::now().to_rfc3339(),
            files,
        }
    }

    pub fn read(keg: &Path) -> Result<Self> {
        let content = fs::read_to_string(keg.join(RECEIPT_FILE))
            .map_err(|e| Error::IoError(format!("No install receipt in {}: {}", keg.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::ParseError(format!("Invalid install receipt: {}", e)))
    }

    fn write(&self, keg: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::InstallFailed(format!("Failed to encode receipt: {}", e)))?;
        fs::write(keg.join(RECEIPT_FILE), json)?;
        Ok(())
    }
}

/// Prefix directories this run created, removed again if still empty on drop
struct CreatedDirs(Vec<PathBuf>);

impl CreatedDirs {
    fn create(path: &Path) -> Result<Self> {
        let mut missing = Vec::new();
        let mut next = Some(path);
        while let Some(dir) = next
            && !dir.as_os_str().is_empty()
            && !dir.exists()
        {
            missing.push(dir.to_path_buf());
            next = dir.parent();
        }
        fs::create_dir_all(path)?;
        Ok(Self(missing))
    }
}

impl Drop for CreatedDirs {
    fn drop(&mut self) {
        // deepest first; stops at the first directory that gained content
        for dir in &self.0 {
            if fs::remove_dir(dir).is_err() {
                break;
            }
            debug!("Removed empty {}", dir.display());
        }
    }
}

/// A keg under construction, invisible under its final path
pub struct StagedKeg {
    staging: TempDir,
    root: PathBuf,
    /// dropped after `staging`
    _prefix: CreatedDirs,
}

impl StagedKeg {
    /// Create an empty staging keg inside `prefix` (same filesystem as the target)
    pub fn new(prefix: &Path) -> Result<Self> {
        let created = CreatedDirs::create(prefix)?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(prefix)
            .map_err(|e| Error::InstallFailed(format!("Failed to create staging directory: {}", e)))?;
        let root = staging.path().join("keg");
        fs::create_dir(&root)?;
        debug!("Staging keg at {}", root.display());
        Ok(Self {
            staging,
            root,
            _prefix: created,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `DESTDIR` for build steps, created on demand
    ///
    /// A step that installs to `$DESTDIR<keg>` lands here; [`Self::absorb_destdir`]
    /// moves that subtree into the keg.
    pub fn destdir(&self) -> Result<PathBuf> {
        let path = self.staging.path().join("dest");
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Move `$DESTDIR<target>` into the staged keg; returns the files moved
    ///
    /// Anything else a step installed under `DESTDIR` is outside the keg and
    /// is reported back as a list of stray top-level paths.
    pub fn absorb_destdir(&self, target: &Path) -> Result<(usize, Vec<PathBuf>)> {
        let dest = self.staging.path().join("dest");
        if !dest.is_dir() {
            return Ok((0, Vec::new()));
        }
        let relative = target.strip_prefix("/").unwrap_or(target);
        let tree = dest.join(relative);

        let mut moved = 0;
        if tree.is_dir() {
            // collect first: entries are renamed away while walking
            let entries = WalkDir::new(&tree)
                .min_depth(1)
                .into_iter()
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::IoError(format!("Failed to scan DESTDIR: {}", e)))?;
            for entry in entries {
                let relative = entry
                    .path()
                    .strip_prefix(&tree)
                    .map_err(|e| Error::IoError(e.to_string()))?;
                let into = self.root.join(relative);
                if entry.file_type().is_dir() {
                    fs::create_dir_all(&into)?;
                } else {
                    fs::rename(entry.path(), &into)?;
                    moved += 1;
                }
            }
            fs::remove_dir_all(&tree)?;
        }

        let mut strays = Vec::new();
        for entry in WalkDir::new(&dest).min_depth(1).sort_by_file_name() {
            let entry =
                entry.map_err(|e| Error::IoError(format!("Failed to scan DESTDIR: {}", e)))?;
            if !entry.file_type().is_dir() {
                let path = entry
                    .path()
                    .strip_prefix(&dest)
                    .map_err(|e| Error::IoError(e.to_string()))?;
                strays.push(Path::new("/").join(path));
            }
        }
        fs::remove_dir_all(&dest)?;

        if moved > 0 {
            debug!("Absorbed {} file(s) from DESTDIR", moved);
        }
        Ok((moved, strays))
    }

    /// Directory for an install step, created on demand
    pub fn dir(&self, dir: InstallDir) -> Result<PathBuf> {
        let path = self.root.join(dir.as_str());
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Unpack a bottle; its `<name>/<version>` subtree becomes the keg root
    pub fn pour_bottle(&mut self, bytes: &[u8], name: &str, version: &str) -> Result<()> {
        let unpacked = self.staging.path().join("bottle");
        super::archive::extract_archive(bytes, &unpacked)?;
        debug!(
            "Poured {} bottle ({})",
            name,
            CompressionFormat::from_magic_bytes(bytes)
        );

        let nested = unpacked.join(name).join(version);
        let tree = if nested.is_dir() { nested } else { unpacked.clone() };

        fs::remove_dir(&self.root)?;
        fs::rename(&tree, &self.root)?;
        if unpacked.exists() {
            fs::remove_dir_all(&unpacked)?;
        }
        Ok(())
    }

    /// Replace the prefix placeholder in text files; returns the count rewritten
    pub fn relocate(&self, prefix: &Path) -> Result<usize> {
        let replacement = prefix.to_string_lossy();
        let mut rewritten = 0;

        for entry in WalkDir::new(&self.root) {
            let entry = entry.map_err(|e| Error::IoError(format!("Failed to scan keg: {}", e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let bytes = fs::read(entry.path())?;
            let Ok(text) = std::str::from_utf8(&bytes) else {
                continue;
            };
            if text.contains(PREFIX_PLACEHOLDER) {
                fs::write(entry.path(), text.replace(PREFIX_PLACEHOLDER, &replacement))?;
                rewritten += 1;
            }
        }

        if rewritten > 0 {
            info!("Relocated {} file(s) to {}", rewritten, prefix.display());
        }
        Ok(rewritten)
    }

    pub fn inventory(&self) -> Result<InstalledArtifact> {
        InstalledArtifact::scan(&self.root)
    }

    /// Write the receipt and move the keg to `target` with one rename
    ///
    /// An existing keg at `target` is an error unless `force`; forced
    /// installs move the old keg aside so it can be restored.
    pub fn promote(
        self,
        receipt: &InstallReceipt,
        target: &Path,
        force: bool,
    ) -> Result<PromotedKeg> {
        if receipt.files.is_empty() {
            return Err(Error::InstallFailed(
                "Nothing was installed into the keg".to_string(),
            ));
        }

        let parent = target
            .parent()
            .ok_or_else(|| Error::InstallFailed(format!("Invalid keg path {}", target.display())))?;
        let created_parent = if parent.exists() {
            None
        } else {
            fs::create_dir_all(parent)?;
            Some(parent.to_path_buf())
        };

        let mut previous = None;
        if target.exists() {
            if !force {
                if let Some(dir) = &created_parent {
                    let _ = fs::remove_dir(dir);
                }
                return Err(Error::InstallFailed(format!(
                    "{} is already installed (use --force to reinstall)",
                    target.display()
                )));
            }
            let aside = self.staging.path().join("previous");
            fs::rename(target, &aside)?;
            warn!("Replacing existing keg {}", target.display());
            previous = Some(aside);
        }

        receipt.write(&self.root)?;

        if let Err(e) = fs::rename(&self.root, target) {
            if let Some(aside) = &previous {
                let _ = fs::rename(aside, target);
            }
            if let Some(dir) = &created_parent {
                let _ = fs::remove_dir(dir);
            }
            return Err(Error::InstallFailed(format!(
                "Failed to promote keg to {}: {}",
                target.display(),
                e
            )));
        }

        info!("Installed {}", target.display());
        Ok(PromotedKeg {
            keg: target.to_path_buf(),
            previous,
            created_parent,
            _staging: self.staging,
            _prefix: self._prefix,
        })
    }
}

/// A keg at its final path that can still be undone
pub struct PromotedKeg {
    keg: PathBuf,
    previous: Option<PathBuf>,
    created_parent: Option<PathBuf>,
    /// holds the replaced keg, if any, until commit or rollback
    _staging: TempDir,
    _prefix: CreatedDirs,
}

impl PromotedKeg {
    pub fn path(&self) -> &Path {
        &self.keg
    }

    /// Remove the new keg and put the prefix back as it was
    pub fn rollback(self) -> Result<()> {
        warn!("Rolling back {}", self.keg.display());
        fs::remove_dir_all(&self.keg)?;
        if let Some(aside) = &self.previous {
            fs::rename(aside, &self.keg)?;
        }
        if let Some(dir) = &self.created_parent {
            fs::remove_dir(dir)?;
        }
        Ok(())
    }

    /// Point `link` at the keg; the replaced keg, if any, is discarded
    pub fn commit(self, link: &Path) -> Result<PathBuf> {
        swap_symlink(&self.keg, link)?;
        Ok(self.keg)
    }
}

/// Atomically (re)point `link` at `target`
fn swap_symlink(target: &Path, link: &Path) -> Result<()> {
    let dir = link
        .parent()
        .ok_or_else(|| Error::InstallFailed(format!("Invalid link path {}", link.display())))?;
    fs::create_dir_all(dir)?;

    let file_name = link
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{}.{}.tmp", file_name, std::process::id()));
    if tmp.symlink_metadata().is_ok() {
        fs::remove_file(&tmp)?;
    }

    std::os::unix::fs::symlink(target, &tmp)?;
    fs::rename(&tmp, link)?;
    debug!("Linked {} -> {}", link.display(), target.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(files: InstalledArtifact) -> InstallReceipt {
        InstallReceipt::new("quantor", "3.2", "linux-x86_64", InstallOrigin::Source, files)
    }

    fn staged_with_binary(prefix: &Path) -> StagedKeg {
        let keg = StagedKeg::new(prefix).unwrap();
        fs::write(keg.dir(InstallDir::Bin).unwrap().join("quantor"), "bin").unwrap();
        fs::write(keg.dir(InstallDir::Lib).unwrap().join("libquantor.a"), "lib").unwrap();
        keg
    }

    fn listing(dir: &Path) -> Vec<PathBuf> {
        WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .map(|e| e.unwrap().path().to_path_buf())
            .collect()
    }

    #[test]
    fn test_roles() {
        assert_eq!(FileRole::of(Path::new("bin/quantor")), FileRole::Executable);
        assert_eq!(FileRole::of(Path::new("libexec/helper")), FileRole::Executable);
        assert_eq!(FileRole::of(Path::new("lib/libquantor.a")), FileRole::Library);
        assert_eq!(FileRole::of(Path::new("include/quantor.h")), FileRole::Library);
        assert_eq!(FileRole::of(Path::new("share/man/man1/q.1")), FileRole::Data);
        assert_eq!(FileRole::of(Path::new("README")), FileRole::Data);
    }

    #[test]
    fn test_promote_and_commit() {
        let prefix = tempfile::tempdir().unwrap();
        let layout = Layout::new(prefix.path());
        let keg = staged_with_binary(prefix.path());
        let files = keg.inventory().unwrap();
        assert_eq!(files.executables.len(), 1);
        assert_eq!(files.libraries.len(), 1);

        let target = layout.keg_path("quantor", "3.2");
        let promoted = keg.promote(&receipt(files.clone()), &target, false).unwrap();
        assert!(target.join("bin/quantor").is_file());

        let link = layout.opt_link("quantor");
        promoted.commit(&link).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), target);

        let stored = InstallReceipt::read(&target).unwrap();
        assert_eq!(stored.files, files);
        assert_eq!(stored.origin, InstallOrigin::Source);

        // staging directory is gone
        let leftovers: Vec<_> = fs::read_dir(prefix.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".staging"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_existing_keg_requires_force() {
        let prefix = tempfile::tempdir().unwrap();
        let target = Layout::new(prefix.path()).keg_path("quantor", "3.2");

        let first = staged_with_binary(prefix.path());
        let files = first.inventory().unwrap();
        first.promote(&receipt(files.clone()), &target, false).unwrap();

        let second = staged_with_binary(prefix.path());
        let err = second.promote(&receipt(files), &target, false).err().unwrap();
        assert!(matches!(err, Error::InstallFailed(_)));
    }

    #[test]
    fn test_rollback_restores_prefix() {
        let prefix = tempfile::tempdir().unwrap();
        let before = listing(prefix.path());

        let keg = staged_with_binary(prefix.path());
        let target = Layout::new(prefix.path()).keg_path("quantor", "3.2");
        let files = keg.inventory().unwrap();
        let promoted = keg.promote(&receipt(files), &target, false).unwrap();
        promoted.rollback().unwrap();

        assert_eq!(listing(prefix.path()), before);
    }

    #[test]
    fn test_forced_rollback_restores_previous_keg() {
        let prefix = tempfile::tempdir().unwrap();
        let target = Layout::new(prefix.path()).keg_path("quantor", "3.2");

        let old = StagedKeg::new(prefix.path()).unwrap();
        fs::write(old.dir(InstallDir::Bin).unwrap().join("quantor"), "old").unwrap();
        let files = old.inventory().unwrap();
        old.promote(&receipt(files), &target, false).unwrap();

        let new = StagedKeg::new(prefix.path()).unwrap();
        fs::write(new.dir(InstallDir::Bin).unwrap().join("quantor"), "new").unwrap();
        let files = new.inventory().unwrap();
        let promoted = new.promote(&receipt(files), &target, true).unwrap();
        assert_eq!(fs::read_to_string(target.join("bin/quantor")).unwrap(), "new");

        promoted.rollback().unwrap();
        assert_eq!(fs::read_to_string(target.join("bin/quantor")).unwrap(), "old");
    }

    #[test]
    fn test_empty_keg_rejected() {
        let prefix = tempfile::tempdir().unwrap();
        let keg = StagedKeg::new(prefix.path()).unwrap();
        let target = Layout::new(prefix.path()).keg_path("quantor", "3.2");
        let err = keg
            .promote(&receipt(InstalledArtifact::default()), &target, false)
            .err()
            .unwrap();
        assert!(matches!(err, Error::InstallFailed(_)));
        assert!(!target.exists());
    }

    #[test]
    fn test_relocate_placeholders() {
        let prefix = tempfile::tempdir().unwrap();
        let keg = StagedKeg::new(prefix.path()).unwrap();
        let script = keg.dir(InstallDir::Bin).unwrap().join("wrapper");
        fs::write(&script, "#!/bin/sh\nexec @@PREFIX@@/opt/quantor/bin/quantor\n").unwrap();
        fs::write(keg.dir(InstallDir::Lib).unwrap().join("blob"), [0xff, 0xfe, 0x00]).unwrap();

        assert_eq!(keg.relocate(Path::new("/opt/cellar")).unwrap(), 1);
        assert_eq!(
            fs::read_to_string(&script).unwrap(),
            "#!/bin/sh\nexec /opt/cellar/opt/quantor/bin/quantor\n"
        );
    }

    #[test]
    fn test_abandoned_staging_removes_prefix_it_created() {
        let root = tempfile::tempdir().unwrap();
        let prefix = root.path().join("fresh").join("cellar");

        let keg = StagedKeg::new(&prefix).unwrap();
        fs::write(keg.dir(InstallDir::Bin).unwrap().join("quantor"), "bin").unwrap();
        assert!(prefix.is_dir());
        drop(keg);

        assert!(!root.path().join("fresh").exists());
    }

    #[test]
    fn test_rollback_removes_prefix_it_created() {
        let root = tempfile::tempdir().unwrap();
        let prefix = root.path().join("cellar");

        let keg = staged_with_binary(&prefix);
        let target = Layout::new(&prefix).keg_path("quantor", "3.2");
        let files = keg.inventory().unwrap();
        keg.promote(&receipt(files), &target, false)
            .unwrap()
            .rollback()
            .unwrap();

        assert!(!prefix.exists());
    }

    #[test]
    fn test_existing_prefix_is_kept() {
        let prefix = tempfile::tempdir().unwrap();
        drop(StagedKeg::new(prefix.path()).unwrap());
        assert!(prefix.path().is_dir());
    }

    #[test]
    fn test_absorb_destdir_moves_keg_subtree() {
        let prefix = tempfile::tempdir().unwrap();
        let target = Layout::new(prefix.path()).keg_path("quantor", "3.2");
        let keg = staged_with_binary(prefix.path());

        let dest = keg.destdir().unwrap();
        let inside = dest.join(target.strip_prefix("/").unwrap());
        fs::create_dir_all(inside.join("share/man/man1")).unwrap();
        fs::write(inside.join("share/man/man1/quantor.1"), "man").unwrap();
        fs::create_dir_all(dest.join("usr/local")).unwrap();
        fs::write(dest.join("usr/local/stray"), "x").unwrap();

        let (moved, strays) = keg.absorb_destdir(&target).unwrap();
        assert_eq!(moved, 1);
        assert_eq!(strays, vec![PathBuf::from("/usr/local/stray")]);
        assert!(keg.root().join("share/man/man1/quantor.1").is_file());
        assert!(keg.root().join("bin/quantor").is_file());
        assert!(!dest.exists());
    }
}
