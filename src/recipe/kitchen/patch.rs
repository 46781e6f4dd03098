// src/recipe/kitchen/patch.rs

//! Patch application against an extracted source tree
//!
//! Patches are unified diffs, one or more file sections each. Every section
//! is checked against an in-memory overlay of the tree; nothing touches disk
//! until all patches have been accepted, so a failure leaves the tree as it
//! was. A section whose reverse applies cleanly is already applied and counts
//! as success.

use crate::error::{Error, Result};
use crate::recipe::format::PatchInfo;
use crate::recipe::parser::is_workspace_relative;
use diffy::Patch;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What happened to each patch, by id
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PatchReport {
    pub applied: Vec<String>,
    /// Patches whose every file section was already present
    pub already_applied: Vec<String>,
}

/// One `---`/`+++` file section of a diff, trimmed to exactly its hunks
#[derive(Debug)]
struct FileSection {
    old_path: Option<String>,
    new_path: Option<String>,
    text: String,
}

/// Pending file contents: `None` means the file is deleted
///
/// Contents are raw bytes; sources are not required to be UTF-8.
type Overlay = BTreeMap<PathBuf, Option<Vec<u8>>>;

enum SectionOutcome {
    Applied,
    AlreadyApplied,
}

/// Apply `patches` in order to `source_dir`
pub fn apply_patches(source_dir: &Path, patches: &[PatchInfo]) -> Result<PatchReport> {
    let mut overlay = Overlay::new();
    let mut report = PatchReport::default();

    for (index, info) in patches.iter().enumerate() {
        let id = info.display_id(index);
        let fail = |reason: String| Error::PatchFailed {
            index: index + 1,
            id: id.clone(),
            reason,
        };

        let diff = info
            .diff
            .as_deref()
            .ok_or_else(|| fail("patch has no diff text".to_string()))?;
        let sections = split_sections(diff).map_err(&fail)?;

        let mut changed = false;
        for section in &sections {
            let outcome =
                apply_section(source_dir, &mut overlay, section, info.strip).map_err(&fail)?;
            changed |= matches!(outcome, SectionOutcome::Applied);
        }

        if changed {
            info!("Applied patch {}", id);
            report.applied.push(id);
        } else {
            info!("Patch {} already applied, skipping", id);
            report.already_applied.push(id);
        }
    }

    flush(source_dir, overlay)?;
    Ok(report)
}

fn apply_section(
    root: &Path,
    overlay: &mut Overlay,
    section: &FileSection,
    strip: u32,
) -> std::result::Result<SectionOutcome, String> {
    let old = section
        .old_path
        .as_deref()
        .map(|p| strip_path(p, strip))
        .transpose()?;
    let new = section
        .new_path
        .as_deref()
        .map(|p| strip_path(p, strip))
        .transpose()?;
    let target = new
        .clone()
        .or(old.clone())
        .ok_or_else(|| "file section names no path".to_string())?;

    let patch =
        Patch::from_bytes(section.text.as_bytes()).map_err(|e| format!("invalid diff: {}", e))?;
    let reversed = patch.reverse();
    let current = read_current(root, overlay, &target)?;
    let forward = |base: &[u8]| diffy::apply_bytes(base, &patch).ok();
    let reverse = |base: &[u8]| diffy::apply_bytes(base, &reversed).ok();

    let (outcome, next) = match (old.is_some(), new.is_some(), current) {
        // creation
        (false, true, None) => {
            let created = forward(b"").ok_or("cannot create file from diff")?;
            (SectionOutcome::Applied, Some(created))
        }
        (false, true, Some(existing)) => match reverse(&existing[..]) {
            Some(base) if base.is_empty() => (SectionOutcome::AlreadyApplied, Some(existing)),
            _ => return Err(format!("{} already exists", target.display())),
        },
        // deletion
        (true, false, None) => (SectionOutcome::AlreadyApplied, None),
        (true, false, Some(existing)) => {
            forward(&existing[..]).ok_or("file to delete does not match diff")?;
            (SectionOutcome::Applied, None)
        }
        // modification
        (_, _, None) => return Err(format!("{} does not exist", target.display())),
        (_, _, Some(existing)) => match forward(&existing[..]) {
            Some(patched) => (SectionOutcome::Applied, Some(patched)),
            None if reverse(&existing[..]).is_some() => {
                (SectionOutcome::AlreadyApplied, Some(existing))
            }
            None => return Err(format!("hunks do not apply to {}", target.display())),
        },
    };

    match outcome {
        SectionOutcome::Applied => debug!("patched {}", target.display()),
        SectionOutcome::AlreadyApplied => debug!("{} already patched", target.display()),
    }
    overlay.insert(target, next);
    Ok(outcome)
}

fn read_current(
    root: &Path,
    overlay: &Overlay,
    rel: &Path,
) -> std::result::Result<Option<Vec<u8>>, String> {
    if let Some(state) = overlay.get(rel) {
        return Ok(state.clone());
    }
    let path = root.join(rel);
    if !path.exists() {
        return Ok(None);
    }
    fs::read(&path)
        .map(Some)
        .map_err(|e| format!("cannot read {}: {}", rel.display(), e))
}

/// Write the overlay to disk once every patch has been accepted
fn flush(root: &Path, overlay: Overlay) -> Result<()> {
    for (rel, state) in overlay {
        let path = root.join(&rel);
        match state {
            Some(content) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&path, content)?;
            }
            None if path.exists() => fs::remove_file(&path)?,
            None => {}
        }
    }
    Ok(())
}

/// Drop `strip` leading components, like `patch -p<strip>`
fn strip_path(raw: &str, strip: u32) -> std::result::Result<PathBuf, String> {
    let parts: Vec<&str> = raw.split('/').filter(|p| !p.is_empty()).collect();
    let kept = parts
        .get(strip as usize..)
        .filter(|rest| !rest.is_empty())
        .ok_or_else(|| format!("cannot strip {} components from {}", strip, raw))?;
    let path: PathBuf = kept.iter().collect();
    if !is_workspace_relative(&path) {
        return Err(format!("{} escapes the source tree", raw));
    }
    Ok(path)
}

/// Path from a `--- ` or `+++ ` header line; `/dev/null` is `None`
fn header_path(line: &str) -> Option<String> {
    let name = line[4..].trim_end_matches(['\n', '\r']);
    let name = name.split('\t').next().unwrap_or(name).trim();
    if name == "/dev/null" {
        None
    } else {
        Some(name.trim_matches('"').to_string())
    }
}

/// Old/new line counts from `@@ -a[,b] +c[,d] @@`
fn hunk_counts(line: &str) -> std::result::Result<(usize, usize), String> {
    let malformed = || format!("malformed hunk header: {}", line.trim_end());
    let mut fields = line.split_whitespace().skip(1);
    let count = |field: Option<&str>, sign: char| -> Option<usize> {
        let range = field?.strip_prefix(sign)?;
        match range.split_once(',') {
            Some((_, n)) => n.parse().ok(),
            None => range.parse::<usize>().ok().map(|_| 1),
        }
    };
    let old = count(fields.next(), '-').ok_or_else(malformed)?;
    let new = count(fields.next(), '+').ok_or_else(malformed)?;
    Ok((old, new))
}

/// Split a (possibly git-formatted, multi-file) diff into file sections
///
/// Hunks are consumed by their declared line counts, so mail headers, git
/// `index` lines and signatures between sections are ignored.
fn split_sections(diff: &str) -> std::result::Result<Vec<FileSection>, String> {
    let lines: Vec<&str> = diff.split_inclusive('\n').collect();
    let mut sections = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let is_header = lines[i].starts_with("--- ")
            && lines.get(i + 1).is_some_and(|l| l.starts_with("+++ "));
        if !is_header {
            i += 1;
            continue;
        }

        let mut section = FileSection {
            old_path: header_path(lines[i]),
            new_path: header_path(lines[i + 1]),
            text: format!("{}{}", ensure_newline(lines[i]), ensure_newline(lines[i + 1])),
        };
        i += 2;

        while i < lines.len() && lines[i].starts_with("@@ ") {
            let (mut old, mut new) = hunk_counts(lines[i])?;
            section.text.push_str(ensure_newline(lines[i]).as_ref());
            i += 1;

            while (old > 0 || new > 0) && i < lines.len() {
                let line = lines[i];
                match line.chars().next() {
                    Some(' ') => {
                        old = old.saturating_sub(1);
                        new = new.saturating_sub(1);
                    }
                    Some('-') => old = old.saturating_sub(1),
                    Some('+') => new = new.saturating_sub(1),
                    Some('\\') => {}
                    // some mailers strip the space from empty context lines
                    Some('\n') | Some('\r') | None => {
                        old = old.saturating_sub(1);
                        new = new.saturating_sub(1);
                        section.text.push(' ');
                    }
                    Some(_) => return Err(format!("unexpected line in hunk: {}", line.trim_end())),
                }
                section.text.push_str(ensure_newline(line).as_ref());
                i += 1;
            }
            if old > 0 || new > 0 {
                return Err("diff ends inside a hunk".to_string());
            }
            while i < lines.len() && lines[i].starts_with('\\') {
                section.text.push_str(ensure_newline(lines[i]).as_ref());
                i += 1;
            }
        }

        sections.push(section);
    }

    if sections.is_empty() {
        return Err("no file sections found in diff".to_string());
    }
    Ok(sections)
}

fn ensure_newline(line: &str) -> std::borrow::Cow<'_, str> {
    if line.ends_with('\n') {
        line.into()
    } else {
        format!("{}\n", line).into()
    }
}
