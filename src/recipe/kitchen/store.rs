// src/recipe/kitchen/store.rs

//! Local cache of downloaded source and bottle archives
//!
//! The store is append-only from the kitchen's point of view: entries are
//! written once they have been verified and evicted when the cached bytes no
//! longer match the checksum a recipe expects.

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::platform::Platform;
use fs2::FileExt;
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Identity of a cached archive
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArchiveKey {
    Bottle {
        name: String,
        version: String,
        platform: Platform,
        rebuild: u32,
    },
    Source {
        checksum: String,
    },
}

impl ArchiveKey {
    pub fn source(checksum: &str) -> Self {
        let checksum = Hash::parse_prefixed(checksum)
            .map(|h| h.to_prefixed_string())
            .unwrap_or_else(|_| checksum.to_string());
        Self::Source { checksum }
    }

    /// Relative file name inside a store directory
    fn file_name(&self) -> PathBuf {
        match self {
            Self::Bottle {
                name,
                version,
                platform,
                rebuild,
            } => PathBuf::from("bottles").join(format!(
                "{}--{}--{}--{}.tar.gz",
                sanitize(name),
                sanitize(version),
                platform,
                rebuild
            )),
            Self::Source { checksum } => {
                PathBuf::from("sources").join(sanitize(&checksum.replace(':', "_")))
            }
        }
    }
}

impl fmt::Display for ArchiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bottle {
                name,
                version,
                platform,
                rebuild,
            } => write!(
                f,
                "bottle {} {} {} rebuild {}",
                name, version, platform, rebuild
            ),
            Self::Source { checksum } => write!(f, "source {}", checksum),
        }
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Read/write access to cached archives
pub trait ArchiveStore: Send + Sync {
    fn get(&self, key: &ArchiveKey) -> Result<Option<Vec<u8>>>;

    /// Store verified bytes; concurrent writers to one key are serialized
    fn put(&self, key: &ArchiveKey, bytes: &[u8]) -> Result<()>;

    fn evict(&self, key: &ArchiveKey) -> Result<()>;
}

/// One file per key under a root directory
#[derive(Debug, Clone)]
pub struct DirArchiveStore {
    root: PathBuf,
}

impl DirArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &ArchiveKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    /// Hold an exclusive lock on `<entry>.lock` for the duration of `f`
    fn with_lock<T>(&self, path: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let mut lock_path = path.as_os_str().to_owned();
        lock_path.push(".lock");
        let lock = File::create(&lock_path)?;
        lock.lock_exclusive()
            .map_err(|e| Error::IoError(format!("Failed to lock archive store entry: {}", e)))?;
        let result = f();
        let _ = fs2::FileExt::unlock(&lock);
        result
    }
}

impl ArchiveStore for DirArchiveStore {
    fn get(&self, key: &ArchiveKey) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => {
                debug!("Archive store hit: {}", key);
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Archive store miss: {}", key);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &ArchiveKey, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let dir = path
            .parent()
            .ok_or_else(|| Error::IoError(format!("Invalid store path {}", path.display())))?;
        fs::create_dir_all(dir)?;

        self.with_lock(&path, || {
            let mut tmp = NamedTempFile::new_in(dir)?;
            tmp.write_all(bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path)
                .map_err(|e| Error::IoError(format!("Failed to store {}: {}", key, e)))?;
            debug!("Stored {} at {}", key, path.display());
            Ok(())
        })
    }

    fn evict(&self, key: &ArchiveKey) -> Result<()> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(());
        }
        self.with_lock(&path, || match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        })
    }
}
