// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use cellar::recipe::kitchen::{DirArchiveStore, Fetcher, StaticLocator};
use cellar::recipe::{Kitchen, KitchenConfig};
use cellar::{Error, Platform, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use walkdir::WalkDir;

/// Build a `.tar.gz` in memory from `(path, content, mode)` entries.
pub fn tar_gz(entries: &[(&str, &str, u32)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, content, mode) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder
            .append_data(&mut header, path, content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// A `sh` script that prints `output` and exits with `code`.
pub fn script(output: &str, code: i32) -> String {
    format!("#!/bin/sh\nprintf '%s\\n' '{}'\nexit {}\n", output, code)
}

/// `sha256:<hex>` for `bytes`.
pub fn checksum(bytes: &[u8]) -> String {
    format!("sha256:{}", cellar::hash::sha256(bytes))
}

/// Serves canned payloads by URL and records every request.
#[derive(Default)]
pub struct CountingFetcher {
    payloads: HashMap<String, Vec<u8>>,
    calls: Mutex<Vec<String>>,
}

impl CountingFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.payloads.insert(url.to_string(), bytes);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Fetcher for CountingFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.calls.lock().unwrap().push(url.to_string());
        self.payloads
            .get(url)
            .cloned()
            .ok_or_else(|| Error::DownloadError(format!("HTTP 404 for {}", url)))
    }
}

/// Prefix, cache and kitchen for one test; keep it alive for the test's duration.
pub struct TestKitchen {
    pub prefix: tempfile::TempDir,
    pub cache: tempfile::TempDir,
    pub fetcher: Arc<CountingFetcher>,
    pub kitchen: Kitchen,
}

/// A kitchen on `linux-x64` with an isolated prefix, cache and canned fetcher.
pub fn kitchen(fetcher: CountingFetcher) -> TestKitchen {
    kitchen_with(fetcher, |_| {})
}

/// Like [`kitchen`], with a hook to adjust the config.
pub fn kitchen_with(fetcher: CountingFetcher, adjust: impl FnOnce(&mut KitchenConfig)) -> TestKitchen {
    let prefix = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(fetcher);

    let mut config = KitchenConfig::with_prefix(prefix.path());
    config.cache_dir = cache.path().to_path_buf();
    config.platform = Platform::parse("linux-x64").unwrap();
    adjust(&mut config);

    let kitchen = Kitchen::new(config)
        .unwrap()
        .with_fetcher(fetcher.clone())
        .with_locator(Arc::new(StaticLocator::new()))
        .with_store(Arc::new(DirArchiveStore::new(cache.path())));

    TestKitchen {
        prefix,
        cache,
        fetcher,
        kitchen,
    }
}

/// Every path under `root`, relative and sorted.
pub fn listing(root: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap().path().strip_prefix(root).unwrap().to_path_buf())
        .collect();
    paths.sort();
    paths
}
