// src/recipe/kitchen/archive.rs

//! Fetching and unpacking archives for the Kitchen

use crate::compression::{create_decoder_auto, CompressionFormat};
use crate::error::{Error, Result};
use reqwest::blocking::Client;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-request timeout; source tarballs can be large
const HTTP_TIMEOUT: Duration = Duration::from_secs(600);

/// Maximum attempts for one download
const MAX_RETRIES: u32 = 3;

/// Base retry delay, multiplied by the attempt number
const RETRY_DELAY_MS: u64 = 1000;

/// Retrieves the bytes behind a URL
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// HTTP(S) downloads with bounded retries
pub struct HttpFetcher {
    client: Client,
    max_retries: u32,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("cellar/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::DownloadError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
        })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let failure = match self.client.get(url).send() {
                Ok(response) if response.status().is_success() => {
                    let bytes = response.bytes().map_err(|e| {
                        Error::DownloadError(format!("Failed to read response from {url}: {e}"))
                    })?;
                    info!("Downloaded {} ({} bytes)", url, bytes.len());
                    return Ok(bytes.to_vec());
                }
                // client errors won't change on retry
                Ok(response) if response.status().is_client_error() => {
                    return Err(Error::DownloadError(format!(
                        "HTTP {} from {}",
                        response.status(),
                        url
                    )));
                }
                Ok(response) => format!("HTTP {}", response.status()),
                Err(e) => e.to_string(),
            };

            if attempt >= self.max_retries {
                return Err(Error::DownloadError(format!(
                    "Failed to fetch {url} after {attempt} attempts: {failure}"
                )));
            }
            warn!("Fetch attempt {} for {} failed: {}, retrying...", attempt, url, failure);
            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
        }
    }
}

/// Reads `file://` URLs and plain filesystem paths
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFetcher;

impl Fetcher for LocalFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let path = url.strip_prefix("file://").unwrap_or(url);
        debug!("Reading local archive {}", path);
        fs::read(path).map_err(|e| Error::DownloadError(format!("Failed to read {}: {}", path, e)))
    }
}

/// Dispatches on the URL scheme
pub struct DefaultFetcher {
    http: HttpFetcher,
    local: LocalFetcher,
}

impl DefaultFetcher {
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: HttpFetcher::new()?,
            local: LocalFetcher,
        })
    }
}

impl Fetcher for DefaultFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if url.starts_with("http://") || url.starts_with("https://") {
            self.http.fetch(url)
        } else if url.starts_with("file://") || !url.contains("://") {
            self.local.fetch(url)
        } else {
            Err(Error::UnsupportedFormat(format!("URL scheme of {}", url)))
        }
    }
}

/// Unpack a (possibly compressed) tarball into `dest`
///
/// The compression is detected from magic bytes. Entries that would land
/// outside `dest` are skipped by the tar reader.
pub fn extract_archive(bytes: &[u8], dest: &Path) -> Result<()> {
    let format = CompressionFormat::from_magic_bytes(bytes);
    debug!("Extracting {} archive into {}", format, dest.display());

    let decoder = create_decoder_auto(bytes)
        .map_err(|e| Error::UnsupportedFormat(e.to_string()))?;
    fs::create_dir_all(dest)?;

    let mut archive = tar::Archive::new(decoder);
    archive.set_overwrite(true);
    archive
        .unpack(dest)
        .map_err(|e| Error::UnsupportedFormat(format!("Failed to extract {} archive: {}", format, e)))
}

/// The directory builds run in: the single top-level directory if there is one
pub fn source_root(extracted: &Path) -> Result<PathBuf> {
    let entries: Vec<_> = fs::read_dir(extracted)?
        .filter_map(|e| e.ok())
        .collect();

    if entries.len() == 1 && entries[0].file_type().map(|t| t.is_dir()).unwrap_or(false) {
        let root = entries[0].path();
        debug!("Source directory: {}", root.display());
        return Ok(root);
    }
    Ok(extracted.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn tarball(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_extract_and_find_source_root() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = tarball(&[
            ("quantor-3.2/configure", "#!/bin/sh\n"),
            ("quantor-3.2/quantor.c", "int main(){}\n"),
        ]);
        extract_archive(&bytes, dir.path()).unwrap();

        let root = source_root(dir.path()).unwrap();
        assert!(root.ends_with("quantor-3.2"));
        assert!(root.join("configure").is_file());
    }

    #[test]
    fn test_flat_archive_root() {
        let dir = tempfile::tempdir().unwrap();
        extract_archive(&tarball(&[("a", "1"), ("b", "2")]), dir.path()).unwrap();
        assert_eq!(source_root(dir.path()).unwrap(), dir.path());
    }

    #[test]
    fn test_extract_garbage_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(extract_archive(b"\x1f\x8bnot really gzip", dir.path()).is_err());
    }

    #[test]
    fn test_local_fetcher() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("src.tar.gz");
        fs::write(&path, b"bytes").unwrap();

        let url = format!("file://{}", path.display());
        assert_eq!(LocalFetcher.fetch(&url).unwrap(), b"bytes");
        assert_eq!(
            DefaultFetcher::new().unwrap().fetch(path.to_str().unwrap()).unwrap(),
            b"bytes"
        );
        assert!(LocalFetcher.fetch("/definitely/not/here").is_err());
    }

    #[test]
    fn test_unknown_scheme() {
        let fetcher = DefaultFetcher::new().unwrap();
        assert!(matches!(
            fetcher.fetch("ftp://example.com/x.tar.gz"),
            Err(Error::UnsupportedFormat(_))
        ));
    }
}
