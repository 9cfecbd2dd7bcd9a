//! Download-once cache of base images.
//!
//! Each OS type gets one `cache_<os>.img` in the working directory. The
//! image is streamed into a hidden temporary file next to it and renamed into
//! place only once complete, so a crashed or failed download never leaves a
//! file that looks like a valid cache. Downloads are serialized per OS type;
//! concurrent callers for the same OS wait and then reuse the result.

use crate::catalog::OsImage;
use crate::error::{Error, Result};
use crate::instance::cache_path;
use crate::locks::KeyedLocks;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Write buffer size; bounds memory held per download.
const CHUNK_SIZE: usize = 1024 * 1024;

/// Result of [`ImageCache::ensure_cached`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOutcome {
    /// Cache image path.
    pub path: PathBuf,
    /// Whether this call performed the download.
    pub downloaded: bool,
}

/// Base image cache.
#[derive(Debug)]
pub struct ImageCache {
    vm_dir: PathBuf,
    http: reqwest::Client,
    locks: KeyedLocks,
}

impl ImageCache {
    /// Create a cache rooted at `vm_dir`.
    pub fn new(vm_dir: &Path, connect_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            vm_dir: vm_dir.to_path_buf(),
            http,
            locks: KeyedLocks::new(),
        })
    }

    /// Cache path for an OS type, whether or not it exists yet.
    pub fn path_for(&self, os_type: &str) -> PathBuf {
        cache_path(&self.vm_dir, os_type)
    }

    /// Return the cache image for `os_type`, downloading it first if absent.
    pub async fn ensure_cached(&self, os_type: &str, image: &OsImage) -> Result<CacheOutcome> {
        let path = self.path_for(os_type);
        let _guard = self.locks.lock(os_type).await;

        if tokio::fs::try_exists(&path).await? {
            tracing::debug!(os = %os_type, path = %path.display(), "cache hit");
            return Ok(CacheOutcome {
                path,
                downloaded: false,
            });
        }

        tracing::info!(os = %os_type, url = %image.image_url, "downloading base image");
        let bytes = self.download(&image.image_url, &path).await?;
        tracing::info!(os = %os_type, bytes, path = %path.display(), "base image cached");

        Ok(CacheOutcome {
            path,
            downloaded: true,
        })
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Download(format!("GET {url}: HTTP {status}")));
        }
        let expected = response.content_length();

        tokio::fs::create_dir_all(&self.vm_dir).await?;
        let part = tempfile::Builder::new()
            .prefix(".download-")
            .suffix(".part")
            .tempfile_in(&self.vm_dir)?;
        let file = tokio::fs::File::from_std(part.reopen()?);
        let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);

        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        writer.get_ref().sync_all().await?;
        drop(writer);

        if let Some(expected) = expected {
            if written != expected {
                // `part` is removed on drop.
                return Err(Error::Download(format!(
                    "GET {url}: truncated body ({written} of {expected} bytes)"
                )));
            }
        }

        part.persist(dest).map_err(|e| Error::Io(e.error))?;
        Ok(written)
    }
}
