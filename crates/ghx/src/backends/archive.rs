// ai
//! 🗜️📡 Archive Source: "give me hour H" and it shows up, decompressed, eventually.
//!
//! INT. LOCAL DISK: 4:12 AM. The cache directory holds 2,000 gzip files and a
//! grudge. Every one of them was downloaded exactly once, because re-downloading
//! 300 MiB to learn what we already knew is how bandwidth bills are born.
//!
//! Contract:
//! - cache first: `{cache_dir}/{year}-{month:02}-{day:02}-{hour}.json.gz`
//! - cache miss: GET `{base_url}/{file_name}`, persist (temp file + fsync + rename), then read
//! - 404: `FetchOutcome::NotAvailable`. Not an error. The hour just isn't published yet.
//! - anything else going sideways: `GhxError::FetchFailed`, the orchestrator skips the bucket
//!
//! 🧠 Knowledge graph: the orchestrator is generic over [`ArchiveSource`], so tests can
//! hand it a scripted archive and production hands it [`CachedHttpArchive`].

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use flate2::read::MultiGzDecoder;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};

use crate::common::Bucket;
use crate::errors::GhxError;

/// 🔧 Where the archive lives, where we keep our copy, and which days we want.
#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveConfig {
    /// 📡 Remote root. Object names are appended as `/{file_name}`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 📁 Local cache. Created on startup if missing.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// 📅 First day to ingest (inclusive).
    #[serde(default = "default_start")]
    pub start: NaiveDate,
    /// 📅 Last day to ingest (inclusive).
    #[serde(default = "default_end")]
    pub end: NaiveDate,
    /// ⏳ Whole-request timeout for one archive download. These files are not small.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://data.gharchive.org".to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("data")
}

// 📅 all of 2019 unless told otherwise
fn default_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2019, 1, 1).unwrap_or_default()
}

fn default_end() -> NaiveDate {
    NaiveDate::from_ymd_opt(2019, 12, 31).unwrap_or_default()
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            cache_dir: default_cache_dir(),
            start: default_start(),
            end: default_end(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// 📦 What a fetch can legitimately produce.
#[derive(Debug)]
pub enum FetchOutcome {
    /// ✅ The decompressed NDJSON for the hour.
    Fetched(Vec<u8>),
    /// 💤 The hour has not been published (remote 404). Skip it, no drama.
    NotAvailable,
}

/// 🚰 Resolves a bucket to its raw decompressed bytes.
#[async_trait]
pub trait ArchiveSource: std::fmt::Debug + Send + Sync {
    async fn fetch(&self, bucket: &Bucket) -> Result<FetchOutcome, GhxError>;
}

/// 🗜️ The real one: local gzip cache in front of an HTTPS archive.
#[derive(Debug)]
pub struct CachedHttpArchive {
    client: reqwest::Client,
    config: ArchiveConfig,
}

impl CachedHttpArchive {
    /// 🚀 Builds the HTTP client and makes sure the cache directory exists.
    pub async fn new(config: ArchiveConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("💀 The HTTP client refused to be born. Probably TLS. It's always TLS.")?;

        tokio::fs::create_dir_all(&config.cache_dir)
            .await
            .with_context(|| {
                format!(
                    "💀 Could not create the archive cache directory '{}'. Check permissions, check disk, check vibes.",
                    config.cache_dir.display()
                )
            })?;

        Ok(Self { client, config })
    }

    /// 📁 Where this bucket's gzip lives (or will live) on disk.
    pub fn cache_path(&self, bucket: &Bucket) -> PathBuf {
        self.config.cache_dir.join(bucket.file_name())
    }

    fn url_for(&self, bucket: &Bucket) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            bucket.file_name()
        )
    }

    /// 📡 Download into the cache. `Ok(false)` means the remote said 404.
    async fn download(&self, bucket: &Bucket, destination: &Path) -> Result<bool> {
        let url = self.url_for(bucket);
        debug!(bucket = %bucket, %url, "📡 cache miss, downloading");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("💀 GET {url} never came back with an answer"))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            anyhow::bail!("💀 GET {url} answered {status}. The archive is having a day.");
        }

        let body = response
            .bytes()
            .await
            .with_context(|| format!("💀 GET {url} started strong and died mid-body"))?;

        // 🔒 temp file + fsync + rename: a crash mid-download never leaves a half file
        // sitting where the cache lookup would trust it.
        let partial = destination.with_extension("part");
        let mut file = tokio::fs::File::create(&partial)
            .await
            .with_context(|| format!("💀 could not create '{}'", partial.display()))?;
        file.write_all(&body)
            .await
            .with_context(|| format!("💀 could not write '{}'", partial.display()))?;
        file.sync_all()
            .await
            .with_context(|| format!("💀 could not fsync '{}'", partial.display()))?;
        drop(file);
        tokio::fs::rename(&partial, destination)
            .await
            .with_context(|| format!("💀 could not move '{}' into place", partial.display()))?;

        trace!(bucket = %bucket, bytes = body.len(), "💾 cached");
        Ok(true)
    }
}

/// 🫁 Inflate a (possibly multi-member) gzip blob.
pub(crate) fn gunzip(compressed: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut inflated = Vec::with_capacity(compressed.len() * 8);
    MultiGzDecoder::new(compressed).read_to_end(&mut inflated)?;
    Ok(inflated)
}

#[async_trait]
impl ArchiveSource for CachedHttpArchive {
    async fn fetch(&self, bucket: &Bucket) -> Result<FetchOutcome, GhxError> {
        let fetch_failed = |reason: String| GhxError::FetchFailed {
            bucket: bucket.key(),
            reason,
        };
        let path = self.cache_path(bucket);

        let cached = tokio::fs::try_exists(&path).await.unwrap_or(false);
        if !cached {
            match self.download(bucket, &path).await {
                Ok(true) => {}
                Ok(false) => return Ok(FetchOutcome::NotAvailable),
                Err(err) => return Err(fetch_failed(format!("{err:#}"))),
            }
        } else {
            trace!(bucket = %bucket, "💾 cache hit");
        }

        let compressed = tokio::fs::read(&path)
            .await
            .map_err(|e| fetch_failed(format!("reading '{}': {e}", path.display())))?;

        let inflated = tokio::task::spawn_blocking(move || gunzip(&compressed))
            .await
            .map_err(|e| fetch_failed(format!("decompression task died: {e}")))?;

        match inflated {
            Ok(bytes) => Ok(FetchOutcome::Fetched(bytes)),
            Err(e) => {
                // 🗑️ a corrupt cache entry fails every run until it is gone
                let stuck = if evict(bucket, &path).await {
                    ""
                } else {
                    ", and the corrupt cache file is still there"
                };
                Err(fetch_failed(format!("gunzip: {e}{stuck}")))
            }
        }
    }
}

/// 🗑️ Remove a cache entry that would not inflate. `false` when it is still on disk.
async fn evict(bucket: &Bucket, path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            warn!(bucket = %bucket, path = %path.display(), "🗑️ cached archive was corrupt, evicted it");
            true
        }
        Err(e) => {
            warn!(
                bucket = %bucket,
                path = %path.display(),
                error = %e,
                "🗑️ cached archive is corrupt and could not be evicted, delete it by hand"
            );
            false
        }
    }
}

/// 🧠 An archive that lives in a `HashMap`. Unknown buckets are `NotAvailable`,
/// buckets marked broken are `FetchFailed`. Every fetch is written down, in order,
/// so whoever is asking can check we walked the calendar the right way round.
#[derive(Debug, Default)]
pub struct InMemoryArchive {
    hours: HashMap<Bucket, Vec<u8>>,
    broken: HashSet<Bucket>,
    fetched: Mutex<Vec<Bucket>>,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// 📦 Publish an hour of (already decompressed) NDJSON.
    pub fn with_hour(mut self, bucket: Bucket, ndjson: impl Into<Vec<u8>>) -> Self {
        self.hours.insert(bucket, ndjson.into());
        self
    }

    /// 💥 Make an hour fail like a flaky network would.
    pub fn with_broken_hour(mut self, bucket: Bucket) -> Self {
        self.broken.insert(bucket);
        self
    }

    /// 📜 Buckets requested so far, in request order.
    pub fn fetch_log(&self) -> Vec<Bucket> {
        self.fetched
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ArchiveSource for InMemoryArchive {
    async fn fetch(&self, bucket: &Bucket) -> Result<FetchOutcome, GhxError> {
        if let Ok(mut log) = self.fetched.lock() {
            log.push(*bucket);
        }
        if self.broken.contains(bucket) {
            return Err(GhxError::FetchFailed {
                bucket: bucket.key(),
                reason: "connection reset by a very rude peer".to_string(),
            });
        }
        Ok(self
            .hours
            .get(bucket)
            .map_or(FetchOutcome::NotAvailable, |bytes| {
                FetchOutcome::Fetched(bytes.clone())
            }))
    }
}
