//! Bucket Catalog: `buckets.csv` under the storage root, one row per bucket.
//!
//! The row is the single source of truth for bucket existence. Each bucket
//! also owns a directory of the same name holding its object catalog and
//! blobs; that directory is derived from the row, never the other way round.

use super::{
    CatalogStore,
    lock::{CatalogLock, LockTable},
    object,
};
use crate::{
    errors::{StorageError, StorageResult},
    models::{bucket::BucketRecord, object::ObjectRecord},
};
use chrono::Utc;
use std::{
    fmt,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::{debug, info, warn};

pub const BUCKET_CATALOG_FILE: &str = "buckets.csv";

const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

/// Bucket naming rules, in the order they are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameRule {
    Empty,
    Length,
    HyphenEdge,
    Charset,
    ConsecutivePeriods,
    ConsecutiveHyphens,
    Reserved,
}

impl fmt::Display for NameRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            NameRule::Empty => "bucket name is required",
            NameRule::Length => "must be between 3 and 63 characters",
            NameRule::HyphenEdge => "must not begin or end with a hyphen",
            NameRule::Charset => {
                "allowed characters are lowercase letters, digits, dots, and hyphens"
            }
            NameRule::ConsecutivePeriods => "two consecutive periods are not allowed",
            NameRule::ConsecutiveHyphens => "two consecutive hyphens are not allowed",
            NameRule::Reserved => "name is reserved for the bucket catalog",
        };
        f.write_str(reason)
    }
}

/// Return the first naming rule `name` violates.
pub fn validate_name(name: &str) -> Result<(), NameRule> {
    if name.is_empty() {
        return Err(NameRule::Empty);
    }
    // Byte length; anything non-ASCII fails the charset rule anyway.
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&name.len()) {
        return Err(NameRule::Length);
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(NameRule::HyphenEdge);
    }
    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
    {
        return Err(NameRule::Charset);
    }
    if name.contains("..") {
        return Err(NameRule::ConsecutivePeriods);
    }
    if name.contains("--") {
        return Err(NameRule::ConsecutiveHyphens);
    }
    if name == BUCKET_CATALOG_FILE {
        return Err(NameRule::Reserved);
    }
    Ok(())
}

pub(crate) fn ensure_name(name: &str) -> StorageResult<()> {
    validate_name(name).map_err(|rule| StorageError::InvalidBucketName {
        name: name.to_string(),
        rule,
    })
}

/// Handle to the bucket catalog. Every public operation takes the catalog
/// lock for its whole read-scan-rewrite sequence.
#[derive(Debug, Clone)]
pub struct BucketCatalog {
    root: PathBuf,
    store: CatalogStore<BucketRecord>,
    lock: CatalogLock,
}

impl BucketCatalog {
    pub fn new(root: impl Into<PathBuf>, locks: &LockTable) -> Self {
        let root = root.into();
        Self {
            store: CatalogStore::new(root.join(BUCKET_CATALOG_FILE)),
            lock: locks.get(BUCKET_CATALOG_FILE),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory backing `name`. Does not check existence.
    pub fn bucket_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Create the storage root and an empty catalog if they are missing.
    /// Existing rows are preserved.
    pub async fn init(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.root).await?;
        self.store.ensure_exists().await?;
        Ok(())
    }

    /// Create a bucket row and its directory.
    ///
    /// If the directory already exists without a row (an earlier create that
    /// failed after `mkdir`), the directory is adopted rather than reported as
    /// a duplicate, so retrying a failed create is safe.
    pub async fn create(&self, name: &str) -> StorageResult<BucketRecord> {
        ensure_name(name)?;
        let _guard = self.lock.acquire().await?;

        let rows = self.store.read_all_or_empty().await?;
        if rows.iter().any(|row| row.name == name) {
            return Err(StorageError::BucketAlreadyExists(name.to_string()));
        }

        let dir = self.bucket_dir(name);
        let objects = CatalogStore::<ObjectRecord>::new(object::catalog_path(&dir));
        let is_empty = match fs::create_dir(&dir).await {
            Ok(()) => {
                objects.ensure_exists().await?;
                true
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                if !fs::metadata(&dir).await?.is_dir() {
                    return Err(StorageError::Io(io::Error::new(
                        ErrorKind::AlreadyExists,
                        format!("{} exists and is not a directory", dir.display()),
                    )));
                }
                warn!(bucket = name, "adopting bucket directory with no catalog row");
                objects.ensure_exists().await?;
                objects.read_all().await?.is_empty()
            }
            Err(err) => return Err(err.into()),
        };

        let mut record = BucketRecord::new(name, Utc::now());
        record.is_empty = is_empty;
        // On failure the directory stays behind; the next create adopts it.
        self.store.append(&record).await?;

        info!(bucket = name, "bucket created");
        Ok(record)
    }

    /// All rows in catalog order.
    pub async fn list(&self) -> StorageResult<Vec<BucketRecord>> {
        let _guard = self.lock.acquire().await?;
        Ok(self.store.read_all_or_empty().await?)
    }

    pub async fn get(&self, name: &str) -> StorageResult<BucketRecord> {
        ensure_name(name)?;
        let _guard = self.lock.acquire().await?;
        self.store
            .read_all_or_empty()
            .await?
            .into_iter()
            .find(|row| row.name == name)
            .ok_or_else(|| StorageError::BucketNotFound(name.to_string()))
    }

    /// Remove an empty bucket: drop its row, then its directory.
    ///
    /// The row goes first so that a failure in between leaves an orphaned
    /// directory, which [`create`](Self::create) knows how to adopt.
    pub async fn delete(&self, name: &str) -> StorageResult<()> {
        ensure_name(name)?;
        let _guard = self.lock.acquire().await?;

        let mut rows = self.store.read_all_or_empty().await?;
        let Some(pos) = rows.iter().position(|row| row.name == name) else {
            return Err(StorageError::BucketNotFound(name.to_string()));
        };
        if !rows[pos].is_empty {
            return Err(StorageError::BucketNotEmpty(name.to_string()));
        }
        rows.remove(pos);
        self.store.rewrite_all(&rows).await?;

        let dir = self.bucket_dir(name);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => debug!("removed bucket directory {}", dir.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("bucket directory {} already missing", dir.display());
            }
            Err(err) => warn!(
                "bucket `{}` deleted but directory {} remains: {}",
                name,
                dir.display(),
                err
            ),
        }

        info!(bucket = name, "bucket deleted");
        Ok(())
    }

    /// Record an object mutation: bump `modified_at` and set `is_empty`.
    pub async fn touch(&self, name: &str, is_empty: bool) -> StorageResult<BucketRecord> {
        let _guard = self.lock.acquire().await?;

        let mut rows = self.store.read_all_or_empty().await?;
        let Some(row) = rows.iter_mut().find(|row| row.name == name) else {
            return Err(StorageError::BucketNotFound(name.to_string()));
        };
        row.modified_at = Utc::now();
        row.is_empty = is_empty;
        let updated = row.clone();
        self.store.rewrite_all(&rows).await?;

        debug!(bucket = name, is_empty, "bucket touched");
        Ok(updated)
    }
}
