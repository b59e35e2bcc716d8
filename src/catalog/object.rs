//! Object Catalog: one `objects.csv` per bucket directory, one row per object.
//!
//! A bucket's object catalog is only reachable through
//! [`ObjectCatalogs::lock`], so every read and rewrite of it happens while
//! its lock is held. Blob placement goes through the same handle, which keeps
//! a row's `size` in step with the payload on disk.

use super::{
    CatalogStore,
    lock::{CatalogGuard, LockTable, LockTimeout},
};
use crate::{
    blob_store::{BlobStore, StagedBlob},
    errors::{StorageError, StorageResult},
    models::object::ObjectRecord,
};
use chrono::Utc;
use regex::Regex;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::LazyLock,
};
use tokio::fs::File;
use tracing::{debug, error, warn};

pub const OBJECT_CATALOG_FILE: &str = "objects.csv";

/// Keys double as file names, so they share the usual file name limit.
const MAX_OBJECT_KEY_LEN: usize = 255;

static KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9](?:[a-z0-9-]*[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?)*$")
        .expect("object key pattern compiles")
});

/// Check an object key: dot-separated, non-empty segments of lowercase
/// letters and digits, with hyphens allowed inside a segment.
pub fn validate_key(key: &str) -> Result<(), &'static str> {
    if key.is_empty() {
        return Err("key must not be empty");
    }
    if key.len() > MAX_OBJECT_KEY_LEN {
        return Err("key must be at most 255 bytes");
    }
    if !KEY_PATTERN.is_match(key) {
        return Err(
            "key must be dot-separated lowercase alphanumeric segments, hyphens only inside a segment",
        );
    }
    if key == OBJECT_CATALOG_FILE {
        return Err("key is reserved for the object catalog");
    }
    Ok(())
}

pub(crate) fn ensure_key(key: &str) -> StorageResult<()> {
    validate_key(key).map_err(|reason| StorageError::InvalidObjectKey {
        key: key.to_string(),
        reason,
    })
}

/// Location of the object catalog inside a bucket directory.
pub fn catalog_path(bucket_dir: &Path) -> PathBuf {
    bucket_dir.join(OBJECT_CATALOG_FILE)
}

/// Entry point to every bucket's object catalog.
#[derive(Debug, Clone)]
pub struct ObjectCatalogs {
    blobs: BlobStore,
    locks: LockTable,
}

impl ObjectCatalogs {
    pub fn new(blobs: BlobStore, locks: LockTable) -> Self {
        Self { blobs, locks }
    }

    /// Take `bucket`'s object catalog lock. The bucket is not checked for
    /// existence here; callers do that through the bucket catalog afterwards,
    /// which keeps the object-then-bucket lock order.
    pub async fn lock(&self, bucket: &str) -> Result<LockedObjectCatalog, LockTimeout> {
        let guard = self.locks.get(bucket).acquire().await?;
        Ok(LockedObjectCatalog {
            bucket: bucket.to_string(),
            store: CatalogStore::new(catalog_path(&self.blobs.bucket_dir(bucket))),
            blobs: self.blobs.clone(),
            _guard: guard,
        })
    }
}

/// One bucket's object catalog, locked for as long as this value lives.
///
/// A missing catalog file reads as an empty table: lookups then report
/// `ObjectNotFound` and `put` creates the file.
#[derive(Debug)]
pub struct LockedObjectCatalog {
    bucket: String,
    store: CatalogStore<ObjectRecord>,
    blobs: BlobStore,
    _guard: CatalogGuard,
}

impl LockedObjectCatalog {
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn not_found(&self, key: &str) -> StorageError {
        StorageError::ObjectNotFound {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        }
    }

    pub async fn list(&self) -> StorageResult<Vec<ObjectRecord>> {
        Ok(self.store.read_all_or_empty().await?)
    }

    pub async fn count(&self) -> StorageResult<usize> {
        Ok(self.list().await?.len())
    }

    pub async fn get(&self, key: &str) -> StorageResult<ObjectRecord> {
        self.list()
            .await?
            .into_iter()
            .find(|row| row.key == key)
            .ok_or_else(|| self.not_found(key))
    }

    /// Row plus an open handle on the blob.
    ///
    /// The handle stays valid after the lock is released, even if the key is
    /// overwritten or deleted, so the pair is always a consistent snapshot.
    pub async fn open(&self, key: &str) -> StorageResult<(ObjectRecord, File)> {
        let record = self.get(key).await?;
        let file = self.blobs.open(&self.bucket, key).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                error!(bucket = %self.bucket, key, "catalog row has no blob");
            }
            StorageError::Io(err)
        })?;

        let on_disk = file.metadata().await?.len();
        if on_disk != record.size {
            error!(
                bucket = %self.bucket,
                key,
                catalog = record.size,
                on_disk,
                "blob size disagrees with catalog"
            );
            return Err(StorageError::Io(io::Error::new(
                ErrorKind::InvalidData,
                format!(
                    "object `{}` in bucket `{}` is {} bytes on disk but {} in the catalog",
                    key, self.bucket, on_disk, record.size
                ),
            )));
        }
        Ok((record, file))
    }

    /// Install `blob` under `key` and record it.
    ///
    /// A new key is appended; an existing key has its row replaced through a
    /// full rewrite, so repeated puts never produce duplicate rows. If the
    /// catalog write fails the previous blob is put back.
    pub async fn put(&self, key: &str, blob: StagedBlob) -> StorageResult<ObjectRecord> {
        let record = ObjectRecord {
            key: key.to_string(),
            size: blob.size(),
            content_type: blob.content_type().to_string(),
            modified_at: Utc::now(),
        };

        // Read first: a broken catalog aborts before any blob moves.
        let mut rows = self.store.read_all_or_empty().await?;
        let installed = self.blobs.install(blob, &self.bucket, key).await?;

        let written = match rows.iter_mut().find(|row| row.key == key) {
            Some(existing) => {
                *existing = record.clone();
                self.store.rewrite_all(&rows).await
            }
            None => self.store.append(&record).await,
        };

        match written {
            Ok(()) => {
                if let Err(err) = installed.finish().await {
                    warn!(bucket = %self.bucket, key, "could not discard replaced blob: {}", err);
                }
                debug!(bucket = %self.bucket, key, size = record.size, "object recorded");
                Ok(record)
            }
            Err(err) => {
                if let Err(rollback) = installed.rollback().await {
                    error!(
                        bucket = %self.bucket,
                        key,
                        "catalog write failed and blob rollback failed: {}",
                        rollback
                    );
                }
                Err(err.into())
            }
        }
    }

    /// Drop `key`'s row, then its blob.
    ///
    /// A blob that cannot be removed is left behind unreferenced; it is
    /// invisible to clients and overwritten by the next put of that key.
    pub async fn delete(&self, key: &str) -> StorageResult<ObjectRecord> {
        let mut rows = self.list().await?;
        let Some(pos) = rows.iter().position(|row| row.key == key) else {
            return Err(self.not_found(key));
        };
        let removed = rows.remove(pos);
        self.store.rewrite_all(&rows).await?;

        if let Err(err) = self.blobs.remove(&self.bucket, key).await {
            warn!(bucket = %self.bucket, key, "row removed but blob remains: {}", err);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn setup(root: &Path) -> ObjectCatalogs {
        std::fs::create_dir_all(root.join("bkt")).unwrap();
        ObjectCatalogs::new(
            BlobStore::new(root),
            LockTable::new(Duration::from_millis(200)),
        )
    }

    async fn stage(blobs: &BlobStore, data: &'static [u8]) -> StagedBlob {
        blobs
            .stage("bkt", stream::iter(vec![Ok(Bytes::from_static(data))]))
            .await
            .unwrap()
    }

    #[test]
    fn accepts_valid_keys() {
        for key in ["x.txt", "a", "report-2024.final.pdf", "0.1.2", "a--b"] {
            assert_eq!(validate_key(key), Ok(()), "{key}");
        }
    }

    #[test]
    fn rejects_invalid_keys() {
        let too_long = "a".repeat(256);
        for key in [
            "",
            "X.txt",
            ".hidden",
            "trailing.",
            "a..b",
            "-a",
            "a-.b",
            "dir/file",
            "with_underscore",
            "objects.csv",
            too_long.as_str(),
        ] {
            assert!(validate_key(key).is_err(), "{key:?}");
        }
    }

    #[tokio::test]
    async fn put_then_open_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let catalogs = setup(dir.path());
        let blobs = BlobStore::new(dir.path());

        let catalog = catalogs.lock("bkt").await.unwrap();
        let record = catalog
            .put("x.txt", stage(&blobs, b"hello").await)
            .await
            .unwrap();
        assert_eq!(record.size, 5);
        assert_eq!(record.content_type, "text/plain; charset=utf-8");

        let (found, mut file) = catalog.open("x.txt").await.unwrap();
        assert_eq!(found, record);
        let mut body = Vec::new();
        file.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn overwrite_keeps_a_single_row() {
        let dir = tempfile::tempdir().unwrap();
        let catalogs = setup(dir.path());
        let blobs = BlobStore::new(dir.path());
        let catalog = catalogs.lock("bkt").await.unwrap();

        catalog.put("a", stage(&blobs, b"one").await).await.unwrap();
        catalog.put("b", stage(&blobs, b"two").await).await.unwrap();
        catalog
            .put("a", stage(&blobs, b"three").await)
            .await
            .unwrap();

        let rows = catalog.list().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, "a");
        assert_eq!(rows[0].size, 5);
        assert_eq!(std::fs::read(dir.path().join("bkt/a")).unwrap(), b"three");
    }

    #[tokio::test]
    async fn delete_removes_row_and_blob() {
        let dir = tempfile::tempdir().unwrap();
        let catalogs = setup(dir.path());
        let blobs = BlobStore::new(dir.path());
        let catalog = catalogs.lock("bkt").await.unwrap();
        catalog.put("a", stage(&blobs, b"one").await).await.unwrap();

        let removed = catalog.delete("a").await.unwrap();

        assert_eq!(removed.key, "a");
        assert_eq!(catalog.count().await.unwrap(), 0);
        assert!(!dir.path().join("bkt/a").exists());
        assert!(matches!(
            catalog.delete("a").await,
            Err(StorageError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn missing_catalog_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let catalogs = setup(dir.path());
        let catalog = catalogs.lock("bkt").await.unwrap();

        assert_eq!(catalog.count().await.unwrap(), 0);
        assert!(matches!(
            catalog.get("nope").await,
            Err(StorageError::ObjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn size_mismatch_is_not_served() {
        let dir = tempfile::tempdir().unwrap();
        let catalogs = setup(dir.path());
        let blobs = BlobStore::new(dir.path());
        let catalog = catalogs.lock("bkt").await.unwrap();
        catalog.put("a", stage(&blobs, b"one").await).await.unwrap();

        std::fs::write(dir.path().join("bkt/a"), b"tampered").unwrap();

        assert!(matches!(catalog.open("a").await, Err(StorageError::Io(_))));
    }

    #[tokio::test]
    async fn unreadable_catalog_aborts_before_blob_moves() {
        let dir = tempfile::tempdir().unwrap();
        let catalogs = setup(dir.path());
        let blobs = BlobStore::new(dir.path());
        let catalog = catalogs.lock("bkt").await.unwrap();
        catalog.put("a", stage(&blobs, b"one").await).await.unwrap();

        let catalog_file = dir.path().join("bkt").join(OBJECT_CATALOG_FILE);
        let saved = std::fs::read(&catalog_file).unwrap();
        std::fs::remove_file(&catalog_file).unwrap();
        std::fs::create_dir(&catalog_file).unwrap();

        let staged = stage(&blobs, b"replacement").await;
        assert!(catalog.put("a", staged).await.is_err());
        assert_eq!(std::fs::read(dir.path().join("bkt/a")).unwrap(), b"one");
        let scratch = std::fs::read_dir(dir.path().join("bkt"))
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with('.'))
            .count();
        assert_eq!(scratch, 0);

        std::fs::remove_dir(&catalog_file).unwrap();
        std::fs::write(&catalog_file, saved).unwrap();
        assert_eq!(catalog.get("a").await.unwrap().size, 3);
    }

    // The catalog becomes a dangling symlink: reads see no file, but creating
    // it fails, so the write breaks only after the blob is in place.
    #[cfg(unix)]
    #[tokio::test]
    async fn failed_catalog_write_rolls_blob_back() {
        let dir = tempfile::tempdir().unwrap();
        let catalogs = setup(dir.path());
        let blobs = BlobStore::new(dir.path());
        let catalog = catalogs.lock("bkt").await.unwrap();
        catalog.put("a", stage(&blobs, b"one").await).await.unwrap();

        let catalog_file = dir.path().join("bkt").join(OBJECT_CATALOG_FILE);
        std::fs::remove_file(&catalog_file).unwrap();
        let nowhere = dir.path().join("nowhere").join(OBJECT_CATALOG_FILE);
        std::os::unix::fs::symlink(&nowhere, &catalog_file).unwrap();

        let err = catalog
            .put("a", stage(&blobs, b"replacement").await)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Catalog(_)), "{err:?}");
        assert_eq!(std::fs::read(dir.path().join("bkt/a")).unwrap(), b"one");

        assert!(catalog.put("b", stage(&blobs, b"new").await).await.is_err());
        assert!(!dir.path().join("bkt/b").exists());

        let mut names: Vec<_> = std::fs::read_dir(dir.path().join("bkt"))
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), OBJECT_CATALOG_FILE.to_string()]);
    }

    #[tokio::test]
    async fn lock_is_exclusive_per_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let catalogs = setup(dir.path());

        let held = catalogs.lock("bkt").await.unwrap();
        assert!(catalogs.lock("bkt").await.is_err());
        assert!(catalogs.lock("other").await.is_ok());
        drop(held);
        assert!(catalogs.lock("bkt").await.is_ok());
    }
}
