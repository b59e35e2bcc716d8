//! src/services/storage_service.rs
//!
//! StorageService — core S3-like operations backed by flat-file catalogs for
//! metadata and local disk for object payloads. It sequences the cross-catalog
//! side effects: an object create or delete updates its bucket's object
//! catalog, then the owning bucket row (emptiness flag and timestamp).
//!
//! Lock order is always object catalog first, bucket catalog second.

use crate::{
    blob_store::{self, BlobStore},
    catalog::{
        self,
        bucket::{self, BucketCatalog},
        lock::LockTable,
        object::{self, ObjectCatalogs},
    },
    errors::{StorageError, StorageResult},
    models::{bucket::BucketRecord, object::ObjectRecord},
};
use bytes::Bytes;
use futures::{Stream, stream};
use std::{
    fmt,
    future::Future,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::fs::{self, File};
use tracing::{debug, error, info, warn};

pub const MAX_LIST_KEYS: usize = 1000;

#[derive(Clone, Debug, Default)]
pub struct ListObjectsParams {
    pub prefix: Option<String>,
    /// Return keys strictly after this one. A continuation token, already
    /// decoded by the caller, takes precedence over `start_after`.
    pub continuation_token: Option<String>,
    pub start_after: Option<String>,
    pub max_keys: usize,
}

#[derive(Debug)]
pub struct ListObjectsResult {
    pub objects: Vec<ObjectRecord>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

/// A disagreement between the catalogs and the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyIssue {
    /// A bucket row whose directory is gone.
    MissingDirectory { bucket: String },
    /// A bucket directory with no row; `CreateBucket` on it adopts it.
    UntrackedDirectory { name: String },
    /// The emptiness flag does not match the object catalog.
    EmptinessMismatch {
        bucket: String,
        flagged_empty: bool,
        rows: usize,
    },
    /// An object row whose payload file is gone.
    MissingBlob { bucket: String, key: String },
    /// An object row whose payload has a different size on disk.
    SizeMismatch {
        bucket: String,
        key: String,
        recorded: u64,
        on_disk: u64,
    },
    /// A backup or catalog temporary left behind by an interrupted write.
    LeftoverScratch { bucket: String, name: String },
}

impl fmt::Display for ConsistencyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyIssue::MissingDirectory { bucket } => {
                write!(f, "bucket `{bucket}` has no directory")
            }
            ConsistencyIssue::UntrackedDirectory { name } => {
                write!(f, "directory `{name}` has no bucket row")
            }
            ConsistencyIssue::EmptinessMismatch {
                bucket,
                flagged_empty,
                rows,
            } => write!(
                f,
                "bucket `{bucket}` flagged empty={flagged_empty} but holds {rows} object rows"
            ),
            ConsistencyIssue::MissingBlob { bucket, key } => {
                write!(f, "object `{key}` in bucket `{bucket}` has no payload")
            }
            ConsistencyIssue::SizeMismatch {
                bucket,
                key,
                recorded,
                on_disk,
            } => write!(
                f,
                "object `{key}` in bucket `{bucket}` is {on_disk} bytes on disk but {recorded} in the catalog"
            ),
            ConsistencyIssue::LeftoverScratch { bucket, name } => {
                write!(f, "bucket `{bucket}` holds leftover scratch file `{name}`")
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct ConsistencyReport {
    pub buckets_checked: usize,
    pub issues: Vec<ConsistencyIssue>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }
}

/// StorageService provides basic S3-like operations:
/// - Create / list / delete buckets
/// - Upload an object (spools bytes to disk, then records it in the bucket's
///   object catalog and marks the bucket non-empty)
/// - Get object (reads the catalog row and opens the payload)
/// - Delete object (removes row and payload, recomputes bucket emptiness)
///
/// There is no in-memory cache; every call re-reads the catalogs.
#[derive(Clone, Debug)]
pub struct StorageService {
    buckets: BucketCatalog,
    objects: ObjectCatalogs,
    blobs: BlobStore,
}

impl StorageService {
    /// Open (or initialise) a store rooted at `base_path`.
    ///
    /// `lock_timeout` bounds how long any operation waits for a catalog lock
    /// before failing with `Busy`.
    pub async fn open(base_path: impl Into<PathBuf>, lock_timeout: Duration) -> StorageResult<Self> {
        let base_path = base_path.into();
        let locks = LockTable::new(lock_timeout);
        let blobs = BlobStore::new(&base_path);
        let service = Self {
            buckets: BucketCatalog::new(&base_path, &locks),
            objects: ObjectCatalogs::new(blobs.clone(), locks),
            blobs,
        };
        service.buckets.init().await?;
        info!("storage opened at {}", base_path.display());
        Ok(service)
    }

    /// Base directory on disk where catalogs and payloads are stored.
    pub fn base_path(&self) -> &Path {
        self.buckets.root()
    }

    // --- Buckets ---

    pub async fn create_bucket(&self, name: &str) -> StorageResult<BucketRecord> {
        bucket::ensure_name(name)?;
        let buckets = self.buckets.clone();
        let name = name.to_string();
        detached(async move { buckets.create(&name).await }).await
    }

    pub async fn list_buckets(&self) -> StorageResult<Vec<BucketRecord>> {
        self.buckets.list().await
    }

    pub async fn bucket(&self, name: &str) -> StorageResult<BucketRecord> {
        self.buckets.get(name).await
    }

    /// Delete a bucket whose object catalog holds no rows.
    ///
    /// Holds the bucket's object catalog lock throughout so that no object
    /// put can land between the emptiness check and the removal. The row
    /// count decides; an emptiness flag that disagrees with it is corrected
    /// first, and nothing is deleted recursively on the strength of a flag.
    pub async fn delete_bucket(&self, name: &str) -> StorageResult<()> {
        bucket::ensure_name(name)?;
        let this = self.clone();
        let name = name.to_string();
        detached(async move {
            let objects = this.objects.lock(&name).await?;
            let record = this.buckets.get(&name).await?;
            let rows = objects.count().await?;
            if record.is_empty != (rows == 0) {
                warn!(
                    bucket = %name,
                    rows,
                    flagged_empty = record.is_empty,
                    "emptiness flag disagrees with object catalog; correcting flag"
                );
                this.buckets.touch(&name, rows == 0).await?;
            }
            if rows > 0 {
                return Err(StorageError::BucketNotEmpty(name));
            }
            this.buckets.delete(&name).await
        })
        .await
    }

    // --- Objects ---

    /// Stream-upload an object and record it.
    ///
    /// - Rejects bad names before reading the body.
    /// - Spools the body to a scratch file; an abandoned upload leaves no
    ///   trace.
    /// - Runs the commit (install blob, upsert row, flag bucket non-empty) in
    ///   a separate task so a client disconnect cannot interrupt it halfway.
    pub async fn put_object_stream<S>(
        &self,
        bucket: &str,
        key: &str,
        body: S,
    ) -> StorageResult<ObjectRecord>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        bucket::ensure_name(bucket)?;
        object::ensure_key(key)?;
        self.buckets.get(bucket).await?;

        let staged = self.blobs.stage(bucket, body).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::BucketNotFound(bucket.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;

        let this = self.clone();
        let bucket = bucket.to_string();
        let key = key.to_string();
        detached(async move {
            let objects = this.objects.lock(&bucket).await?;
            this.buckets.get(&bucket).await?;
            let record = objects.put(&key, staged).await?;
            if let Err(err) = this.buckets.touch(&bucket, false).await {
                error!(bucket = %bucket, key = %key, "object stored but bucket row not updated: {}", err);
                return Err(err);
            }
            info!(bucket = %bucket, key = %key, size = record.size, "object stored");
            Ok(record)
        })
        .await
    }

    /// Upload an in-memory payload.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
    ) -> StorageResult<ObjectRecord> {
        self.put_object_stream(bucket, key, stream::once(async move { Ok(data) }))
            .await
    }

    /// Fetch an object for reading.
    ///
    /// Returns metadata and an opened File handle ready for streaming out.
    pub async fn get_object_reader(
        &self,
        bucket: &str,
        key: &str,
    ) -> StorageResult<(ObjectRecord, File)> {
        bucket::ensure_name(bucket)?;
        object::ensure_key(key)?;
        let objects = self.objects.lock(bucket).await?;
        self.buckets.get(bucket).await?;
        objects.open(key).await
    }

    /// Fetch only object metadata.
    pub async fn get_object_metadata(&self, bucket: &str, key: &str) -> StorageResult<ObjectRecord> {
        bucket::ensure_name(bucket)?;
        object::ensure_key(key)?;
        let objects = self.objects.lock(bucket).await?;
        self.buckets.get(bucket).await?;
        objects.get(key).await
    }

    /// List a bucket's objects in key order.
    ///
    /// Supports prefix filtering, `start_after`/continuation and `max_keys`
    /// (clamped to 1..=1000).
    pub async fn list_objects(
        &self,
        bucket: &str,
        params: ListObjectsParams,
    ) -> StorageResult<ListObjectsResult> {
        bucket::ensure_name(bucket)?;
        let rows = {
            let objects = self.objects.lock(bucket).await?;
            self.buckets.get(bucket).await?;
            objects.list().await?
        };
        Ok(page_objects(rows, &params))
    }

    /// Delete an object and recompute its bucket's emptiness.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectRecord> {
        bucket::ensure_name(bucket)?;
        object::ensure_key(key)?;
        let this = self.clone();
        let bucket = bucket.to_string();
        let key = key.to_string();
        detached(async move {
            let objects = this.objects.lock(&bucket).await?;
            this.buckets.get(&bucket).await?;
            let removed = objects.delete(&key).await?;
            let remaining = objects.count().await?;
            this.buckets.touch(&bucket, remaining == 0).await?;
            info!(bucket = %bucket, key = %key, remaining, "object deleted");
            Ok(removed)
        })
        .await
    }

    // --- Maintenance ---

    /// Compare the bucket catalog against bucket directories, object
    /// catalogs and payload files. Read-only; repairs happen through
    /// `create_bucket` and `delete_bucket`.
    pub async fn check_consistency(&self) -> StorageResult<ConsistencyReport> {
        let rows = self.buckets.list().await?;
        let mut report = ConsistencyReport {
            buckets_checked: rows.len(),
            issues: Vec::new(),
        };

        for row in &rows {
            let dir = self.buckets.bucket_dir(&row.name);
            if !fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
                report.issues.push(ConsistencyIssue::MissingDirectory {
                    bucket: row.name.clone(),
                });
                continue;
            }
            let objects = self.objects.lock(&row.name).await?;
            let records = objects.list().await?;
            // Re-read the flag under the object lock; the listing above may
            // predate a concurrent put.
            let flagged_empty = match self.buckets.get(&row.name).await {
                Ok(current) => current.is_empty,
                Err(StorageError::BucketNotFound(_)) => continue,
                Err(err) => return Err(err),
            };
            if flagged_empty != records.is_empty() {
                report.issues.push(ConsistencyIssue::EmptinessMismatch {
                    bucket: row.name.clone(),
                    flagged_empty,
                    rows: records.len(),
                });
            }
            self.check_payloads(&row.name, &records, &mut report.issues)
                .await?;
            self.check_scratch(&row.name, &mut report.issues).await?;
        }

        let mut entries = fs::read_dir(self.base_path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if catalog::is_scratch_name(&name) || !entry.file_type().await?.is_dir() {
                continue;
            }
            if bucket::validate_name(&name).is_ok() && !rows.iter().any(|row| row.name == name) {
                report.issues.push(ConsistencyIssue::UntrackedDirectory { name });
            }
        }

        for issue in &report.issues {
            warn!("consistency: {}", issue);
        }
        debug!(
            "consistency check covered {} buckets, {} issues",
            report.buckets_checked,
            report.issues.len()
        );
        Ok(report)
    }

    /// Every row must have a payload of the recorded size. Caller holds the
    /// bucket's object catalog lock.
    async fn check_payloads(
        &self,
        bucket: &str,
        records: &[ObjectRecord],
        issues: &mut Vec<ConsistencyIssue>,
    ) -> StorageResult<()> {
        for record in records {
            match fs::metadata(self.blobs.blob_path(bucket, &record.key)).await {
                Ok(meta) if meta.len() == record.size => {}
                Ok(meta) => issues.push(ConsistencyIssue::SizeMismatch {
                    bucket: bucket.to_string(),
                    key: record.key.clone(),
                    recorded: record.size,
                    on_disk: meta.len(),
                }),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    issues.push(ConsistencyIssue::MissingBlob {
                        bucket: bucket.to_string(),
                        key: record.key.clone(),
                    })
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Backups and catalog temporaries only exist while the object catalog
    /// lock is held, so any seen under that lock were abandoned. Upload
    /// spools are skipped: they are written before the lock is taken.
    async fn check_scratch(
        &self,
        bucket: &str,
        issues: &mut Vec<ConsistencyIssue>,
    ) -> StorageResult<()> {
        let mut entries = fs::read_dir(self.blobs.bucket_dir(bucket)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if catalog::is_scratch_name(&name) && !blob_store::is_upload_spool(&name) {
                issues.push(ConsistencyIssue::LeftoverScratch {
                    bucket: bucket.to_string(),
                    name,
                });
            }
        }
        Ok(())
    }
}

/// Run a mutation to completion even if the caller stops polling.
async fn detached<F, T>(fut: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(fut)
        .await
        .map_err(|err| StorageError::Task(err.to_string()))?
}

fn page_objects(mut rows: Vec<ObjectRecord>, params: &ListObjectsParams) -> ListObjectsResult {
    let max_keys = params.max_keys.clamp(1, MAX_LIST_KEYS);
    rows.sort_by(|a, b| a.key.cmp(&b.key));

    let after = params
        .continuation_token
        .as_deref()
        .or(params.start_after.as_deref());
    let mut matching = rows.into_iter().filter(|row| {
        params
            .prefix
            .as_deref()
            .is_none_or(|prefix| row.key.starts_with(prefix))
            && after.is_none_or(|after| row.key.as_str() > after)
    });

    let objects: Vec<ObjectRecord> = matching.by_ref().take(max_keys).collect();
    let is_truncated = matching.next().is_some();
    let next_continuation_token = if is_truncated {
        objects.last().map(|row| row.key.clone())
    } else {
        None
    };

    ListObjectsResult {
        objects,
        is_truncated,
        next_continuation_token,
    }
}
