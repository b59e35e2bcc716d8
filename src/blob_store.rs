//! src/blob_store.rs
//!
//! BlobStore — maps `(bucket, key)` to a payload file at `root/{bucket}/{key}`.
//! Uploads are spooled to a scratch file in the bucket directory first and
//! only renamed into place once complete, so a half-received body is never
//! visible under its key.

use crate::{
    catalog::scratch_path,
    sniff::{SNIFF_LEN, sniff},
};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::{AsyncWriteExt, BufWriter},
};
use tracing::{debug, error};

const UPLOAD_STEM: &str = "upload";
const BACKUP_STEM: &str = "backup";

/// Upload spools exist outside the object catalog lock while a body is still
/// arriving, so seeing one does not mean anything was abandoned.
pub(crate) fn is_upload_spool(name: &str) -> bool {
    name.strip_prefix('.')
        .and_then(|rest| rest.strip_prefix(UPLOAD_STEM))
        .is_some_and(|rest| rest.starts_with('_'))
}

#[derive(Debug, Clone)]
pub struct BlobStore {
    /// Storage root; one directory per bucket beneath it.
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    /// Payload path for an object. Does not check existence.
    pub fn blob_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.bucket_dir(bucket).join(key)
    }

    /// Stream `body` into a scratch file inside the bucket directory.
    ///
    /// Counts bytes and sniffs the content type from the leading bytes while
    /// writing. The scratch file is removed if this future is dropped or
    /// fails, and otherwise belongs to the returned [`StagedBlob`].
    pub async fn stage<S>(&self, bucket: &str, body: S) -> io::Result<StagedBlob>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let mut staged = StagedBlob {
            path: scratch_path(&self.bucket_dir(bucket), UPLOAD_STEM),
            size: 0,
            content_type: String::new(),
            committed: false,
        };
        let mut writer = BufWriter::new(File::create(&staged.path).await?);

        let mut head = Vec::with_capacity(SNIFF_LEN);
        pin_mut!(body);
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            if head.len() < SNIFF_LEN {
                let take = (SNIFF_LEN - head.len()).min(chunk.len());
                head.extend_from_slice(&chunk[..take]);
            }
            writer.write_all(&chunk).await?;
            staged.size += chunk.len() as u64;
        }
        writer.flush().await?;
        writer.get_ref().sync_all().await?;
        drop(writer);

        staged.content_type = sniff(&head);
        debug!(
            "staged {} bytes ({}) at {}",
            staged.size,
            staged.content_type,
            staged.path.display()
        );
        Ok(staged)
    }

    /// Move a staged blob to `key`, setting any previous payload aside.
    ///
    /// The returned [`InstalledBlob`] must be finished once the catalog
    /// agrees with the new payload, or rolled back if it does not.
    pub async fn install(
        &self,
        mut staged: StagedBlob,
        bucket: &str,
        key: &str,
    ) -> io::Result<InstalledBlob> {
        let target = self.blob_path(bucket, key);
        let backup_path = scratch_path(&self.bucket_dir(bucket), BACKUP_STEM);

        let backup = match fs::rename(&target, &backup_path).await {
            Ok(()) => Some(backup_path),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(err),
        };

        if let Err(err) = fs::rename(&staged.path, &target).await {
            if let Some(backup) = &backup {
                if let Err(restore) = fs::rename(backup, &target).await {
                    error!(
                        "could not install {} and could not restore previous payload from {}: {}",
                        target.display(),
                        backup.display(),
                        restore
                    );
                }
            }
            return Err(err);
        }
        staged.committed = true;

        Ok(InstalledBlob { target, backup })
    }

    pub async fn open(&self, bucket: &str, key: &str) -> io::Result<File> {
        File::open(self.blob_path(bucket, key)).await
    }

    /// Remove an object's payload. A payload that is already gone is fine.
    pub async fn remove(&self, bucket: &str, key: &str) -> io::Result<()> {
        let path = self.blob_path(bucket, key);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("removed blob {}", path.display());
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob {} already missing", path.display());
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// A fully received upload waiting to be installed under its key.
#[derive(Debug)]
pub struct StagedBlob {
    path: PathBuf,
    size: u64,
    content_type: String,
    committed: bool,
}

impl StagedBlob {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }
}

impl Drop for StagedBlob {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// A blob moved into place whose catalog update is still pending.
#[derive(Debug)]
pub struct InstalledBlob {
    target: PathBuf,
    backup: Option<PathBuf>,
}

impl InstalledBlob {
    /// Keep the new payload and discard the one it replaced.
    pub async fn finish(self) -> io::Result<()> {
        match self.backup {
            Some(backup) => fs::remove_file(backup).await,
            None => Ok(()),
        }
    }

    /// Restore the previous payload, or remove the new one if there was none.
    pub async fn rollback(self) -> io::Result<()> {
        match self.backup {
            Some(backup) => fs::rename(backup, &self.target).await,
            None => fs::remove_file(&self.target).await,
        }
    }
}
