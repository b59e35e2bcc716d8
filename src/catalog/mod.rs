//! src/catalog/mod.rs
//!
//! Flat-file metadata tables. A `CatalogStore` is a single CSV file holding
//! one serde row per line with no header. There is no in-memory cache: every
//! operation goes back to disk so that what callers observe is what a restart
//! would observe.
//!
//! Writers must hold the lock for the catalog they touch (see [`lock`]).

use csv::{ReaderBuilder, WriterBuilder};
use serde::{Serialize, de::DeserializeOwned};
use std::{
    io::{self, ErrorKind},
    marker::PhantomData,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

pub mod bucket;
pub mod lock;
pub mod object;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog `{}` does not exist", .0.display())]
    Missing(PathBuf),
    #[error("catalog `{}` is malformed: {source}", .path.display())]
    Malformed { path: PathBuf, source: csv::Error },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Build a scratch path inside `dir`.
///
/// Scratch names start with `.` and contain `_`; bucket names and object keys
/// can never contain `_`, so scratch files never alias real entries.
pub(crate) fn scratch_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!(".{}_{}", stem, Uuid::new_v4().simple()))
}

/// Whether a directory entry name was produced by [`scratch_path`].
pub(crate) fn is_scratch_name(name: &str) -> bool {
    name.starts_with('.') && name.contains('_')
}

/// A durable table of `R` rows backed by one CSV file.
#[derive(Debug)]
pub struct CatalogStore<R> {
    path: PathBuf,
    _row: PhantomData<fn() -> R>,
}

impl<R> Clone for CatalogStore<R> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            _row: PhantomData,
        }
    }
}

impl<R> CatalogStore<R>
where
    R: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _row: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every row in file order.
    ///
    /// Returns `Missing` when the file does not exist and `Malformed` when any
    /// line fails to decode.
    pub async fn read_all(&self) -> CatalogResult<Vec<R>> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(CatalogError::Missing(self.path.clone()));
            }
            Err(err) => return Err(CatalogError::Io(err)),
        };
        decode_rows(&self.path, &raw)
    }

    /// Like [`read_all`](Self::read_all) but a missing file reads as an empty
    /// table. Only for call sites that are allowed to create the catalog.
    pub async fn read_all_or_empty(&self) -> CatalogResult<Vec<R>> {
        match self.read_all().await {
            Err(CatalogError::Missing(_)) => Ok(Vec::new()),
            other => other,
        }
    }

    /// Create an empty catalog file if none exists. Existing rows are kept.
    pub async fn ensure_exists(&self) -> CatalogResult<()> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        Ok(())
    }

    /// Append one row without reading the rest of the table.
    pub async fn append(&self, row: &R) -> CatalogResult<()> {
        let line = encode_rows(std::slice::from_ref(row))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.sync_data().await?;
        debug!("appended row to {}", self.path.display());
        Ok(())
    }

    /// Replace the whole table atomically.
    pub async fn rewrite_all(&self, rows: &[R]) -> CatalogResult<()> {
        self.stage(rows).await?.commit().await
    }

    /// First half of a rewrite: write `rows` to a sibling temporary file and
    /// fsync it. The catalog itself is untouched until
    /// [`StagedRewrite::commit`].
    pub async fn stage(&self, rows: &[R]) -> CatalogResult<StagedRewrite> {
        let data = encode_rows(rows)?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let stem = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "catalog".into());
        let staged = StagedRewrite {
            tmp_path: scratch_path(dir, &format!("{stem}.tmp")),
            target: self.path.clone(),
            committed: false,
        };

        let mut file = File::create(&staged.tmp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        Ok(staged)
    }
}

/// A fully written replacement for a catalog, not yet visible to readers.
///
/// Dropping it without calling `commit` discards the temporary file and
/// leaves the previous catalog contents in place.
#[derive(Debug)]
pub struct StagedRewrite {
    tmp_path: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedRewrite {
    pub async fn commit(mut self) -> CatalogResult<()> {
        fs::rename(&self.tmp_path, &self.target).await?;
        self.committed = true;
        debug!("rewrote catalog {}", self.target.display());
        Ok(())
    }
}

impl Drop for StagedRewrite {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}

fn decode_rows<R: DeserializeOwned>(path: &Path, raw: &[u8]) -> CatalogResult<Vec<R>> {
    let mut reader = ReaderBuilder::new().has_headers(false).from_reader(raw);
    reader
        .deserialize()
        .collect::<Result<Vec<R>, _>>()
        .map_err(|source| CatalogError::Malformed {
            path: path.to_path_buf(),
            source,
        })
}

fn encode_rows<R: Serialize>(rows: &[R]) -> CatalogResult<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for row in rows {
        writer
            .serialize(row)
            .map_err(|err| io::Error::new(ErrorKind::InvalidData, err))?;
    }
    writer
        .into_inner()
        .map_err(|err| CatalogError::Io(err.into_error()))
}
