//! Represents an object (file) stored in a bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of a bucket's `objects.csv`.
///
/// The struct stores metadata only; the payload lives in a blob file named
/// after `key` next to the catalog.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Object key, unique within its bucket.
    pub key: String,

    /// Size in bytes of the stored blob.
    pub size: u64,

    /// Media type sniffed from the leading bytes at write time.
    pub content_type: String,

    /// Timestamp of the last create/overwrite of this key.
    pub modified_at: DateTime<Utc>,
}
