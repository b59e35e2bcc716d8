//! Represents a logical bucket — a top-level container for objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of `buckets.csv`.
///
/// The row is the source of truth for bucket existence; the directory of the
/// same name under the storage root is derived from it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BucketRecord {
    /// Unique bucket name, also the directory name.
    pub name: String,

    /// When this bucket was created. Never rewritten.
    pub created_at: DateTime<Utc>,

    /// Bumped on every object create/delete inside the bucket.
    pub modified_at: DateTime<Utc>,

    /// True iff the bucket's object catalog holds zero rows.
    pub is_empty: bool,
}

impl BucketRecord {
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            created_at: now,
            modified_at: now,
            is_empty: true,
        }
    }
}
