//! flatstore: a small S3-like object store whose metadata lives in CSV
//! catalogs (`buckets.csv` at the root, one `objects.csv` per bucket) next to
//! the object payloads.

pub mod blob_store;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod sniff;
