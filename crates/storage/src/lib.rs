//! Content-addressed blob storage for the larder image store.
//!
//! This crate provides:
//! - Committed blobs under `blobs/<algorithm>/<hex>`, written atomically
//! - Resumable ingests under `ingests/<id>/` with sidecar state files
//! - Positional readers over committed blobs
//! - A walk over committed payloads, used for orphan cleanup

pub mod error;
pub mod store;
pub mod writer;

pub use error::{StorageError, StorageResult};
pub use store::{BlobReader, BlobStore, WriterOptions};
pub use writer::BlobWriter;
