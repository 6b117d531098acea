//! Namespaced metadata database for the larder image store.
//!
//! This crate provides the storage core:
//! - An embedded, namespaced schema over a single-file KV engine
//! - Image and lease stores
//! - A content store adapter coupling blob payloads to metadata records
//! - A mark-and-sweep garbage collector over the labeled resource graph
//! - A collector seam for externally managed resource kinds
//!
//! The [`Database`] façade owns the KV engine, the blob store, and the
//! collector registry; the stores borrow it.

pub mod collector;
pub mod content;
pub mod db;
pub mod error;
pub mod gc;
pub mod images;
pub mod leases;
pub mod records;
pub mod tables;

pub use collector::{CollectionContext, Collector};
pub use content::{ContentStore, IngestWriter, WriterOptions};
pub use db::{Database, DbOptions, DeleteOptions};
pub use error::{MetadataError, MetadataResult};
pub use gc::{GcStats, Node, ResourceType};
pub use images::ImageStore;
pub use leases::{CreateOptions as LeaseCreateOptions, LeaseStore};
pub use tables::DB_VERSION;
