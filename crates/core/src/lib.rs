//! Core domain types and shared logic for the larder image store.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Content digests and incremental digesters
//! - OCI descriptors and platforms
//! - Images, leases, and content blob metadata
//! - Reserved garbage-collection label names
//! - Filter predicates over field-path adaptors
//! - Cancellation tokens for long-running operations

pub mod cancel;
pub mod content;
pub mod descriptor;
pub mod digest;
pub mod error;
pub mod filter;
pub mod image;
pub mod labels;
pub mod lease;

pub use cancel::CancelToken;
pub use content::{Info, Status};
pub use descriptor::{Descriptor, Platform};
pub use digest::{Digest, Digester};
pub use error::{Error, Result};
pub use filter::{Adaptor, Filter, FilterList};
pub use image::Image;
pub use lease::{Lease, Resource};
