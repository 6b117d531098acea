//! Lease metadata model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// A lease pins a set of resources against garbage collection until it is
/// deleted or its expiration label passes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Lease identifier, unique within a namespace.
    pub id: String,
    /// Labels; `containerd.io/gc.expire` and `containerd.io/gc.flat` carry
    /// RFC3339 timestamps controlling root behavior.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// When the lease was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A typed reference held by a lease.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Resource {
    /// Resource kind: `content`, `ingest`, or `snapshots/<snapshotter>`.
    pub kind: String,
    /// Resource key: a digest for content, a ref for ingests, a snapshot key
    /// for snapshot kinds.
    pub key: String,
}

impl Resource {
    pub fn new(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key: key.into(),
        }
    }

    /// Shorthand for a content resource.
    pub fn content(digest: impl Into<String>) -> Self {
        Self::new("content", digest)
    }

    /// Shorthand for an ingest resource.
    pub fn ingest(reference: impl Into<String>) -> Self {
        Self::new("ingest", reference)
    }
}
