//! Content blob and ingest metadata models.

use crate::digest::Digest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Metadata for a committed content blob.
///
/// The payload bytes live in the blob store, keyed by the digest. Labels
/// under the reserved garbage-collection prefix declare outgoing references.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    pub digest: Digest,
    pub size: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Status of an in-progress ingest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// The caller-chosen ingest reference.
    pub reference: String,
    /// Bytes written so far.
    pub offset: u64,
    /// Expected total size; 0 when the opener did not declare one.
    pub total: u64,
    /// Expected digest, when declared up front.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<Digest>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
