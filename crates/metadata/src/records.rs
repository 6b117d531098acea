//! Serialized table records.

use crate::error::MetadataResult;
use larder_core::descriptor::Descriptor;
use larder_core::digest::Digest;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Image record; the name is the table key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub target: Descriptor,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Committed blob record; the digest is the table key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobRecord {
    pub size: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Ingest record; the ref is the table key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<Digest>,
    pub total: u64,
    /// Past this instant the ingest is only kept alive by a live lease.
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Lease record; the id is the table key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRecord {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Encode a record for storage.
pub fn encode<T: Serialize>(record: &T) -> MetadataResult<Vec<u8>> {
    Ok(serde_json::to_vec(record)?)
}

/// Decode a record from storage.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> MetadataResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}
