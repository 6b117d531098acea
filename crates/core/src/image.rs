//! Image metadata model.

use crate::descriptor::Descriptor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// A named image pointing at a target descriptor.
///
/// Names are unique within a namespace. The target digest references a
/// content blob; labels under the reserved garbage-collection prefix declare
/// additional outgoing references.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Image name, e.g. `docker.io/library/nginx:latest`.
    pub name: String,
    /// Descriptor of the image's root content (usually a manifest or index).
    pub target: Descriptor,
    /// User and tooling labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// When the image record was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the image record was last updated.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Image {
    /// Create an image record; timestamps are stamped by the store on create.
    pub fn new(name: impl Into<String>, target: Descriptor) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            name: name.into(),
            target,
            labels: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a label, returning self for chaining.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}
