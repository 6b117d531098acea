//! Reserved garbage-collection label names.
//!
//! Labels under the `containerd.io/gc.` prefix carry meaning for the
//! collector:
//!
//! - `containerd.io/gc.root` - any value pins the labeled object as a root
//! - `containerd.io/gc.expire` - RFC3339 timestamp after which a lease stops
//!   being a root
//! - `containerd.io/gc.flat` - RFC3339 timestamp; while set, a lease marks
//!   its referenced resources without recursing through them
//! - `containerd.io/gc.ref.<kind>` or `containerd.io/gc.ref.<kind>.<suffix>` -
//!   an outgoing reference to `(kind, value)`; numeric suffixes index child
//!   slots (e.g. layer positions)

use std::collections::BTreeMap;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Pins the labeled object as a garbage-collection root.
pub const GC_ROOT: &str = "containerd.io/gc.root";

/// RFC3339 expiration for a lease.
pub const GC_EXPIRE: &str = "containerd.io/gc.expire";

/// Marks a lease's references as flat (mark, don't recurse).
pub const GC_FLAT: &str = "containerd.io/gc.flat";

/// Prefix for outgoing reference labels; the remainder names the kind.
pub const GC_REF_PREFIX: &str = "containerd.io/gc.ref.";

/// Reference label for content blobs.
pub const GC_REF_CONTENT: &str = "containerd.io/gc.ref.content";

/// Reference label kind for snapshots; the snapshotter name follows after a
/// `.` separator.
pub const GC_REF_SNAPSHOT_KIND: &str = "snapshot";

/// Maximum combined key+value size for a single label pair.
const MAX_LABEL_PAIR_SIZE: usize = 4096;

/// Validate a label map.
///
/// Rejects empty keys and pairs whose combined size exceeds the limit; the
/// limit keeps individual metadata records small enough to enumerate cheaply
/// during collection.
pub fn validate(labels: &BTreeMap<String, String>) -> crate::Result<()> {
    for (key, value) in labels {
        if key.is_empty() {
            return Err(crate::Error::InvalidLabel("empty label key".to_string()));
        }
        if key.len() + value.len() > MAX_LABEL_PAIR_SIZE {
            return Err(crate::Error::InvalidLabel(format!(
                "label {key} exceeds {MAX_LABEL_PAIR_SIZE} bytes"
            )));
        }
    }
    Ok(())
}

/// Parse an RFC3339 label value into a timestamp.
pub fn parse_timestamp(value: &str) -> crate::Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339)
        .map_err(|e| crate::Error::InvalidTimestamp(format!("{value}: {e}")))
}

/// Format a timestamp for storage in a label value.
pub fn format_timestamp(t: OffsetDateTime) -> crate::Result<String> {
    t.format(&Rfc3339)
        .map_err(|e| crate::Error::InvalidTimestamp(e.to_string()))
}
