//! redb table definitions for the metadata schema.
//!
//! Every object table is keyed by `(namespace, key…)` tuples with
//! JSON-serialized records as values. Lease resource edges are set
//! membership keys with unit values. The `meta` table holds schema
//! bookkeeping: the database version and the persisted dirty-content flag.

use redb::TableDefinition;

/// Current schema version; a mismatch on open is fatal.
pub const DB_VERSION: u64 = 1;

/// Key in [`META`] holding the schema version.
pub const META_VERSION: &str = "version";

/// Key in [`META`] set to 1 while committed content metadata has been
/// deleted but the blob filesystem has not been swept.
pub const META_DIRTY_CONTENT: &str = "dirty-content";

/// Schema bookkeeping: version, dirty flags.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Namespaces that have ever held an object, keyed by name.
pub const NAMESPACES: TableDefinition<&str, ()> = TableDefinition::new("namespaces");

/// Image records keyed by `(namespace, name)`.
pub const IMAGES: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("images");

/// Committed blob records keyed by `(namespace, digest)`.
pub const CONTENT_BLOBS: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("content-blobs");

/// In-progress ingest records keyed by `(namespace, ref)`.
pub const CONTENT_INGESTS: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("content-ingests");

/// Lease records keyed by `(namespace, id)`.
pub const LEASES: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("leases");

/// Lease resource edges keyed by `(namespace, lease, kind, key)`.
pub const LEASE_RESOURCES: TableDefinition<(&str, &str, &str, &str), ()> =
    TableDefinition::new("lease-resources");
