//! Content store adapter: blob storage with metadata bookkeeping.
//!
//! Wraps the filesystem blob store with per-blob label records, ingest
//! records carrying expirations, and lease attribution. Blob payloads are
//! only readable while a metadata record exists; deleting metadata flags
//! the filesystem for sweep by the next collection.

use crate::db::{Database, ensure_namespace, set_dirty_content};
use crate::error::{MetadataError, MetadataResult};
use crate::records::{BlobRecord, IngestRecord, decode, encode};
use crate::tables::{CONTENT_BLOBS, CONTENT_INGESTS, LEASE_RESOURCES, LEASES};
use larder_core::content::{Info, Status};
use larder_core::digest::Digest;
use larder_core::filter::{Adaptor, FilterList, check_map};
use larder_core::labels::validate as validate_labels;
use larder_storage::{BlobReader, BlobWriter, StorageError};
use redb::ReadableTable;
use std::collections::BTreeMap;
use time::{Duration, OffsetDateTime};
use tracing::debug;

/// How long a fresh ingest may sit idle before the collector may reap it.
/// A live lease extends the ingest past this window.
const INGEST_EXPIRATION: Duration = Duration::hours(24);

/// Options for opening an ingest writer.
#[derive(Clone, Debug, Default)]
pub struct WriterOptions {
    /// Caller-chosen ingest reference; reopening the same ref resumes it.
    pub reference: String,
    /// Declared total size; 0 when unknown.
    pub total: u64,
    /// Expected digest; fails early when already committed.
    pub expected: Option<Digest>,
    /// Lease to attribute the ingest to; on commit the edge is redirected
    /// to the committed content.
    pub lease: Option<String>,
    /// Explicit expiration; defaults to 24 hours from open.
    pub expires_at: Option<OffsetDateTime>,
}

/// Metadata-aware content store.
pub struct ContentStore<'a> {
    db: &'a Database,
}

impl<'a> ContentStore<'a> {
    pub(crate) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Metadata for a committed blob; `NotFound` without a record.
    pub fn info(&self, namespace: &str, digest: &Digest) -> MetadataResult<Info> {
        self.db.view(|tx| {
            let blobs = tx.open_table(CONTENT_BLOBS)?;
            let Some(v) = blobs.get((namespace, digest.as_str()))? else {
                return Err(MetadataError::NotFound(format!("content {digest}")));
            };
            let record: BlobRecord = decode(v.value())?;
            Ok(materialize(digest, record))
        })
    }

    /// Update blob metadata; only labels are mutable.
    pub fn update(
        &self,
        namespace: &str,
        info: Info,
        fieldpaths: &[&str],
    ) -> MetadataResult<Info> {
        self.db.update(|tx| {
            let mut blobs = tx.open_table(CONTENT_BLOBS)?;
            let Some(v) = blobs.get((namespace, info.digest.as_str()))? else {
                return Err(MetadataError::NotFound(format!("content {}", info.digest)));
            };
            let mut record: BlobRecord = decode(v.value())?;
            drop(v);

            if fieldpaths.is_empty() {
                record.labels = info.labels.clone();
            } else {
                for path in fieldpaths {
                    if *path == "labels" {
                        record.labels = info.labels.clone();
                    } else if let Some(key) = path.strip_prefix("labels.") {
                        match info.labels.get(key) {
                            Some(value) => {
                                record.labels.insert(key.to_string(), value.clone());
                            }
                            None => {
                                record.labels.remove(key);
                            }
                        }
                    } else {
                        return Err(MetadataError::InvalidArgument(format!(
                            "cannot update immutable field {path}"
                        )));
                    }
                }
            }
            validate_labels(&record.labels)?;

            record.updated_at = OffsetDateTime::now_utc();
            blobs.insert((namespace, info.digest.as_str()), encode(&record)?.as_slice())?;
            Ok(materialize(&info.digest, record))
        })
    }

    /// Visit every committed blob's metadata matching `filters`.
    pub fn walk(
        &self,
        namespace: &str,
        filters: &[&str],
        mut f: impl FnMut(Info) -> MetadataResult<()>,
    ) -> MetadataResult<()> {
        let filters = FilterList::parse(filters)?;
        self.db.view(|tx| {
            let blobs = tx.open_table(CONTENT_BLOBS)?;
            for entry in blobs.range((namespace, "")..)? {
                let (k, v) = entry?;
                let (ns, raw) = k.value();
                if ns != namespace {
                    break;
                }
                let digest = Digest::parse(raw)?;
                let record: BlobRecord = decode(v.value())?;
                let info = materialize(&digest, record);
                if filters.matches(&InfoAdaptor(&info)) {
                    f(info)?;
                }
            }
            Ok(())
        })
    }

    /// Remove blob metadata only; the payload is swept by the next
    /// collection.
    pub fn delete(&self, namespace: &str, digest: &Digest) -> MetadataResult<()> {
        self.db.update(|tx| {
            let mut blobs = tx.open_table(CONTENT_BLOBS)?;
            if blobs.remove((namespace, digest.as_str()))?.is_none() {
                return Err(MetadataError::NotFound(format!("content {digest}")));
            }
            drop(blobs);
            set_dirty_content(tx, true)
        })?;
        self.db.mark_dirty();
        Ok(())
    }

    /// Positional reader over a committed blob; requires a metadata record.
    pub fn reader_at(&self, namespace: &str, digest: &Digest) -> MetadataResult<BlobReader> {
        self.info(namespace, digest)?;
        Ok(self.db.blob_store().reader_at(digest)?)
    }

    /// Open or resume the ingest named by `options.reference`.
    pub fn writer(&self, namespace: &str, options: WriterOptions) -> MetadataResult<IngestWriter<'a>> {
        if options.reference.is_empty() {
            return Err(MetadataError::InvalidArgument(
                "ingest reference is empty".to_string(),
            ));
        }
        if let Some(expected) = &options.expected {
            let committed = self.db.view(|tx| {
                let blobs = tx.open_table(CONTENT_BLOBS)?;
                Ok(blobs.get((namespace, expected.as_str()))?.is_some())
            })?;
            if committed {
                return Err(MetadataError::AlreadyExists(format!("content {expected}")));
            }
        }

        let now = OffsetDateTime::now_utc();
        let fresh = self.db.update(|tx| {
            ensure_namespace(tx, namespace)?;

            if let Some(lease) = &options.lease {
                let leases = tx.open_table(LEASES)?;
                if leases.get((namespace, lease.as_str()))?.is_none() {
                    return Err(MetadataError::NotFound(format!("lease {lease}")));
                }
                drop(leases);
                let mut resources = tx.open_table(LEASE_RESOURCES)?;
                resources.insert(
                    (namespace, lease.as_str(), "ingest", options.reference.as_str()),
                    (),
                )?;
            }

            let mut ingests = tx.open_table(CONTENT_INGESTS)?;
            let fresh = ingests
                .get((namespace, options.reference.as_str()))?
                .is_none();
            if fresh {
                let record = IngestRecord {
                    expected: options.expected.clone(),
                    total: options.total,
                    expires_at: Some(options.expires_at.unwrap_or(now + INGEST_EXPIRATION)),
                    started_at: now,
                    updated_at: now,
                };
                ingests.insert(
                    (namespace, options.reference.as_str()),
                    encode(&record)?.as_slice(),
                )?;
            }
            Ok(fresh)
        })?;

        let mut inner = self.db.blob_store().writer(larder_storage::WriterOptions {
            reference: scoped_ref(namespace, &options.reference),
            total: options.total,
            expected: options.expected,
        })?;

        // A fresh record over leftover payload means the previous ingest
        // was reaped; start from a clean slate.
        if fresh && inner.offset() > 0 {
            debug!(reference = %options.reference, "truncating stale ingest data");
            inner.truncate(0)?;
        }

        Ok(IngestWriter {
            db: self.db,
            namespace: namespace.to_string(),
            reference: options.reference,
            inner,
        })
    }

    /// Status of one ingest; `NotFound` without a record.
    pub fn status(&self, namespace: &str, reference: &str) -> MetadataResult<Status> {
        let record = self.ingest_record(namespace, reference)?;
        self.build_status(namespace, reference, record)
    }

    /// Statuses of all ingests matching `filters`.
    pub fn list_statuses(&self, namespace: &str, filters: &[&str]) -> MetadataResult<Vec<Status>> {
        let filters = FilterList::parse(filters)?;
        let records: Vec<(String, IngestRecord)> = self.db.view(|tx| {
            let ingests = tx.open_table(CONTENT_INGESTS)?;
            let mut out = Vec::new();
            for entry in ingests.range((namespace, "")..)? {
                let (k, v) = entry?;
                let (ns, reference) = k.value();
                if ns != namespace {
                    break;
                }
                out.push((reference.to_string(), decode(v.value())?));
            }
            Ok(out)
        })?;

        let mut statuses = Vec::new();
        for (reference, record) in records {
            let status = self.build_status(namespace, &reference, record)?;
            if filters.matches(&StatusAdaptor(&status)) {
                statuses.push(status);
            }
        }
        Ok(statuses)
    }

    /// Drop an ingest: its metadata record and any partial payload.
    pub fn abort(&self, namespace: &str, reference: &str) -> MetadataResult<()> {
        self.db.update(|tx| {
            let mut ingests = tx.open_table(CONTENT_INGESTS)?;
            if ingests.remove((namespace, reference))?.is_none() {
                return Err(MetadataError::NotFound(format!("ingest {reference}")));
            }
            Ok(())
        })?;
        match self.db.blob_store().abort(&scoped_ref(namespace, reference)) {
            // The payload may never have been opened, or a crashed commit
            // already took it; the record was the source of truth.
            Err(StorageError::NotFound(_)) => Ok(()),
            other => Ok(other?),
        }
    }

    fn ingest_record(&self, namespace: &str, reference: &str) -> MetadataResult<IngestRecord> {
        self.db.view(|tx| {
            let ingests = tx.open_table(CONTENT_INGESTS)?;
            let Some(v) = ingests.get((namespace, reference))? else {
                return Err(MetadataError::NotFound(format!("ingest {reference}")));
            };
            decode(v.value())
        })
    }

    fn build_status(
        &self,
        namespace: &str,
        reference: &str,
        record: IngestRecord,
    ) -> MetadataResult<Status> {
        match self.db.blob_store().status(&scoped_ref(namespace, reference)) {
            Ok(fs) => Ok(Status {
                reference: reference.to_string(),
                offset: fs.offset,
                total: record.total,
                expected: record.expected,
                started_at: record.started_at,
                updated_at: fs.updated_at,
            }),
            // No bytes written yet (or reaped out from under us).
            Err(StorageError::NotFound(_)) => Ok(Status {
                reference: reference.to_string(),
                offset: 0,
                total: record.total,
                expected: record.expected,
                started_at: record.started_at,
                updated_at: record.updated_at,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

/// A writer for one in-progress ingest, coupling the blob-store writer to
/// the metadata record.
pub struct IngestWriter<'a> {
    db: &'a Database,
    namespace: String,
    reference: String,
    inner: BlobWriter,
}

impl std::fmt::Debug for IngestWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestWriter")
            .field("namespace", &self.namespace)
            .field("reference", &self.reference)
            .field("inner", &self.inner)
            .finish()
    }
}

impl IngestWriter<'_> {
    /// Append data to the ingest.
    pub fn write(&mut self, data: &[u8]) -> MetadataResult<()> {
        Ok(self.inner.write(data)?)
    }

    /// Discard written data and restart from the beginning.
    pub fn truncate(&mut self, size: u64) -> MetadataResult<()> {
        Ok(self.inner.truncate(size)?)
    }

    /// Bytes written so far.
    pub fn offset(&self) -> u64 {
        self.inner.offset()
    }

    /// Digest of the bytes written so far.
    pub fn digest(&self) -> Digest {
        self.inner.digest()
    }

    /// Current status of this ingest.
    pub fn status(&self) -> Status {
        let mut status = self.inner.status();
        status.reference = self.reference.clone();
        status
    }

    /// Finalize the ingest into committed content.
    ///
    /// In one write transaction: verifies size and digest, records the blob
    /// with `labels`, drops the ingest record, and redirects every
    /// lease→ingest edge for this ref into a lease→content edge on the
    /// committed digest. The payload moves to its content-addressed
    /// location last, so a metadata failure leaves no record pointing at
    /// nothing. When the digest was committed by a racing ingest first,
    /// fails `AlreadyExists`.
    pub fn commit(
        self,
        size: u64,
        expected: Option<Digest>,
        labels: BTreeMap<String, String>,
    ) -> MetadataResult<Digest> {
        let IngestWriter {
            db,
            namespace,
            reference,
            inner,
        } = self;
        validate_labels(&labels)?;

        let offset = inner.offset();
        if size > 0 && size != offset {
            return Err(StorageError::UnexpectedSize {
                expected: size,
                actual: offset,
            }
            .into());
        }
        let digest = inner.digest();
        if let Some(want) = &expected
            && *want != digest
        {
            return Err(StorageError::DigestMismatch {
                expected: want.to_string(),
                actual: digest.to_string(),
            }
            .into());
        }

        let ns = namespace.as_str();
        db.update(move |tx| {
            let mut blobs = tx.open_table(CONTENT_BLOBS)?;
            if blobs.get((ns, digest.as_str()))?.is_some() {
                return Err(MetadataError::AlreadyExists(format!("content {digest}")));
            }
            let now = OffsetDateTime::now_utc();
            let record = BlobRecord {
                size: offset,
                labels,
                created_at: now,
                updated_at: now,
            };
            blobs.insert((ns, digest.as_str()), encode(&record)?.as_slice())?;
            drop(blobs);

            let mut ingests = tx.open_table(CONTENT_INGESTS)?;
            ingests.remove((ns, reference.as_str()))?;
            drop(ingests);

            let mut resources = tx.open_table(LEASE_RESOURCES)?;
            let mut holders = Vec::new();
            for entry in resources.range((ns, "", "", "")..)? {
                let (k, _) = entry?;
                let (kns, lease, kind, key) = k.value();
                if kns != ns {
                    break;
                }
                if kind == "ingest" && key == reference {
                    holders.push(lease.to_string());
                }
            }
            for lease in holders {
                resources.remove((ns, lease.as_str(), "ingest", reference.as_str()))?;
                resources.insert((ns, lease.as_str(), "content", digest.as_str()), ())?;
            }
            drop(resources);

            // Payload last: an error above aborts cleanly with the ingest
            // intact on disk.
            let committed = inner.commit(size, expected.as_ref())?;
            debug!(digest = %committed, "committed content");
            Ok(committed)
        })
    }
}

fn scoped_ref(namespace: &str, reference: &str) -> String {
    format!("{namespace}/{reference}")
}

fn materialize(digest: &Digest, record: BlobRecord) -> Info {
    Info {
        digest: digest.clone(),
        size: record.size,
        labels: record.labels,
        created_at: record.created_at,
        updated_at: record.updated_at,
    }
}

/// Field-path adaptor for blob info filters.
struct InfoAdaptor<'a>(&'a Info);

impl Adaptor for InfoAdaptor<'_> {
    fn field(&self, fieldpath: &[&str]) -> Option<String> {
        match fieldpath {
            [] => None,
            ["digest", ..] => Some(self.0.digest.to_string()),
            ["size", ..] => Some(self.0.size.to_string()),
            ["labels", rest @ ..] => check_map(rest, &self.0.labels),
            _ => None,
        }
    }
}

/// Field-path adaptor for ingest status filters.
struct StatusAdaptor<'a>(&'a Status);

impl Adaptor for StatusAdaptor<'_> {
    fn field(&self, fieldpath: &[&str]) -> Option<String> {
        match fieldpath {
            ["ref", ..] => Some(self.0.reference.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, DbOptions};
    use crate::leases::CreateOptions;
    use larder_core::lease::Resource;

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path(), DbOptions::default()).unwrap();
        (dir, db)
    }

    fn put(db: &Database, ns: &str, reference: &str, data: &[u8]) -> Digest {
        let store = db.content_store();
        let mut w = store
            .writer(
                ns,
                WriterOptions {
                    reference: reference.to_string(),
                    total: data.len() as u64,
                    ..WriterOptions::default()
                },
            )
            .unwrap();
        w.write(data).unwrap();
        w.commit(data.len() as u64, None, BTreeMap::new()).unwrap()
    }

    #[test]
    fn test_commit_and_read_back() {
        let (_dir, db) = test_db();
        let store = db.content_store();
        let digest = put(&db, "ns", "ref-1", b"some layer bytes");

        let info = store.info("ns", &digest).unwrap();
        assert_eq!(info.size, 16);
        assert!(info.labels.is_empty());

        let reader = store.reader_at("ns", &digest).unwrap();
        assert_eq!(reader.read_all().unwrap(), b"some layer bytes");

        // The ingest record is gone.
        assert!(store.status("ns", "ref-1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_commit_with_expected_digest() {
        let (_dir, db) = test_db();
        let store = db.content_store();
        let expected = Digest::from_bytes(b"exact");

        let mut w = store
            .writer(
                "ns",
                WriterOptions {
                    reference: "r".to_string(),
                    expected: Some(expected.clone()),
                    ..WriterOptions::default()
                },
            )
            .unwrap();
        w.write(b"exact").unwrap();
        let committed = w.commit(5, Some(expected.clone()), BTreeMap::new()).unwrap();
        assert_eq!(committed, expected);

        // Opening a writer for committed content short-circuits.
        let err = store
            .writer(
                "ns",
                WriterOptions {
                    reference: "r2".to_string(),
                    expected: Some(expected),
                    ..WriterOptions::default()
                },
            )
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test]
    fn test_commit_digest_mismatch_keeps_record_out() {
        let (_dir, db) = test_db();
        let store = db.content_store();
        let mut w = store
            .writer(
                "ns",
                WriterOptions {
                    reference: "bad".to_string(),
                    ..WriterOptions::default()
                },
            )
            .unwrap();
        w.write(b"actual").unwrap();
        let wrong = Digest::from_bytes(b"different");
        let err = w
            .commit(0, Some(wrong.clone()), BTreeMap::new())
            .unwrap_err();
        assert!(matches!(
            err,
            MetadataError::Storage(StorageError::DigestMismatch { .. })
        ));
        assert!(store.info("ns", &wrong).unwrap_err().is_not_found());
    }

    #[test]
    fn test_metadata_delete_keeps_payload_until_gc() {
        let (_dir, db) = test_db();
        let store = db.content_store();
        let digest = put(&db, "ns", "r", b"payload");

        store.delete("ns", &digest).unwrap();
        assert!(db.is_dirty());
        assert!(store.info("ns", &digest).unwrap_err().is_not_found());
        // Metadata gone means unreadable through the store, even though the
        // payload file still exists until cleanup.
        assert!(store.reader_at("ns", &digest).unwrap_err().is_not_found());
        assert!(db.blob_store().info(&digest).is_ok());
        assert!(store.delete("ns", &digest).unwrap_err().is_not_found());
    }

    #[test]
    fn test_update_labels_only() {
        let (_dir, db) = test_db();
        let store = db.content_store();
        let digest = put(&db, "ns", "r", b"labeled");

        let mut info = store.info("ns", &digest).unwrap();
        info.labels
            .insert("containerd.io/gc.root".to_string(), "always".to_string());
        let updated = store.update("ns", info.clone(), &[]).unwrap();
        assert_eq!(
            updated.labels.get("containerd.io/gc.root").map(String::as_str),
            Some("always")
        );
        assert!(updated.updated_at >= updated.created_at);

        let err = store.update("ns", info, &["size"]).unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_walk_filters() {
        let (_dir, db) = test_db();
        let store = db.content_store();
        let d1 = put(&db, "ns", "r1", b"one");
        let _d2 = put(&db, "ns", "r2", b"two");

        let mut info = store.info("ns", &d1).unwrap();
        info.labels.insert("kind".to_string(), "config".to_string());
        store.update("ns", info, &[]).unwrap();

        let mut seen = Vec::new();
        store
            .walk("ns", &["labels.kind==config"], |info| {
                seen.push(info.digest);
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![d1]);

        let mut count = 0;
        store
            .walk("ns", &[], |_| {
                count += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_statuses_and_abort() {
        let (_dir, db) = test_db();
        let store = db.content_store();
        let mut w = store
            .writer(
                "ns",
                WriterOptions {
                    reference: "upload-1".to_string(),
                    total: 100,
                    ..WriterOptions::default()
                },
            )
            .unwrap();
        w.write(b"abcde").unwrap();
        drop(w);

        let status = store.status("ns", "upload-1").unwrap();
        assert_eq!(status.offset, 5);
        assert_eq!(status.total, 100);

        let all = store.list_statuses("ns", &[]).unwrap();
        assert_eq!(all.len(), 1);
        let filtered = store.list_statuses("ns", &["ref==upload-1"]).unwrap();
        assert_eq!(filtered.len(), 1);
        let none = store.list_statuses("ns", &["ref==other"]).unwrap();
        assert!(none.is_empty());

        store.abort("ns", "upload-1").unwrap();
        assert!(store.status("ns", "upload-1").unwrap_err().is_not_found());
        assert!(store.abort("ns", "upload-1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_resume_across_writers() {
        let (_dir, db) = test_db();
        let store = db.content_store();
        let mut w = store
            .writer(
                "ns",
                WriterOptions {
                    reference: "resume".to_string(),
                    ..WriterOptions::default()
                },
            )
            .unwrap();
        w.write(b"first-").unwrap();
        drop(w);

        let mut w = store
            .writer(
                "ns",
                WriterOptions {
                    reference: "resume".to_string(),
                    ..WriterOptions::default()
                },
            )
            .unwrap();
        assert_eq!(w.offset(), 6);
        w.write(b"second").unwrap();
        let digest = w.commit(12, None, BTreeMap::new()).unwrap();
        assert_eq!(digest, Digest::from_bytes(b"first-second"));
    }

    #[test]
    fn test_lease_edge_redirected_on_commit() {
        let (_dir, db) = test_db();
        let leases = db.lease_store();
        leases
            .create(
                "ns",
                CreateOptions {
                    id: Some("l1".to_string()),
                    ..CreateOptions::default()
                },
            )
            .unwrap();

        let store = db.content_store();
        let mut w = store
            .writer(
                "ns",
                WriterOptions {
                    reference: "leased-upload".to_string(),
                    lease: Some("l1".to_string()),
                    ..WriterOptions::default()
                },
            )
            .unwrap();

        let held = leases.list_resources("ns", "l1").unwrap();
        assert_eq!(held, vec![Resource::ingest("leased-upload")]);

        w.write(b"leased bytes").unwrap();
        let digest = w.commit(0, None, BTreeMap::new()).unwrap();

        let held = leases.list_resources("ns", "l1").unwrap();
        assert_eq!(held, vec![Resource::content(digest.as_str())]);
    }

    #[test]
    fn test_writer_missing_lease() {
        let (_dir, db) = test_db();
        let store = db.content_store();
        let err = store
            .writer(
                "ns",
                WriterOptions {
                    reference: "r".to_string(),
                    lease: Some("ghost".to_string()),
                    ..WriterOptions::default()
                },
            )
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_namespace_isolation() {
        let (_dir, db) = test_db();
        let store = db.content_store();
        let digest = put(&db, "ns-a", "r", b"shared payload");

        // The payload is shared at the blob layer, but metadata is not.
        assert!(store.info("ns-b", &digest).unwrap_err().is_not_found());
        assert!(store.reader_at("ns-b", &digest).unwrap_err().is_not_found());

        // Same ref in another namespace is an independent ingest.
        let mut w = store
            .writer(
                "ns-b",
                WriterOptions {
                    reference: "r".to_string(),
                    ..WriterOptions::default()
                },
            )
            .unwrap();
        assert_eq!(w.offset(), 0);
        w.write(b"other").unwrap();
        drop(w);
        assert!(store.status("ns-a", "r").unwrap_err().is_not_found());
        assert_eq!(store.status("ns-b", "r").unwrap().offset, 5);
    }
}
