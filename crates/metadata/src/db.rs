//! Database façade: open/close, transactions, dirty tracking, and garbage
//! collection orchestration.

use crate::collector::Collector;
use crate::content::ContentStore;
use crate::error::{MetadataError, MetadataResult};
use crate::gc::{GcContext, GcStats, Node, ResourceType, tricolor};
use crate::images::ImageStore;
use crate::leases::LeaseStore;
use crate::tables::{
    CONTENT_BLOBS, CONTENT_INGESTS, DB_VERSION, IMAGES, LEASE_RESOURCES, LEASES, META,
    META_DIRTY_CONTENT, META_VERSION, NAMESPACES,
};
use larder_core::cancel::CancelToken;
use larder_storage::{BlobStore, StorageError};
use parking_lot::{Mutex, RwLock};
use redb::{ReadTransaction, ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

/// Options for opening a database.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DbOptions {
    /// Open without initializing schema state; write transactions fail and
    /// close does not run a final collection.
    #[serde(default)]
    pub read_only: bool,
}

/// Options for delete operations on the stores.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeleteOptions {
    /// Run a garbage collection before returning.
    pub sync: bool,
}

/// A namespaced metadata database coupled to a content-addressed blob
/// store.
///
/// The database uniquely owns the embedded KV engine, the blob store, and
/// the collector registry; stores borrow it. Writers take the shared side
/// of the GC lock, the collector takes the exclusive side for the whole of
/// mark and sweep, and readers rely on the engine's snapshot isolation.
pub struct Database {
    db: redb::Database,
    blobs: BlobStore,
    gc_lock: RwLock<()>,
    dirty: AtomicU32,
    collectors: Mutex<BTreeMap<u8, Arc<dyn Collector>>>,
    options: DbOptions,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dirty", &self.dirty)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open the database at `<root>/meta.db` and the blob store at
    /// `<root>/content`, enforcing the schema version.
    pub fn open(root: impl AsRef<Path>, options: DbOptions) -> MetadataResult<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;

        let db = if options.read_only {
            redb::Database::open(root.join("meta.db"))?
        } else {
            redb::Database::create(root.join("meta.db"))?
        };
        let blobs = BlobStore::open(root.join("content"))?;

        let database = Self {
            db,
            blobs,
            gc_lock: RwLock::new(()),
            dirty: AtomicU32::new(0),
            collectors: Mutex::new(BTreeMap::new()),
            options,
        };

        if database.options.read_only {
            database.view(|tx| check_version(tx))?;
        } else {
            let tx = database.db.begin_write()?;
            let init = init_schema(&tx);
            match init {
                Ok(()) => tx.commit()?,
                Err(e) => {
                    let _ = tx.abort();
                    return Err(e);
                }
            }
        }

        Ok(database)
    }

    /// The image store over this database.
    pub fn image_store(&self) -> ImageStore<'_> {
        ImageStore::new(self)
    }

    /// The lease store over this database.
    pub fn lease_store(&self) -> LeaseStore<'_> {
        LeaseStore::new(self)
    }

    /// The content store adapter over this database.
    pub fn content_store(&self) -> ContentStore<'_> {
        ContentStore::new(self)
    }

    pub(crate) fn blob_store(&self) -> &BlobStore {
        &self.blobs
    }

    /// Run a read-only transaction against a frozen snapshot.
    pub fn view<T>(
        &self,
        f: impl FnOnce(&ReadTransaction) -> MetadataResult<T>,
    ) -> MetadataResult<T> {
        let tx = self.db.begin_read()?;
        f(&tx)
    }

    /// Run a write transaction; commits on success, aborts on error.
    ///
    /// Takes the shared side of the GC lock so a collection cannot start
    /// between the mark and sweep of an in-flight mutation, and re-verifies
    /// the schema version.
    pub fn update<T>(
        &self,
        f: impl FnOnce(&WriteTransaction) -> MetadataResult<T>,
    ) -> MetadataResult<T> {
        if self.options.read_only {
            return Err(MetadataError::Unavailable(
                "database is read-only".to_string(),
            ));
        }
        let _shared = self.gc_lock.read();
        self.update_unlocked(f)
    }

    fn update_unlocked<T>(
        &self,
        f: impl FnOnce(&WriteTransaction) -> MetadataResult<T>,
    ) -> MetadataResult<T> {
        let tx = self.db.begin_write()?;
        let result = check_version_mut(&tx).and_then(|_| f(&tx));
        match result {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                let _ = tx.abort();
                Err(e)
            }
        }
    }

    /// Register a collector for an external resource kind.
    ///
    /// The type tag must lie in the plugin range; registration applies to
    /// subsequent collections.
    pub fn register_collector(
        &self,
        resource: ResourceType,
        collector: Arc<dyn Collector>,
    ) -> MetadataResult<()> {
        if resource.0 < ResourceType::PLUGIN_MIN || resource.0 > ResourceType::MAX {
            return Err(MetadataError::InvalidArgument(format!(
                "collector type {:#x} outside plugin range {:#x}..={:#x}",
                resource.0,
                ResourceType::PLUGIN_MIN,
                ResourceType::MAX,
            )));
        }
        let mut collectors = self.collectors.lock();
        if collectors.contains_key(&resource.0) {
            return Err(MetadataError::AlreadyExists(format!(
                "collector type {:#x}",
                resource.0
            )));
        }
        collectors.insert(resource.0, collector);
        Ok(())
    }

    /// Whether deletions since the last collection warrant a new one.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst) > 0
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.fetch_add(1, Ordering::SeqCst);
    }

    /// Remove resources no longer reachable from a root.
    ///
    /// Holds the exclusive GC lock over root scan, mark, and sweep; read
    /// transactions proceed against their snapshots throughout. Post-sweep
    /// blob cleanup runs after the lock is released.
    pub fn garbage_collect(&self, cancel: &CancelToken) -> MetadataResult<GcStats> {
        if self.options.read_only {
            return Err(MetadataError::Unavailable(
                "database is read-only".to_string(),
            ));
        }

        let exclusive = self.gc_lock.write();
        let started = Instant::now();

        let collectors = self.collectors.lock().clone();
        let ctx = GcContext::start(&collectors)?;

        let marked = match self.get_marked(&ctx, cancel) {
            Ok(marked) => marked,
            Err(e) => {
                drop(exclusive);
                ctx.cancel_all();
                return Err(e);
            }
        };

        let sweep = self.update_unlocked(|tx| {
            let mut nodes = Vec::new();
            ctx.scan_all(tx, &mut |node| nodes.push(node))?;

            let mut content_removed = false;
            for node in nodes {
                if cancel.is_cancelled() {
                    return Err(MetadataError::Cancelled);
                }
                if marked.contains(&node) {
                    continue;
                }
                debug!(resource = ?node.resource, namespace = %node.namespace, key = %node.key, "removing unreachable node");
                if ctx.remove(tx, &node)? {
                    content_removed = true;
                }
            }

            if content_removed {
                set_dirty_content(tx, true)?;
            }
            Ok(())
        });
        if let Err(e) = sweep {
            drop(exclusive);
            ctx.cancel_all();
            return Err(e);
        }

        self.dirty.store(0, Ordering::SeqCst);
        let mut stats = GcStats {
            meta: started.elapsed(),
            ..GcStats::default()
        };
        drop(exclusive);

        ctx.finish_all()?;

        if self.view(dirty_content)? {
            debug!("starting content cleanup");
            let cleanup_started = Instant::now();
            self.cleanup_content(cancel)?;
            stats.content = cleanup_started.elapsed();
        }

        Ok(stats)
    }

    fn get_marked(&self, ctx: &GcContext, cancel: &CancelToken) -> MetadataResult<HashSet<Node>> {
        let tx = self.db.begin_read()?;

        let mut roots = Vec::new();
        ctx.scan_roots(&tx, &mut |node| roots.push(node))?;
        if cancel.is_cancelled() {
            return Err(MetadataError::Cancelled);
        }

        tricolor(roots, |node| {
            if cancel.is_cancelled() {
                return Err(MetadataError::Cancelled);
            }
            let mut successors = Vec::new();
            ctx.references(&tx, node, &mut |succ| successors.push(succ))?;
            Ok(successors)
        })
    }

    /// Delete blob payloads that have no metadata record in any namespace,
    /// then clear the persisted dirty-content flag.
    fn cleanup_content(&self, cancel: &CancelToken) -> MetadataResult<()> {
        let seen: HashSet<String> = self.view(|tx| {
            let blobs = tx.open_table(CONTENT_BLOBS)?;
            let mut seen = HashSet::new();
            for entry in blobs.iter()? {
                let (k, _) = entry?;
                seen.insert(k.value().1.to_string());
            }
            Ok(seen)
        })?;

        let result = self.blobs.walk(|info| {
            if cancel.is_cancelled() {
                return Err(StorageError::Cancelled);
            }
            if seen.contains(info.digest.as_str()) {
                return Ok(());
            }
            debug!(digest = %info.digest, "removing orphaned blob");
            match self.blobs.delete(&info.digest) {
                // Already gone; an earlier cleanup attempt got this far.
                Err(StorageError::NotFound(_)) => Ok(()),
                other => other,
            }
        });
        if let Err(e) = result {
            warn!(error = %e, "content cleanup failed, leaving dirty flag for retry");
            return Err(e.into());
        }

        self.update(|tx| set_dirty_content(tx, false))
    }

    /// Run a final collection (unless read-only), then close the engine.
    pub fn close(self, cancel: &CancelToken) -> MetadataResult<()> {
        let gc_result = if self.options.read_only {
            Ok(())
        } else {
            self.garbage_collect(cancel).map(|_| ())
        };
        drop(self.db);
        gc_result
    }
}

/// Create every table and write the schema version, or verify it.
fn init_schema(tx: &WriteTransaction) -> MetadataResult<()> {
    tx.open_table(NAMESPACES)?;
    tx.open_table(IMAGES)?;
    tx.open_table(CONTENT_BLOBS)?;
    tx.open_table(CONTENT_INGESTS)?;
    tx.open_table(LEASES)?;
    tx.open_table(LEASE_RESOURCES)?;

    let mut meta = tx.open_table(META)?;
    let existing = meta.get(META_VERSION)?.map(|g| g.value());
    match existing {
        None => {
            meta.insert(META_VERSION, DB_VERSION)?;
            Ok(())
        }
        Some(version) if version == DB_VERSION => Ok(()),
        Some(version) => Err(MetadataError::FailedPrecondition(format!(
            "database version {version}, expected {DB_VERSION}"
        ))),
    }
}

fn check_version(tx: &ReadTransaction) -> MetadataResult<()> {
    let meta = tx.open_table(META)?;
    match meta.get(META_VERSION)?.map(|g| g.value()) {
        Some(version) if version == DB_VERSION => Ok(()),
        Some(version) => Err(MetadataError::FailedPrecondition(format!(
            "database version {version}, expected {DB_VERSION}"
        ))),
        None => Err(MetadataError::FailedPrecondition(
            "database version missing".to_string(),
        )),
    }
}

fn check_version_mut(tx: &WriteTransaction) -> MetadataResult<()> {
    let meta = tx.open_table(META)?;
    match meta.get(META_VERSION)?.map(|g| g.value()) {
        Some(version) if version == DB_VERSION => Ok(()),
        Some(version) => Err(MetadataError::FailedPrecondition(format!(
            "database version {version}, expected {DB_VERSION}"
        ))),
        None => Err(MetadataError::FailedPrecondition(
            "database version missing".to_string(),
        )),
    }
}

/// Record a namespace the first time an object is written under it.
pub(crate) fn ensure_namespace(tx: &WriteTransaction, namespace: &str) -> MetadataResult<()> {
    if namespace.is_empty() {
        return Err(MetadataError::InvalidArgument(
            "empty namespace".to_string(),
        ));
    }
    let mut namespaces = tx.open_table(NAMESPACES)?;
    namespaces.insert(namespace, ())?;
    Ok(())
}

pub(crate) fn set_dirty_content(tx: &WriteTransaction, dirty: bool) -> MetadataResult<()> {
    let mut meta = tx.open_table(META)?;
    meta.insert(META_DIRTY_CONTENT, u64::from(dirty))?;
    Ok(())
}

pub(crate) fn dirty_content(tx: &ReadTransaction) -> MetadataResult<bool> {
    let meta = tx.open_table(META)?;
    Ok(meta.get(META_DIRTY_CONTENT)?.map(|g| g.value()) == Some(1))
}
