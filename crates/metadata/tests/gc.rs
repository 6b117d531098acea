//! End-to-end garbage collection tests over a real database and blob store.

use larder_core::cancel::CancelToken;
use larder_core::descriptor::Descriptor;
use larder_core::digest::Digest;
use larder_core::image::Image;
use larder_core::labels::{GC_REF_CONTENT, GC_ROOT};
use larder_core::lease::Resource;
use larder_metadata::collector::{CollectionContext, Collector};
use larder_metadata::gc::{Node, ResourceType};
use larder_metadata::tables::CONTENT_BLOBS;
use larder_metadata::{
    Database, DbOptions, DeleteOptions, LeaseCreateOptions, MetadataResult, WriterOptions,
};
use redb::ReadableTable;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, mpsc};
use time::{Duration, OffsetDateTime};

fn open(dir: &Path) -> Database {
    Database::open(dir, DbOptions::default()).unwrap()
}

fn collect(db: &Database) {
    db.garbage_collect(&CancelToken::new()).unwrap();
}

/// Commit a blob with the given labels and return its digest.
fn put_content(db: &Database, ns: &str, data: &[u8], labels: &[(&str, &str)]) -> Digest {
    let store = db.content_store();
    let reference = format!("put-{}", Digest::from_bytes(data).hex());
    let mut writer = store
        .writer(
            ns,
            WriterOptions {
                reference,
                ..WriterOptions::default()
            },
        )
        .unwrap();
    writer.write(data).unwrap();
    let labels: BTreeMap<String, String> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    writer.commit(0, None, labels).unwrap()
}

fn put_image(db: &Database, ns: &str, name: &str, target: &Digest, size: u64) {
    db.image_store()
        .create(
            ns,
            Image::new(
                name,
                Descriptor::new(
                    "application/vnd.oci.image.manifest.v1+json",
                    target.clone(),
                    size,
                ),
            ),
        )
        .unwrap();
}

fn content_exists(db: &Database, ns: &str, digest: &Digest) -> bool {
    match db.content_store().info(ns, digest) {
        Ok(_) => true,
        Err(e) if e.is_not_found() => false,
        Err(e) => panic!("info failed: {e}"),
    }
}

fn blob_file_exists(root: &Path, digest: &Digest) -> bool {
    root.join("content")
        .join("blobs")
        .join(digest.algorithm())
        .join(digest.hex())
        .exists()
}

fn ref_label(value: &Digest) -> (&'static str, String) {
    (GC_REF_CONTENT, value.to_string())
}

#[test]
fn test_root_label_pins_content() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());

    let pinned = put_content(&db, "ns", b"pinned", &[(GC_ROOT, "always")]);
    let doomed = put_content(&db, "ns", b"doomed", &[]);

    collect(&db);

    assert!(content_exists(&db, "ns", &pinned));
    assert!(!content_exists(&db, "ns", &doomed));
    assert!(blob_file_exists(dir.path(), &pinned));
    assert!(!blob_file_exists(dir.path(), &doomed));
}

#[test]
fn test_image_chain_retained_orphan_removed() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());

    let child = put_content(&db, "ns", b"child layer", &[]);
    let (key, value) = ref_label(&child);
    let label = format!("{key}.0");
    let parent = put_content(&db, "ns", b"parent manifest", &[(label.as_str(), value.as_str())]);
    let orphan = put_content(&db, "ns", b"unreferenced", &[]);

    put_image(&db, "ns", "img1", &parent, 15);

    collect(&db);

    assert!(content_exists(&db, "ns", &parent));
    assert!(content_exists(&db, "ns", &child));
    assert!(!content_exists(&db, "ns", &orphan));
}

#[test]
fn test_mark_handles_cycles() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    let content = db.content_store();

    // a <-> b reachable from an image; c <-> d unreachable.
    let a = put_content(&db, "ns", b"cycle-a", &[]);
    let b = {
        let (k, v) = ref_label(&a);
        put_content(&db, "ns", b"cycle-b", &[(k, v.as_str())])
    };
    let c = put_content(&db, "ns", b"cycle-c", &[]);
    let d = {
        let (k, v) = ref_label(&c);
        put_content(&db, "ns", b"cycle-d", &[(k, v.as_str())])
    };

    // Close the cycles by pointing a -> b and c -> d.
    for (from, to) in [(&a, &b), (&c, &d)] {
        let mut info = content.info("ns", from).unwrap();
        info.labels
            .insert(GC_REF_CONTENT.to_string(), to.to_string());
        content.update("ns", info, &[]).unwrap();
    }

    put_image(&db, "ns", "img1", &a, 7);

    collect(&db);

    assert!(content_exists(&db, "ns", &a));
    assert!(content_exists(&db, "ns", &b));
    assert!(!content_exists(&db, "ns", &c));
    assert!(!content_exists(&db, "ns", &d));
}

#[test]
fn test_flat_lease_marks_without_recursing() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    let leases = db.lease_store();

    let d = put_content(&db, "ns", b"grandchild", &[]);
    let c = {
        let (k, v) = ref_label(&d);
        put_content(&db, "ns", b"held by flat lease", &[(k, v.as_str())])
    };

    leases
        .create(
            "ns",
            LeaseCreateOptions {
                id: Some("l5".to_string()),
                expiration: Some(Duration::hours(1)),
                flat: Some(Duration::hours(1)),
                ..LeaseCreateOptions::default()
            },
        )
        .unwrap();
    leases
        .add_resource("ns", "l5", &Resource::content(c.as_str()))
        .unwrap();

    collect(&db);

    assert!(content_exists(&db, "ns", &c));
    assert!(!content_exists(&db, "ns", &d));
}

#[test]
fn test_live_lease_recurses_through_references() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    let leases = db.lease_store();

    let d = put_content(&db, "ns", b"reached transitively", &[]);
    let c = {
        let (k, v) = ref_label(&d);
        put_content(&db, "ns", b"held by lease", &[(k, v.as_str())])
    };

    leases
        .create(
            "ns",
            LeaseCreateOptions {
                id: Some("l1".to_string()),
                ..LeaseCreateOptions::default()
            },
        )
        .unwrap();
    leases
        .add_resource("ns", "l1", &Resource::content(c.as_str()))
        .unwrap();

    collect(&db);

    assert!(content_exists(&db, "ns", &c));
    assert!(content_exists(&db, "ns", &d));
}

#[test]
fn test_expired_lease_is_not_a_root() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    let leases = db.lease_store();

    let held = put_content(&db, "ns", b"held by expired lease", &[]);
    leases
        .create(
            "ns",
            LeaseCreateOptions {
                id: Some("expired".to_string()),
                expiration: Some(Duration::seconds(-1)),
                ..LeaseCreateOptions::default()
            },
        )
        .unwrap();
    leases
        .add_resource("ns", "expired", &Resource::content(held.as_str()))
        .unwrap();

    collect(&db);

    assert!(!content_exists(&db, "ns", &held));
    assert!(leases.get("ns", "expired").unwrap_err().is_not_found());
}

#[test]
fn test_lease_delete_releases_resources() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    let leases = db.lease_store();

    let held = put_content(&db, "ns", b"released on delete", &[]);
    leases
        .create(
            "ns",
            LeaseCreateOptions {
                id: Some("l1".to_string()),
                ..LeaseCreateOptions::default()
            },
        )
        .unwrap();
    leases
        .add_resource("ns", "l1", &Resource::content(held.as_str()))
        .unwrap();

    collect(&db);
    assert!(content_exists(&db, "ns", &held));

    leases.delete("ns", "l1", DeleteOptions::default()).unwrap();
    collect(&db);
    assert!(!content_exists(&db, "ns", &held));
}

#[test]
fn test_expired_ingest_removed_and_ref_reusable() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    let content = db.content_store();

    let mut writer = content
        .writer(
            "ns",
            WriterOptions {
                reference: "i1".to_string(),
                expires_at: Some(OffsetDateTime::now_utc() - Duration::seconds(1)),
                ..WriterOptions::default()
            },
        )
        .unwrap();
    writer.write(b"partial upload").unwrap();
    drop(writer);

    collect(&db);

    assert!(content.status("ns", "i1").unwrap_err().is_not_found());

    // Reopening the same ref starts fresh.
    let mut writer = content
        .writer(
            "ns",
            WriterOptions {
                reference: "i1".to_string(),
                ..WriterOptions::default()
            },
        )
        .unwrap();
    assert_eq!(writer.offset(), 0);
    writer.write(b"fresh upload").unwrap();
    let digest = writer.commit(0, None, BTreeMap::new()).unwrap();
    assert_eq!(digest, Digest::from_bytes(b"fresh upload"));
}

#[test]
fn test_live_lease_keeps_expired_ingest() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    let content = db.content_store();

    db.lease_store()
        .create(
            "ns",
            LeaseCreateOptions {
                id: Some("l1".to_string()),
                ..LeaseCreateOptions::default()
            },
        )
        .unwrap();

    let mut writer = content
        .writer(
            "ns",
            WriterOptions {
                reference: "kept".to_string(),
                lease: Some("l1".to_string()),
                expires_at: Some(OffsetDateTime::now_utc() - Duration::seconds(1)),
                ..WriterOptions::default()
            },
        )
        .unwrap();
    writer.write(b"slow upload").unwrap();
    drop(writer);

    // Also an expired ingest under an expired lease, which must go.
    db.lease_store()
        .create(
            "ns",
            LeaseCreateOptions {
                id: Some("dead".to_string()),
                expiration: Some(Duration::seconds(-1)),
                ..LeaseCreateOptions::default()
            },
        )
        .unwrap();
    let writer = content
        .writer(
            "ns",
            WriterOptions {
                reference: "dropped".to_string(),
                lease: Some("dead".to_string()),
                expires_at: Some(OffsetDateTime::now_utc() - Duration::seconds(1)),
                ..WriterOptions::default()
            },
        )
        .unwrap();
    drop(writer);

    collect(&db);

    assert_eq!(content.status("ns", "kept").unwrap().offset, 11);
    assert!(content.status("ns", "dropped").unwrap_err().is_not_found());
}

#[derive(Default)]
struct PluginState {
    all: Vec<Node>,
    active: Vec<Node>,
    leased: HashMap<String, Vec<Node>>,
    removed: Vec<Node>,
}

struct PluginCollector {
    state: Arc<Mutex<PluginState>>,
}

impl Collector for PluginCollector {
    fn start_collection(&self) -> MetadataResult<Box<dyn CollectionContext>> {
        Ok(Box::new(PluginContext {
            state: self.state.clone(),
        }))
    }
}

struct PluginContext {
    state: Arc<Mutex<PluginState>>,
}

impl CollectionContext for PluginContext {
    fn reference_label(&self) -> &str {
        "test"
    }

    fn all(&self, f: &mut dyn FnMut(Node)) {
        for node in &self.state.lock().unwrap().all {
            f(node.clone());
        }
    }

    fn active(&self, namespace: &str, f: &mut dyn FnMut(Node)) {
        for node in &self.state.lock().unwrap().active {
            if node.namespace == namespace {
                f(node.clone());
            }
        }
    }

    fn leased(&self, namespace: &str, lease: &str, f: &mut dyn FnMut(Node)) {
        let state = self.state.lock().unwrap();
        if let Some(nodes) = state.leased.get(lease) {
            for node in nodes {
                if node.namespace == namespace {
                    f(node.clone());
                }
            }
        }
    }

    fn remove(&self, node: &Node) -> MetadataResult<()> {
        let mut state = self.state.lock().unwrap();
        state.all.retain(|n| n != node);
        state.removed.push(node.clone());
        Ok(())
    }

    fn cancel(&self) {}

    fn finish(&self) -> MetadataResult<()> {
        Ok(())
    }
}

#[test]
fn test_plugin_collector_participates() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    let plugin_type = ResourceType(0x10);

    let node = |key: &str| Node::new(plugin_type, "ns", key);
    let state = Arc::new(Mutex::new(PluginState {
        all: vec![node("t1"), node("t2"), node("t3"), node("t4")],
        active: vec![node("t1")],
        leased: HashMap::from([
            ("l1".to_string(), vec![node("t3")]),
            ("l2".to_string(), vec![node("t4")]),
        ]),
        removed: Vec::new(),
    }));
    db.register_collector(
        plugin_type,
        Arc::new(PluginCollector {
            state: state.clone(),
        }),
    )
    .unwrap();

    // Content X carries a reference to plugin node t2 and is pinned by an
    // image.
    let x = put_content(
        &db,
        "ns",
        b"refers to plugin node",
        &[("containerd.io/gc.ref.test", "t2")],
    );
    put_image(&db, "ns", "imgX", &x, 21);

    let leases = db.lease_store();
    leases
        .create(
            "ns",
            LeaseCreateOptions {
                id: Some("l1".to_string()),
                expiration: Some(Duration::hours(1)),
                ..LeaseCreateOptions::default()
            },
        )
        .unwrap();
    leases
        .create(
            "ns",
            LeaseCreateOptions {
                id: Some("l2".to_string()),
                expiration: Some(Duration::seconds(-1)),
                ..LeaseCreateOptions::default()
            },
        )
        .unwrap();

    collect(&db);

    let state = state.lock().unwrap();
    let remaining: Vec<&str> = state.all.iter().map(|n| n.key.as_str()).collect();
    assert_eq!(remaining, vec!["t1", "t2", "t3"]);
    assert_eq!(state.removed, vec![node("t4")]);
}

#[test]
fn test_orphaned_payloads_swept_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut digests = Vec::new();
    {
        let db = open(dir.path());
        let content = db.content_store();
        for i in 0..10u32 {
            let digest = put_content(&db, "ns", format!("blob {i}").as_bytes(), &[]);
            content.delete("ns", &digest).unwrap();
            digests.push(digest);
        }
        // Drop without close: the metadata deletions are committed but the
        // filesystem sweep never ran, as after a crash.
        drop(db);
    }

    for digest in &digests {
        assert!(blob_file_exists(dir.path(), digest));
    }

    let db = open(dir.path());
    collect(&db);

    for digest in &digests {
        assert!(!blob_file_exists(dir.path(), digest));
    }
}

#[test]
fn test_metadata_and_filesystem_agree_after_collection() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());

    let child = put_content(&db, "ns", b"kept child", &[]);
    let root = {
        let (k, v) = ref_label(&child);
        put_content(&db, "ns", b"kept root", &[(k, v.as_str())])
    };
    put_image(&db, "ns", "img", &root, 9);
    put_content(&db, "ns", b"orphan one", &[]);
    put_content(&db, "ns", b"orphan two", &[]);
    let deleted = put_content(&db, "other", b"deleted by hand", &[]);
    db.content_store().delete("other", &deleted).unwrap();

    collect(&db);

    let mut records = Vec::new();
    for ns in ["ns", "other"] {
        db.content_store()
            .walk(ns, &[], |info| {
                records.push(info.digest);
                Ok(())
            })
            .unwrap();
    }
    records.sort();

    let mut files = Vec::new();
    let blob_dir = dir.path().join("content").join("blobs").join("sha256");
    for entry in std::fs::read_dir(blob_dir).unwrap() {
        let name = entry.unwrap().file_name();
        files.push(Digest::parse(&format!("sha256:{}", name.to_string_lossy())).unwrap());
    }
    files.sort();

    assert_eq!(records, files);
    assert_eq!(records, {
        let mut want = vec![child, root];
        want.sort();
        want
    });
}

#[test]
fn test_readers_see_pre_sweep_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());

    let orphan = put_content(&db, "ns", b"visible to old readers", &[]);
    let pinned = put_content(&db, "ns", b"always visible", &[(GC_ROOT, "always")]);

    let (reader_ready_tx, reader_ready_rx) = mpsc::channel();
    let (gc_done_tx, gc_done_rx) = mpsc::channel::<()>();

    let db_ref = &db;
    let orphan_ref = &orphan;
    let pinned_ref = &pinned;
    std::thread::scope(|s| {
        let handle = s.spawn(move || {
            db_ref
                .view(|tx| {
                    let blobs = tx.open_table(CONTENT_BLOBS)?;
                    assert!(blobs.get(("ns", orphan_ref.as_str()))?.is_some());
                    reader_ready_tx.send(()).unwrap();
                    gc_done_rx.recv().unwrap();
                    // The snapshot predates the sweep: the orphan is still
                    // here.
                    assert!(blobs.get(("ns", orphan_ref.as_str()))?.is_some());
                    assert!(blobs.get(("ns", pinned_ref.as_str()))?.is_some());
                    Ok(())
                })
                .unwrap();
        });

        reader_ready_rx.recv().unwrap();
        collect(&db);
        gc_done_tx.send(()).unwrap();
        handle.join().unwrap();
    });

    // New transactions observe the post-sweep state.
    assert!(!content_exists(&db, "ns", &orphan));
    assert!(content_exists(&db, "ns", &pinned));
}

#[test]
fn test_close_runs_final_collection() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    let orphan = put_content(&db, "ns", b"removed at close", &[]);
    db.close(&CancelToken::new()).unwrap();

    let db = open(dir.path());
    assert!(!content_exists(&db, "ns", &orphan));
    assert!(!blob_file_exists(dir.path(), &orphan));
}

#[test]
fn test_cancelled_collection_leaves_state_for_retry() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    let orphan = put_content(&db, "ns", b"spared by cancellation", &[]);

    let token = CancelToken::new();
    token.cancel();
    let err = db.garbage_collect(&token).unwrap_err();
    assert!(err.is_cancelled());
    assert!(content_exists(&db, "ns", &orphan));

    collect(&db);
    assert!(!content_exists(&db, "ns", &orphan));
}

#[test]
fn test_synchronous_image_delete_collects() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());

    let target = put_content(&db, "ns", b"image target", &[]);
    put_image(&db, "ns", "img", &target, 12);
    collect(&db);
    assert!(content_exists(&db, "ns", &target));

    db.image_store()
        .delete("ns", "img", DeleteOptions { sync: true })
        .unwrap();
    assert!(!content_exists(&db, "ns", &target));
    assert!(!blob_file_exists(dir.path(), &target));
}
