//! Garbage collection over the labeled resource graph.
//!
//! Collection marks reachable nodes with the tricolor algorithm over a
//! read-transaction snapshot, then sweeps unreachable nodes inside a single
//! write transaction. Nodes span the metadata schema (content, ingests,
//! leases) and any registered external collectors; reference edges are
//! encoded in `containerd.io/gc.ref.*` labels and lease resource sets.

use crate::collector::CollectionContext;
use crate::error::{MetadataError, MetadataResult};
use crate::records::{BlobRecord, ImageRecord, IngestRecord, LeaseRecord, decode};
use crate::tables::{CONTENT_BLOBS, CONTENT_INGESTS, IMAGES, LEASE_RESOURCES, LEASES, NAMESPACES};
use larder_core::labels::{GC_EXPIRE, GC_FLAT, GC_REF_PREFIX, GC_ROOT, parse_timestamp};
use redb::{ReadTransaction, ReadableTable, WriteTransaction};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::warn;

/// Numeric tag identifying a resource kind.
///
/// Built-in kinds occupy a reserved low range; registered collectors use
/// `0x10..=0x1F`. Or-ing in [`ResourceType::FLAT_BIT`] produces the flat
/// variant of a type: present in the graph, but its outgoing references are
/// not followed during mark. Masking with [`ResourceType::MAX`] recovers the
/// base type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceType(pub u8);

impl ResourceType {
    pub const CONTENT: ResourceType = ResourceType(0x01);
    pub const SNAPSHOT: ResourceType = ResourceType(0x02);
    pub const LEASE: ResourceType = ResourceType(0x03);
    pub const INGEST: ResourceType = ResourceType(0x04);

    /// Mask recovering the base type from a flat variant.
    pub const MAX: u8 = 0x1F;

    /// High bit marking a flat reference.
    pub const FLAT_BIT: u8 = 0x20;

    /// First tag available to registered collectors.
    pub const PLUGIN_MIN: u8 = 0x10;

    /// The flat variant of this type.
    pub fn flat(self) -> Self {
        Self(self.0 | Self::FLAT_BIT)
    }

    /// The base type with the flat bit stripped.
    pub fn base(self) -> Self {
        Self(self.0 & Self::MAX)
    }

    /// Whether this is a flat variant.
    pub fn is_flat(self) -> bool {
        self.0 & Self::FLAT_BIT != 0
    }
}

/// A collectible object: `(type, namespace, key)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Node {
    pub resource: ResourceType,
    pub namespace: String,
    pub key: String,
}

impl Node {
    pub fn new(
        resource: ResourceType,
        namespace: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            resource,
            namespace: namespace.into(),
            key: key.into(),
        }
    }

    /// The same node with the flat bit stripped from its type.
    pub fn normalize(&self) -> Node {
        Node {
            resource: self.resource.base(),
            namespace: self.namespace.clone(),
            key: self.key.clone(),
        }
    }
}

/// Durations of the collection phases.
#[derive(Clone, Copy, Debug, Default)]
pub struct GcStats {
    /// Root scan, mark, and sweep inside the metadata database.
    pub meta: Duration,
    /// Post-sweep blob filesystem cleanup.
    pub content: Duration,
}

impl GcStats {
    /// Time the collector held the exclusive write lock.
    pub fn elapsed(&self) -> Duration {
        self.meta
    }
}

/// Tricolor mark: returns the set of reachable nodes, normalized.
///
/// The grey worklist makes cycles safe; the seen set keeps flat and
/// non-flat visits distinct so a node first reached through a flat edge is
/// still expanded when reached through a normal one. The black set is
/// normalized, which is what sweep compares against.
pub(crate) fn tricolor(
    roots: Vec<Node>,
    mut refs: impl FnMut(&Node) -> MetadataResult<Vec<Node>>,
) -> MetadataResult<HashSet<Node>> {
    let mut grays = roots;
    let mut seen: HashSet<Node> = HashSet::new();
    let mut reachable: HashSet<Node> = HashSet::new();

    while let Some(node) = grays.pop() {
        if seen.contains(&node) {
            continue;
        }
        for successor in refs(&node)? {
            if !seen.contains(&successor) {
                grays.push(successor);
            }
        }
        reachable.insert(node.normalize());
        seen.insert(node);
    }

    Ok(reachable)
}

/// One collection pass: registered collector contexts plus the label kinds
/// that resolve `gc.ref.*` references to node types.
pub(crate) struct GcContext {
    contexts: BTreeMap<u8, Box<dyn CollectionContext>>,
    ref_kinds: Vec<(String, ResourceType)>,
}

impl GcContext {
    pub(crate) fn start(
        collectors: &BTreeMap<u8, std::sync::Arc<dyn crate::collector::Collector>>,
    ) -> MetadataResult<Self> {
        let mut ref_kinds = vec![("content".to_string(), ResourceType::CONTENT)];
        let mut contexts: BTreeMap<u8, Box<dyn CollectionContext>> = BTreeMap::new();
        for (&tag, collector) in collectors {
            let ctx = match collector.start_collection() {
                Ok(ctx) => ctx,
                Err(e) => {
                    // Unwind the contexts already started.
                    for started in contexts.values() {
                        started.cancel();
                    }
                    return Err(e);
                }
            };
            ref_kinds.push((ctx.reference_label().to_string(), ResourceType(tag)));
            contexts.insert(tag, ctx);
        }
        Ok(Self {
            contexts,
            ref_kinds,
        })
    }

    pub(crate) fn cancel_all(&self) {
        for ctx in self.contexts.values() {
            ctx.cancel();
        }
    }

    pub(crate) fn finish_all(&self) -> MetadataResult<()> {
        for ctx in self.contexts.values() {
            ctx.finish()?;
        }
        Ok(())
    }

    /// Yield every root node visible in the snapshot.
    pub(crate) fn scan_roots(
        &self,
        tx: &ReadTransaction,
        f: &mut dyn FnMut(Node),
    ) -> MetadataResult<()> {
        let now = OffsetDateTime::now_utc();

        for ns in list_namespaces(tx)? {
            let ns = ns.as_str();

            let leases = tx.open_table(LEASES)?;
            for entry in leases.range((ns, "")..)? {
                let (k, v) = entry?;
                let (kns, id) = k.value();
                if kns != ns {
                    break;
                }
                let record: LeaseRecord = decode(v.value())?;
                if lease_expired(ns, id, &record.labels, now) {
                    continue;
                }
                f(Node::new(ResourceType::LEASE, ns, id));

                let flat = record.labels.contains_key(GC_FLAT);
                for ctx in self.contexts.values() {
                    ctx.leased(ns, id, &mut |node| {
                        f(demote(node, flat));
                    });
                }
            }
            drop(leases);

            let images = tx.open_table(IMAGES)?;
            for entry in images.range((ns, "")..)? {
                let (k, v) = entry?;
                if k.value().0 != ns {
                    break;
                }
                let record: ImageRecord = decode(v.value())?;
                f(Node::new(
                    ResourceType::CONTENT,
                    ns,
                    record.target.digest.as_str(),
                ));
                self.send_label_refs(ns, &record.labels, f);
            }
            drop(images);

            let blobs = tx.open_table(CONTENT_BLOBS)?;
            for entry in blobs.range((ns, "")..)? {
                let (k, v) = entry?;
                let (kns, digest) = k.value();
                if kns != ns {
                    break;
                }
                let record: BlobRecord = decode(v.value())?;
                if record.labels.contains_key(GC_ROOT) {
                    f(Node::new(ResourceType::CONTENT, ns, digest));
                }
            }
            drop(blobs);

            let ingests = tx.open_table(CONTENT_INGESTS)?;
            for entry in ingests.range((ns, "")..)? {
                let (k, v) = entry?;
                let (kns, reference) = k.value();
                if kns != ns {
                    break;
                }
                let record: IngestRecord = decode(v.value())?;
                // An ingest with no recorded expiration is treated as
                // already expired; it survives only through a live lease.
                if record.expires_at.is_some_and(|at| at > now) {
                    f(Node::new(ResourceType::INGEST, ns, reference));
                }
            }
            drop(ingests);

            for ctx in self.contexts.values() {
                ctx.active(ns, f);
            }
        }

        Ok(())
    }

    /// Yield the outgoing references of `node`.
    pub(crate) fn references(
        &self,
        tx: &ReadTransaction,
        node: &Node,
        f: &mut dyn FnMut(Node),
    ) -> MetadataResult<()> {
        let ns = node.namespace.as_str();
        match node.resource {
            ResourceType::CONTENT => {
                let blobs = tx.open_table(CONTENT_BLOBS)?;
                let Some(v) = blobs.get((ns, node.key.as_str()))? else {
                    // Dead edge; the target was never committed.
                    return Ok(());
                };
                let record: BlobRecord = decode(v.value())?;
                drop(v);
                self.send_label_refs(ns, &record.labels, f);
            }
            ResourceType::INGEST => {
                let ingests = tx.open_table(CONTENT_INGESTS)?;
                let Some(v) = ingests.get((ns, node.key.as_str()))? else {
                    return Ok(());
                };
                let record: IngestRecord = decode(v.value())?;
                if let Some(expected) = record.expected {
                    f(Node::new(ResourceType::CONTENT, ns, expected.as_str()));
                }
            }
            ResourceType::LEASE => {
                let leases = tx.open_table(LEASES)?;
                let Some(v) = leases.get((ns, node.key.as_str()))? else {
                    return Ok(());
                };
                let record: LeaseRecord = decode(v.value())?;
                drop(v);
                drop(leases);
                let flat = record.labels.contains_key(GC_FLAT);

                let resources = tx.open_table(LEASE_RESOURCES)?;
                for entry in resources.range((ns, node.key.as_str(), "", "")..)? {
                    let (k, _) = entry?;
                    let (kns, klease, kind, key) = k.value();
                    if kns != ns || klease != node.key {
                        break;
                    }
                    match resource_edge(ns, kind, key, flat) {
                        Some(edge) => f(edge),
                        None => warn!(kind, key, "skipping unknown lease resource kind"),
                    }
                }
            }
            // Flat variants and snapshots contribute no successors; plugin
            // nodes are leaves, referenced only through labels.
            _ => {}
        }
        Ok(())
    }

    /// Yield every collectible node. Images are not collectible; they are
    /// removed only by explicit store operations.
    pub(crate) fn scan_all(
        &self,
        tx: &WriteTransaction,
        f: &mut dyn FnMut(Node),
    ) -> MetadataResult<()> {
        for ns in list_namespaces_mut(tx)? {
            let ns = ns.as_str();

            let leases = tx.open_table(LEASES)?;
            for entry in leases.range((ns, "")..)? {
                let (k, _) = entry?;
                let (kns, id) = k.value();
                if kns != ns {
                    break;
                }
                f(Node::new(ResourceType::LEASE, ns, id));
            }
            drop(leases);

            let ingests = tx.open_table(CONTENT_INGESTS)?;
            for entry in ingests.range((ns, "")..)? {
                let (k, _) = entry?;
                let (kns, reference) = k.value();
                if kns != ns {
                    break;
                }
                f(Node::new(ResourceType::INGEST, ns, reference));
            }
            drop(ingests);

            let blobs = tx.open_table(CONTENT_BLOBS)?;
            for entry in blobs.range((ns, "")..)? {
                let (k, _) = entry?;
                let (kns, digest) = k.value();
                if kns != ns {
                    break;
                }
                f(Node::new(ResourceType::CONTENT, ns, digest));
            }
            drop(blobs);
        }

        for ctx in self.contexts.values() {
            ctx.all(f);
        }
        Ok(())
    }

    /// Remove one unreachable node. Returns whether the removal touched
    /// committed content or ingest state.
    pub(crate) fn remove(&self, tx: &WriteTransaction, node: &Node) -> MetadataResult<bool> {
        let ns = node.namespace.as_str();
        match node.resource.base() {
            ResourceType::CONTENT => {
                let mut blobs = tx.open_table(CONTENT_BLOBS)?;
                blobs.remove((ns, node.key.as_str()))?;
                Ok(true)
            }
            ResourceType::INGEST => {
                let mut ingests = tx.open_table(CONTENT_INGESTS)?;
                ingests.remove((ns, node.key.as_str()))?;
                Ok(true)
            }
            ResourceType::LEASE => {
                let mut leases = tx.open_table(LEASES)?;
                leases.remove((ns, node.key.as_str()))?;
                drop(leases);

                let mut resources = tx.open_table(LEASE_RESOURCES)?;
                let mut edges = Vec::new();
                for entry in resources.range((ns, node.key.as_str(), "", "")..)? {
                    let (k, _) = entry?;
                    let (kns, klease, kind, key) = k.value();
                    if kns != ns || klease != node.key {
                        break;
                    }
                    edges.push((kind.to_string(), key.to_string()));
                }
                for (kind, key) in edges {
                    resources.remove((ns, node.key.as_str(), kind.as_str(), key.as_str()))?;
                }
                Ok(false)
            }
            ResourceType::SNAPSHOT => Ok(false),
            other => match self.contexts.get(&other.0) {
                Some(ctx) => {
                    ctx.remove(node)?;
                    Ok(false)
                }
                None => Err(MetadataError::Internal(format!(
                    "no collector for resource type {:#x}",
                    other.0
                ))),
            },
        }
    }

    fn send_label_refs(
        &self,
        ns: &str,
        labels: &BTreeMap<String, String>,
        f: &mut dyn FnMut(Node),
    ) {
        for (key, value) in labels {
            let Some(rest) = key.strip_prefix(GC_REF_PREFIX) else {
                continue;
            };
            if let Some(node) = self.label_ref_node(ns, rest, value) {
                f(node);
            }
        }
    }

    /// Resolve a `gc.ref.` label remainder to a node.
    ///
    /// The remainder must be a known kind, optionally followed by a `.` or
    /// `/` separated suffix (an indexed child slot). `content<garbage>` with
    /// no separator names no kind and is ignored.
    fn label_ref_node(&self, ns: &str, rest: &str, value: &str) -> Option<Node> {
        if let Some(snap) = rest.strip_prefix("snapshot.") {
            let snapshotter = snap.split(['.', '/']).next().unwrap_or(snap);
            if snapshotter.is_empty() {
                return None;
            }
            return Some(Node::new(
                ResourceType::SNAPSHOT,
                ns,
                format!("{snapshotter}/{value}"),
            ));
        }
        for (kind, resource) in &self.ref_kinds {
            if kind_matches(rest, kind) {
                return Some(Node::new(*resource, ns, value));
            }
        }
        None
    }
}

fn kind_matches(rest: &str, kind: &str) -> bool {
    if rest == kind {
        return true;
    }
    rest.len() > kind.len()
        && rest.starts_with(kind)
        && matches!(rest.as_bytes()[kind.len()], b'.' | b'/')
}

fn demote(node: Node, flat: bool) -> Node {
    if flat {
        Node {
            resource: node.resource.flat(),
            ..node
        }
    } else {
        node
    }
}

/// The typed edge for a lease resource entry.
fn resource_edge(ns: &str, kind: &str, key: &str, flat: bool) -> Option<Node> {
    if kind == "content" {
        let resource = if flat {
            ResourceType::CONTENT.flat()
        } else {
            ResourceType::CONTENT
        };
        return Some(Node::new(resource, ns, key));
    }
    if kind == "ingest" {
        // Ingests have no flat variant; their expected digest still marks.
        return Some(Node::new(ResourceType::INGEST, ns, key));
    }
    if let Some(snapshotter) = kind.strip_prefix("snapshots/") {
        if snapshotter.is_empty() {
            return None;
        }
        let resource = if flat {
            ResourceType::SNAPSHOT.flat()
        } else {
            ResourceType::SNAPSHOT
        };
        return Some(Node::new(resource, ns, format!("{snapshotter}/{key}")));
    }
    None
}

fn lease_expired(
    ns: &str,
    id: &str,
    labels: &BTreeMap<String, String>,
    now: OffsetDateTime,
) -> bool {
    let Some(raw) = labels.get(GC_EXPIRE) else {
        return false;
    };
    match parse_timestamp(raw) {
        Ok(at) => at <= now,
        Err(_) => {
            warn!(namespace = ns, lease = id, value = %raw, "ignoring invalid lease expiration");
            false
        }
    }
}

fn list_namespaces(tx: &ReadTransaction) -> MetadataResult<Vec<String>> {
    let table = tx.open_table(NAMESPACES)?;
    let mut namespaces = Vec::new();
    for entry in table.iter()? {
        let (k, _) = entry?;
        namespaces.push(k.value().to_string());
    }
    Ok(namespaces)
}

fn list_namespaces_mut(tx: &WriteTransaction) -> MetadataResult<Vec<String>> {
    let table = tx.open_table(NAMESPACES)?;
    let mut namespaces = Vec::new();
    for entry in table.iter()? {
        let (k, _) = entry?;
        namespaces.push(k.value().to_string());
    }
    Ok(namespaces)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_mask() {
        for ty in [
            ResourceType::CONTENT,
            ResourceType::SNAPSHOT,
            ResourceType::LEASE,
            ResourceType::INGEST,
            ResourceType(ResourceType::PLUGIN_MIN),
            ResourceType(ResourceType::MAX),
        ] {
            assert_ne!(ty.flat(), ty);
            assert_eq!(ty.flat().base(), ty);
            assert_eq!(ty.flat().0 & ResourceType::MAX, ty.0);
            assert!(ty.flat().is_flat());
            assert!(!ty.is_flat());
        }
    }

    #[test]
    fn test_kind_matches_requires_separator() {
        assert!(kind_matches("content", "content"));
        assert!(kind_matches("content.0", "content"));
        assert!(kind_matches("content.anything-1", "content"));
        assert!(kind_matches("content/anything-2", "content"));
        assert!(!kind_matches("contentbad", "content"));
        assert!(!kind_matches("conten", "content"));
    }

    #[test]
    fn test_tricolor_marks_reachable_and_handles_cycles() {
        let a = Node::new(ResourceType::CONTENT, "ns", "a");
        let b = Node::new(ResourceType::CONTENT, "ns", "b");
        let c = Node::new(ResourceType::CONTENT, "ns", "c");
        let orphan = Node::new(ResourceType::CONTENT, "ns", "orphan");

        let edges = move |n: &Node| -> MetadataResult<Vec<Node>> {
            // a -> b -> c -> a cycle; orphan unreferenced.
            Ok(match n.key.as_str() {
                "a" => vec![Node::new(ResourceType::CONTENT, "ns", "b")],
                "b" => vec![Node::new(ResourceType::CONTENT, "ns", "c")],
                "c" => vec![Node::new(ResourceType::CONTENT, "ns", "a")],
                _ => vec![],
            })
        };

        let marked = tricolor(vec![a.clone()], edges).unwrap();
        assert!(marked.contains(&a));
        assert!(marked.contains(&b));
        assert!(marked.contains(&c));
        assert!(!marked.contains(&orphan));
    }

    #[test]
    fn test_tricolor_flat_marks_without_recursing() {
        let flat_c = Node::new(ResourceType::CONTENT.flat(), "ns", "c");
        let edges = |n: &Node| -> MetadataResult<Vec<Node>> {
            // Only the non-flat variant would expose the edge c -> d.
            if n.resource == ResourceType::CONTENT && n.key == "c" {
                Ok(vec![Node::new(ResourceType::CONTENT, "ns", "d")])
            } else {
                Ok(vec![])
            }
        };

        let marked = tricolor(vec![flat_c], edges).unwrap();
        // The black set is normalized: c is reachable under its base type.
        assert!(marked.contains(&Node::new(ResourceType::CONTENT, "ns", "c")));
        assert!(!marked.contains(&Node::new(ResourceType::CONTENT, "ns", "d")));
    }

    #[test]
    fn test_tricolor_flat_then_normal_still_expands() {
        let flat_c = Node::new(ResourceType::CONTENT.flat(), "ns", "c");
        let normal_c = Node::new(ResourceType::CONTENT, "ns", "c");
        let edges = |n: &Node| -> MetadataResult<Vec<Node>> {
            if n.resource == ResourceType::CONTENT && n.key == "c" {
                Ok(vec![Node::new(ResourceType::CONTENT, "ns", "d")])
            } else {
                Ok(vec![])
            }
        };

        let marked = tricolor(vec![flat_c, normal_c], edges).unwrap();
        assert!(marked.contains(&Node::new(ResourceType::CONTENT, "ns", "d")));
    }

    #[test]
    fn test_resource_edge_kinds() {
        let edge = resource_edge("ns", "content", "sha256:aa", false).unwrap();
        assert_eq!(edge.resource, ResourceType::CONTENT);

        let edge = resource_edge("ns", "content", "sha256:aa", true).unwrap();
        assert_eq!(edge.resource, ResourceType::CONTENT.flat());

        let edge = resource_edge("ns", "ingest", "ref-1", true).unwrap();
        assert_eq!(edge.resource, ResourceType::INGEST);

        let edge = resource_edge("ns", "snapshots/overlay", "snap-1", false).unwrap();
        assert_eq!(edge.resource, ResourceType::SNAPSHOT);
        assert_eq!(edge.key, "overlay/snap-1");

        assert!(resource_edge("ns", "snapshots/", "snap-1", false).is_none());
        assert!(resource_edge("ns", "bogus", "x", false).is_none());
    }
}
