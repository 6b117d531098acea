//! Pluggable collectors for externally managed resource kinds.
//!
//! A collector teaches the garbage collector about nodes it does not store
//! itself: how they are referenced from labels, which exist, which are
//! active roots, which are held by leases, and how to remove them. Built-in
//! content, ingest, and lease nodes are handled directly over the schema;
//! registered collectors participate on equal footing, dispatched by
//! resource type tag.

use crate::error::MetadataResult;
use crate::gc::Node;

/// A source of externally managed, collectible resources.
pub trait Collector: Send + Sync {
    /// Begin a collection pass, returning a context that is either
    /// `finish`ed on success or `cancel`led on failure.
    fn start_collection(&self) -> MetadataResult<Box<dyn CollectionContext>>;
}

/// One collection pass over an external resource kind.
pub trait CollectionContext {
    /// The label suffix (after `containerd.io/gc.ref.`) that encodes
    /// references to this kind.
    fn reference_label(&self) -> &str;

    /// Yield every node of this kind that currently exists.
    fn all(&self, f: &mut dyn FnMut(Node));

    /// Yield the nodes considered roots in `namespace`.
    fn active(&self, namespace: &str, f: &mut dyn FnMut(Node));

    /// Yield the nodes held by `lease` in `namespace`.
    fn leased(&self, namespace: &str, lease: &str, f: &mut dyn FnMut(Node));

    /// Delete a node that was found unreachable.
    fn remove(&self, node: &Node) -> MetadataResult<()>;

    /// Abort the pass; no removals from this pass should take effect.
    fn cancel(&self);

    /// Complete the pass.
    fn finish(&self) -> MetadataResult<()>;
}
