//! Lease store.

use crate::db::{Database, DeleteOptions, ensure_namespace};
use crate::error::{MetadataError, MetadataResult};
use crate::records::{LeaseRecord, decode, encode};
use crate::tables::{LEASE_RESOURCES, LEASES};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use larder_core::cancel::CancelToken;
use larder_core::digest::Digest;
use larder_core::filter::{Adaptor, FilterList, check_map};
use larder_core::labels::{GC_EXPIRE, GC_FLAT, format_timestamp, validate as validate_labels};
use larder_core::lease::{Lease, Resource};
use rand::Rng;
use redb::ReadableTable;
use std::collections::BTreeMap;
use time::{Duration, OffsetDateTime};

/// Options for creating a lease.
#[derive(Clone, Debug, Default)]
pub struct CreateOptions {
    /// Explicit id; a random 160-bit URL-safe token when absent.
    pub id: Option<String>,
    /// Initial labels.
    pub labels: BTreeMap<String, String>,
    /// Stop acting as a root this long after creation
    /// (`containerd.io/gc.expire`).
    pub expiration: Option<Duration>,
    /// Mark referenced resources without recursing through them, for this
    /// long after creation (`containerd.io/gc.flat`).
    pub flat: Option<Duration>,
}

/// Create/delete leases and manage their resource edges.
pub struct LeaseStore<'a> {
    db: &'a Database,
}

impl<'a> LeaseStore<'a> {
    pub(crate) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Create a lease; fails `AlreadyExists` on id collision.
    pub fn create(&self, namespace: &str, options: CreateOptions) -> MetadataResult<Lease> {
        let id = match options.id {
            Some(id) if id.is_empty() => {
                return Err(MetadataError::InvalidArgument(
                    "lease id is empty".to_string(),
                ));
            }
            Some(id) => id,
            None => random_id(),
        };

        let now = OffsetDateTime::now_utc();
        let mut labels = options.labels;
        if let Some(expiration) = options.expiration {
            labels.insert(GC_EXPIRE.to_string(), format_timestamp(now + expiration)?);
        }
        if let Some(flat) = options.flat {
            labels.insert(GC_FLAT.to_string(), format_timestamp(now + flat)?);
        }
        validate_labels(&labels)?;

        self.db.update(|tx| {
            ensure_namespace(tx, namespace)?;
            let mut leases = tx.open_table(LEASES)?;
            if leases.get((namespace, id.as_str()))?.is_some() {
                return Err(MetadataError::AlreadyExists(format!("lease {id}")));
            }
            let record = LeaseRecord {
                labels: labels.clone(),
                created_at: now,
            };
            leases.insert((namespace, id.as_str()), encode(&record)?.as_slice())?;
            Ok(Lease {
                id: id.clone(),
                labels,
                created_at: now,
            })
        })
    }

    /// Get a lease by id.
    pub fn get(&self, namespace: &str, id: &str) -> MetadataResult<Lease> {
        self.db.view(|tx| {
            let leases = tx.open_table(LEASES)?;
            let Some(v) = leases.get((namespace, id))? else {
                return Err(MetadataError::NotFound(format!("lease {id}")));
            };
            let record: LeaseRecord = decode(v.value())?;
            Ok(Lease {
                id: id.to_string(),
                labels: record.labels,
                created_at: record.created_at,
            })
        })
    }

    /// List leases matching any of `filters`; empty filters list all.
    pub fn list(&self, namespace: &str, filters: &[&str]) -> MetadataResult<Vec<Lease>> {
        let filters = FilterList::parse(filters)?;
        self.db.view(|tx| {
            let leases = tx.open_table(LEASES)?;
            let mut out = Vec::new();
            for entry in leases.range((namespace, "")..)? {
                let (k, v) = entry?;
                let (ns, id) = k.value();
                if ns != namespace {
                    break;
                }
                let record: LeaseRecord = decode(v.value())?;
                let lease = Lease {
                    id: id.to_string(),
                    labels: record.labels,
                    created_at: record.created_at,
                };
                if filters.matches(&LeaseAdaptor(&lease)) {
                    out.push(lease);
                }
            }
            Ok(out)
        })
    }

    /// Delete a lease and its resource edges; the referenced objects are
    /// untouched and live or die by the next collection.
    pub fn delete(
        &self,
        namespace: &str,
        id: &str,
        options: DeleteOptions,
    ) -> MetadataResult<()> {
        self.db.update(|tx| {
            let mut leases = tx.open_table(LEASES)?;
            if leases.remove((namespace, id))?.is_none() {
                return Err(MetadataError::NotFound(format!("lease {id}")));
            }
            drop(leases);

            let mut resources = tx.open_table(LEASE_RESOURCES)?;
            let mut edges = Vec::new();
            for entry in resources.range((namespace, id, "", "")..)? {
                let (k, _) = entry?;
                let (ns, lease, kind, key) = k.value();
                if ns != namespace || lease != id {
                    break;
                }
                edges.push((kind.to_string(), key.to_string()));
            }
            for (kind, key) in edges {
                resources.remove((namespace, id, kind.as_str(), key.as_str()))?;
            }
            Ok(())
        })?;
        self.db.mark_dirty();

        if options.sync {
            self.db.garbage_collect(&CancelToken::new())?;
        }
        Ok(())
    }

    /// Attach a resource to a lease; idempotent.
    pub fn add_resource(
        &self,
        namespace: &str,
        id: &str,
        resource: &Resource,
    ) -> MetadataResult<()> {
        validate_resource(resource)?;
        self.db.update(|tx| {
            let leases = tx.open_table(LEASES)?;
            if leases.get((namespace, id))?.is_none() {
                return Err(MetadataError::NotFound(format!("lease {id}")));
            }
            drop(leases);

            let mut resources = tx.open_table(LEASE_RESOURCES)?;
            resources.insert(
                (namespace, id, resource.kind.as_str(), resource.key.as_str()),
                (),
            )?;
            Ok(())
        })
    }

    /// Detach a resource from a lease; idempotent on the edge.
    pub fn delete_resource(
        &self,
        namespace: &str,
        id: &str,
        resource: &Resource,
    ) -> MetadataResult<()> {
        self.db.update(|tx| {
            let leases = tx.open_table(LEASES)?;
            if leases.get((namespace, id))?.is_none() {
                return Err(MetadataError::NotFound(format!("lease {id}")));
            }
            drop(leases);

            let mut resources = tx.open_table(LEASE_RESOURCES)?;
            resources.remove((namespace, id, resource.kind.as_str(), resource.key.as_str()))?;
            Ok(())
        })
    }

    /// The resources attached to a lease, sorted by kind then key.
    pub fn list_resources(&self, namespace: &str, id: &str) -> MetadataResult<Vec<Resource>> {
        self.db.view(|tx| {
            let leases = tx.open_table(LEASES)?;
            if leases.get((namespace, id))?.is_none() {
                return Err(MetadataError::NotFound(format!("lease {id}")));
            }

            let resources = tx.open_table(LEASE_RESOURCES)?;
            let mut out = Vec::new();
            for entry in resources.range((namespace, id, "", "")..)? {
                let (k, _) = entry?;
                let (ns, lease, kind, key) = k.value();
                if ns != namespace || lease != id {
                    break;
                }
                out.push(Resource::new(kind, key));
            }
            Ok(out)
        })
    }
}

/// A 160-bit random token, URL-safe base64 encoded.
fn random_id() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill(&mut bytes[..]);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn validate_resource(resource: &Resource) -> MetadataResult<()> {
    if resource.key.is_empty() {
        return Err(MetadataError::InvalidArgument(
            "resource key is empty".to_string(),
        ));
    }
    match resource.kind.as_str() {
        "content" => {
            Digest::parse(&resource.key)?;
            Ok(())
        }
        "ingest" => Ok(()),
        kind => match kind.strip_prefix("snapshots/") {
            Some(snapshotter) if !snapshotter.is_empty() => Ok(()),
            _ => Err(MetadataError::InvalidArgument(format!(
                "unsupported resource kind {kind}"
            ))),
        },
    }
}

/// Field-path adaptor for lease filters.
struct LeaseAdaptor<'a>(&'a Lease);

impl Adaptor for LeaseAdaptor<'_> {
    fn field(&self, fieldpath: &[&str]) -> Option<String> {
        match fieldpath {
            [] => None,
            ["id", ..] => Some(self.0.id.clone()),
            ["labels", rest @ ..] => check_map(rest, &self.0.labels),
            _ => None,
        }
    }
}
