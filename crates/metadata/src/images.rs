//! Image store.

use crate::db::{Database, DeleteOptions, ensure_namespace};
use crate::error::{MetadataError, MetadataResult};
use crate::records::{ImageRecord, decode, encode};
use crate::tables::IMAGES;
use larder_core::cancel::CancelToken;
use larder_core::filter::{Adaptor, FilterList, check_map};
use larder_core::image::Image;
use larder_core::{digest::Digest, labels};
use redb::ReadableTable;
use time::OffsetDateTime;

/// Create/get/update/list/delete for images.
///
/// Images map a name to a target descriptor plus labels; they are roots for
/// the collector and are never collected themselves.
pub struct ImageStore<'a> {
    db: &'a Database,
}

impl<'a> ImageStore<'a> {
    pub(crate) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Create an image; fails `AlreadyExists` when the name is taken.
    pub fn create(&self, namespace: &str, mut image: Image) -> MetadataResult<Image> {
        validate_image(&image)?;
        self.db.update(|tx| {
            ensure_namespace(tx, namespace)?;
            let mut images = tx.open_table(IMAGES)?;
            if images.get((namespace, image.name.as_str()))?.is_some() {
                return Err(MetadataError::AlreadyExists(format!(
                    "image {}",
                    image.name
                )));
            }
            let now = OffsetDateTime::now_utc();
            image.created_at = now;
            image.updated_at = now;
            let record = ImageRecord {
                target: image.target.clone(),
                labels: image.labels.clone(),
                created_at: now,
                updated_at: now,
            };
            images.insert((namespace, image.name.as_str()), encode(&record)?.as_slice())?;
            Ok(image)
        })
    }

    /// Get an image by name.
    pub fn get(&self, namespace: &str, name: &str) -> MetadataResult<Image> {
        self.db.view(|tx| {
            let images = tx.open_table(IMAGES)?;
            let Some(v) = images.get((namespace, name))? else {
                return Err(MetadataError::NotFound(format!("image {name}")));
            };
            let record: ImageRecord = decode(v.value())?;
            Ok(materialize(name, record))
        })
    }

    /// Update an image.
    ///
    /// With empty `fieldpaths` the target, labels, and annotations are
    /// replaced wholesale; otherwise mutation is restricted to the named
    /// paths (`target`, `labels`, `labels.<k>`, `annotations.<k>`). The name
    /// and creation time are immutable. Changing the target digest counts
    /// as a removal of the previous target for dirty tracking.
    pub fn update(
        &self,
        namespace: &str,
        image: Image,
        fieldpaths: &[&str],
    ) -> MetadataResult<Image> {
        let mut target_changed = false;
        let updated = self.db.update(|tx| {
            let mut images = tx.open_table(IMAGES)?;
            let Some(v) = images.get((namespace, image.name.as_str()))? else {
                return Err(MetadataError::NotFound(format!("image {}", image.name)));
            };
            let mut record: ImageRecord = decode(v.value())?;
            drop(v);
            let previous_digest = record.target.digest.clone();

            if fieldpaths.is_empty() {
                record.target = image.target.clone();
                record.labels = image.labels.clone();
            } else {
                for path in fieldpaths {
                    match *path {
                        "target" => record.target = image.target.clone(),
                        "labels" => record.labels = image.labels.clone(),
                        _ => {
                            if let Some(key) = path.strip_prefix("labels.") {
                                match image.labels.get(key) {
                                    Some(value) => {
                                        record.labels.insert(key.to_string(), value.clone());
                                    }
                                    None => {
                                        record.labels.remove(key);
                                    }
                                }
                            } else if let Some(key) = path.strip_prefix("annotations.") {
                                match image.target.annotations.get(key) {
                                    Some(value) => {
                                        record
                                            .target
                                            .annotations
                                            .insert(key.to_string(), value.clone());
                                    }
                                    None => {
                                        record.target.annotations.remove(key);
                                    }
                                }
                            } else {
                                return Err(MetadataError::InvalidArgument(format!(
                                    "cannot update field {path}"
                                )));
                            }
                        }
                    }
                }
            }

            Digest::parse(record.target.digest.as_str())?;
            labels::validate(&record.labels)?;
            target_changed = previous_digest != record.target.digest;

            record.updated_at = OffsetDateTime::now_utc();
            images.insert((namespace, image.name.as_str()), encode(&record)?.as_slice())?;
            Ok(materialize(&image.name, record))
        })?;

        if target_changed {
            self.db.mark_dirty();
        }
        Ok(updated)
    }

    /// List images matching any of `filters`; empty filters list all.
    pub fn list(&self, namespace: &str, filters: &[&str]) -> MetadataResult<Vec<Image>> {
        let filters = FilterList::parse(filters)?;
        self.db.view(|tx| {
            let images = tx.open_table(IMAGES)?;
            let mut out = Vec::new();
            for entry in images.range((namespace, "")..)? {
                let (k, v) = entry?;
                let (ns, name) = k.value();
                if ns != namespace {
                    break;
                }
                let record: ImageRecord = decode(v.value())?;
                let image = materialize(name, record);
                if filters.matches(&ImageAdaptor(&image)) {
                    out.push(image);
                }
            }
            Ok(out)
        })
    }

    /// Delete an image; with `sync`, collect before returning.
    pub fn delete(
        &self,
        namespace: &str,
        name: &str,
        options: DeleteOptions,
    ) -> MetadataResult<()> {
        self.db.update(|tx| {
            let mut images = tx.open_table(IMAGES)?;
            if images.remove((namespace, name))?.is_none() {
                return Err(MetadataError::NotFound(format!("image {name}")));
            }
            Ok(())
        })?;
        self.db.mark_dirty();

        if options.sync {
            self.db.garbage_collect(&CancelToken::new())?;
        }
        Ok(())
    }
}

fn validate_image(image: &Image) -> MetadataResult<()> {
    if image.name.is_empty() {
        return Err(MetadataError::InvalidArgument(
            "image name is empty".to_string(),
        ));
    }
    Digest::parse(image.target.digest.as_str())?;
    labels::validate(&image.labels)?;
    Ok(())
}

fn materialize(name: &str, record: ImageRecord) -> Image {
    Image {
        name: name.to_string(),
        target: record.target,
        labels: record.labels,
        created_at: record.created_at,
        updated_at: record.updated_at,
    }
}

/// Field-path adaptor for image filters.
struct ImageAdaptor<'a>(&'a Image);

impl Adaptor for ImageAdaptor<'_> {
    fn field(&self, fieldpath: &[&str]) -> Option<String> {
        match fieldpath {
            [] => None,
            ["name", ..] => Some(self.0.name.clone()),
            ["target", "digest"] => Some(self.0.target.digest.to_string()),
            ["target", "mediatype"] => Some(self.0.target.media_type.clone()),
            ["target", "size"] => Some(self.0.target.size.to_string()),
            ["labels", rest @ ..] => check_map(rest, &self.0.labels),
            ["annotations", rest @ ..] => check_map(rest, &self.0.target.annotations),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbOptions;
    use larder_core::descriptor::Descriptor;

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path(), DbOptions::default()).unwrap();
        (dir, db)
    }

    fn image(name: &str, payload: &[u8]) -> Image {
        Image::new(
            name,
            Descriptor::new(
                "application/vnd.oci.image.manifest.v1+json",
                Digest::from_bytes(payload),
                payload.len() as u64,
            ),
        )
    }

    #[test]
    fn test_create_get_roundtrip() {
        let (_dir, db) = test_db();
        let store = db.image_store();

        let created = store
            .create("ns", image("img1", b"m1").with_label("tier", "base"))
            .unwrap();
        assert!(created.updated_at >= created.created_at);

        let got = store.get("ns", "img1").unwrap();
        assert_eq!(got, created);

        let err = store.get("ns", "missing").unwrap_err();
        assert!(err.is_not_found());
        let err = store.get("other-ns", "img1").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_create_validates_and_rejects_duplicates() {
        let (_dir, db) = test_db();
        let store = db.image_store();

        let mut nameless = image("x", b"m");
        nameless.name = String::new();
        assert!(store.create("ns", nameless).unwrap_err().is_invalid_argument());

        store.create("ns", image("img1", b"m1")).unwrap();
        let err = store.create("ns", image("img1", b"m2")).unwrap_err();
        assert!(err.is_already_exists());

        // Same name in another namespace is fine.
        store.create("ns2", image("img1", b"m1")).unwrap();
    }

    #[test]
    fn test_update_fieldpaths() {
        let (_dir, db) = test_db();
        let store = db.image_store();
        store
            .create("ns", image("img1", b"m1").with_label("keep", "old"))
            .unwrap();

        // Restricted update touches only the named label.
        let patch = image("img1", b"m-ignored").with_label("extra", "new");
        let updated = store.update("ns", patch, &["labels.extra"]).unwrap();
        assert_eq!(updated.labels.get("keep").map(String::as_str), Some("old"));
        assert_eq!(updated.labels.get("extra").map(String::as_str), Some("new"));
        assert_eq!(updated.target.digest, Digest::from_bytes(b"m1"));

        // A patch lacking the named label removes it.
        let patch = image("img1", b"m-ignored");
        let updated = store.update("ns", patch, &["labels.extra"]).unwrap();
        assert!(!updated.labels.contains_key("extra"));

        // Full replace swaps the target and flags dirty.
        assert!(!db.is_dirty());
        let replaced = store.update("ns", image("img1", b"m2"), &[]).unwrap();
        assert_eq!(replaced.target.digest, Digest::from_bytes(b"m2"));
        assert!(db.is_dirty());

        let err = store
            .update("ns", image("img1", b"m2"), &["name"])
            .unwrap_err();
        assert!(err.is_invalid_argument());

        let err = store
            .update("ns", image("ghost", b"m"), &[])
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_list_filters() {
        let (_dir, db) = test_db();
        let store = db.image_store();
        store
            .create("ns", image("app/web:v1", b"web").with_label("tier", "web"))
            .unwrap();
        store
            .create("ns", image("app/db:v1", b"db").with_label("tier", "db"))
            .unwrap();

        let all = store.list("ns", &[]).unwrap();
        assert_eq!(all.len(), 2);

        let web = store.list("ns", &["labels.tier==web"]).unwrap();
        assert_eq!(web.len(), 1);
        assert_eq!(web[0].name, "app/web:v1");

        let by_name = store.list("ns", &["name~^app/"]).unwrap();
        assert_eq!(by_name.len(), 2);

        let union = store
            .list("ns", &["labels.tier==web", "labels.tier==db"])
            .unwrap();
        assert_eq!(union.len(), 2);

        let digest_filter = format!("target.digest=={}", Digest::from_bytes(b"db"));
        let by_digest = store.list("ns", &[digest_filter.as_str()]).unwrap();
        assert_eq!(by_digest.len(), 1);

        assert!(store.list("ns", &["bogus=="]).is_err());
    }

    #[test]
    fn test_delete_marks_dirty() {
        let (_dir, db) = test_db();
        let store = db.image_store();
        store.create("ns", image("img1", b"m1")).unwrap();

        assert!(!db.is_dirty());
        store.delete("ns", "img1", DeleteOptions::default()).unwrap();
        assert!(db.is_dirty());
        assert!(store.get("ns", "img1").unwrap_err().is_not_found());
        assert!(
            store
                .delete("ns", "img1", DeleteOptions::default())
                .unwrap_err()
                .is_not_found()
        );
    }
}
