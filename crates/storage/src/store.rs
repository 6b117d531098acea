//! Content-addressed filesystem blob store.
//!
//! Committed blobs live under `blobs/<algorithm>/<hex>` with mode 0600.
//! In-progress ingests live under `ingests/<id>/`, where `<id>` is the
//! sha256 of the caller's ref (refs may contain path separators); each
//! ingest directory holds the partial `data` payload plus sidecar files
//! recording the raw ref, start time, declared total, and expected digest.

use crate::error::{StorageError, StorageResult};
use crate::writer::BlobWriter;
use larder_core::content::{Info, Status};
use larder_core::digest::{Digest, Digester};
use larder_core::labels::{format_timestamp, parse_timestamp};
use sha2::{Digest as _, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::os::unix::fs::{FileExt, PermissionsExt};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{instrument, warn};

const BLOB_MODE: u32 = 0o600;
const DIR_MODE: u32 = 0o700;

/// Options for opening or resuming an ingest.
#[derive(Clone, Debug, Default)]
pub struct WriterOptions {
    /// Caller-chosen ingest reference; reopening the same ref resumes it.
    pub reference: String,
    /// Declared total size; 0 when unknown.
    pub total: u64,
    /// Expected digest, verified at commit.
    pub expected: Option<Digest>,
}

/// A content-addressed blob store rooted at a directory.
#[derive(Debug)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open a store, creating its directory layout as needed.
    pub fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [root.join("blobs").join("sha256"), root.join("ingests")] {
            fs::create_dir_all(&dir)?;
            fs::set_permissions(&dir, fs::Permissions::from_mode(DIR_MODE))?;
        }
        Ok(Self { root })
    }

    /// The store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root
            .join("blobs")
            .join(digest.algorithm())
            .join(digest.hex())
    }

    fn ingest_dir(&self, reference: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(reference.as_bytes());
        self.root.join("ingests").join(format!("{:x}", hasher.finalize()))
    }

    /// Metadata for a committed blob; `NotFound` when absent.
    #[instrument(skip(self))]
    pub fn info(&self, digest: &Digest) -> StorageResult<Info> {
        let meta = fs::metadata(self.blob_path(digest)).map_err(|e| not_found(e, digest))?;
        let modified = file_time(&meta);
        Ok(Info {
            digest: digest.clone(),
            size: meta.len(),
            labels: BTreeMap::new(),
            created_at: modified,
            updated_at: modified,
        })
    }

    /// Positional reader over a committed blob; `NotFound` when absent.
    pub fn reader_at(&self, digest: &Digest) -> StorageResult<BlobReader> {
        let path = self.blob_path(digest);
        let file = File::open(&path).map_err(|e| not_found(e, digest))?;
        let size = file.metadata()?.len();
        Ok(BlobReader { file, size })
    }

    /// Open or resume the ingest named by `opts.reference`.
    ///
    /// Resuming rehashes the partial payload to recover digest state. When
    /// the expected digest is already committed, fails `AlreadyExists`.
    #[instrument(skip(self, opts), fields(reference = %opts.reference))]
    pub fn writer(&self, opts: WriterOptions) -> StorageResult<BlobWriter> {
        if opts.reference.is_empty() {
            return Err(StorageError::InvalidIngest("empty reference".to_string()));
        }
        if let Some(expected) = &opts.expected
            && self.blob_path(expected).exists()
        {
            return Err(StorageError::AlreadyExists(expected.to_string()));
        }

        let dir = self.ingest_dir(&opts.reference);
        let data_path = dir.join("data");
        let resuming = data_path.exists();
        if !resuming {
            fs::create_dir_all(&dir)?;
            fs::set_permissions(&dir, fs::Permissions::from_mode(DIR_MODE))?;
            let started = format_timestamp(OffsetDateTime::now_utc())?;
            fs::write(dir.join("ref"), &opts.reference)?;
            fs::write(dir.join("startedat"), &started)?;
            fs::write(dir.join("updatedat"), &started)?;
            fs::write(dir.join("total"), opts.total.to_string())?;
            if let Some(expected) = &opts.expected {
                fs::write(dir.join("expected"), expected.as_str())?;
            }
        }

        let mut digester = Digester::new();
        let mut offset = 0u64;
        if resuming {
            let mut partial = File::open(&data_path)?;
            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = partial.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                digester.update(&buf[..n]);
                offset += n as u64;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&data_path)?;
        let started_at = read_timestamp(&dir.join("startedat"))?;
        let total = if resuming {
            read_total(&dir.join("total"))
        } else {
            opts.total
        };

        Ok(BlobWriter::new(
            file,
            dir,
            self.root.join("blobs"),
            opts.reference,
            offset,
            total,
            opts.expected,
            digester,
            started_at,
        ))
    }

    /// Status of the ingest named `reference`; `NotFound` when absent.
    pub fn status(&self, reference: &str) -> StorageResult<Status> {
        let dir = self.ingest_dir(reference);
        if !dir.join("ref").exists() {
            return Err(StorageError::NotFound(format!("ingest {reference}")));
        }
        self.read_status(&dir)
    }

    /// Statuses of every in-progress ingest.
    pub fn list_statuses(&self) -> StorageResult<Vec<Status>> {
        let mut statuses = Vec::new();
        for entry in fs::read_dir(self.root.join("ingests"))? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match self.read_status(&entry.path()) {
                Ok(status) => statuses.push(status),
                // Torn down concurrently; nothing to report.
                Err(StorageError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        statuses.sort_by(|a, b| a.reference.cmp(&b.reference));
        Ok(statuses)
    }

    fn read_status(&self, dir: &Path) -> StorageResult<Status> {
        let reference = fs::read_to_string(dir.join("ref"))?;
        let started_at = read_timestamp(&dir.join("startedat"))?;
        let (offset, updated_at) = match fs::metadata(dir.join("data")) {
            Ok(meta) => (meta.len(), file_time(&meta)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (0, started_at),
            Err(e) => return Err(e.into()),
        };
        let expected = match fs::read_to_string(dir.join("expected")) {
            Ok(s) => Some(Digest::parse(s.trim())?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        Ok(Status {
            reference,
            offset,
            total: read_total(&dir.join("total")),
            expected,
            started_at,
            updated_at,
        })
    }

    /// Remove the ingest named `reference`; `NotFound` when absent.
    #[instrument(skip(self))]
    pub fn abort(&self, reference: &str) -> StorageResult<()> {
        let dir = self.ingest_dir(reference);
        if !dir.exists() {
            return Err(StorageError::NotFound(format!("ingest {reference}")));
        }
        fs::remove_dir_all(dir)?;
        Ok(())
    }

    /// Remove a committed blob payload; `NotFound` when absent.
    #[instrument(skip(self))]
    pub fn delete(&self, digest: &Digest) -> StorageResult<()> {
        fs::remove_file(self.blob_path(digest)).map_err(|e| not_found(e, digest))
    }

    /// Visit every committed blob.
    ///
    /// The callback may return an error to stop the walk early.
    pub fn walk(&self, mut f: impl FnMut(Info) -> StorageResult<()>) -> StorageResult<()> {
        for algo_entry in fs::read_dir(self.root.join("blobs"))? {
            let algo_entry = algo_entry?;
            if !algo_entry.file_type()?.is_dir() {
                continue;
            }
            let algorithm = algo_entry.file_name();
            for blob_entry in fs::read_dir(algo_entry.path())? {
                let blob_entry = blob_entry?;
                let name = blob_entry.file_name();
                let raw = format!(
                    "{}:{}",
                    algorithm.to_string_lossy(),
                    name.to_string_lossy()
                );
                let digest = match Digest::parse(&raw) {
                    Ok(d) => d,
                    Err(_) => {
                        warn!(path = %blob_entry.path().display(), "skipping non-blob file");
                        continue;
                    }
                };
                let meta = blob_entry.metadata()?;
                let modified = file_time(&meta);
                f(Info {
                    digest,
                    size: meta.len(),
                    labels: BTreeMap::new(),
                    created_at: modified,
                    updated_at: modified,
                })?;
            }
        }
        Ok(())
    }
}

/// A positional reader over a committed blob.
#[derive(Debug)]
pub struct BlobReader {
    file: File,
    size: u64,
}

impl BlobReader {
    /// Blob size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read at an absolute offset; short reads occur only at end of blob.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> StorageResult<usize> {
        Ok(self.file.read_at(buf, offset)?)
    }

    /// Read the entire blob.
    pub fn read_all(&self) -> StorageResult<Vec<u8>> {
        let mut out = vec![0u8; self.size as usize];
        let mut read = 0;
        while read < out.len() {
            let n = self.file.read_at(&mut out[read..], read as u64)?;
            if n == 0 {
                break;
            }
            read += n;
        }
        out.truncate(read);
        Ok(out)
    }
}

fn not_found(e: std::io::Error, digest: &Digest) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(digest.to_string())
    } else {
        StorageError::Io(e)
    }
}

fn file_time(meta: &fs::Metadata) -> OffsetDateTime {
    meta.modified()
        .map(OffsetDateTime::from)
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn read_timestamp(path: &Path) -> StorageResult<OffsetDateTime> {
    let raw = fs::read_to_string(path)?;
    Ok(parse_timestamp(raw.trim())?)
}

fn read_total(path: &Path) -> u64 {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}
