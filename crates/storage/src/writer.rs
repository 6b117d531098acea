//! Resumable ingest writer.

use crate::error::{StorageError, StorageResult};
use larder_core::content::Status;
use larder_core::digest::{Digest, Digester};
use std::fs::{self, File};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use time::OffsetDateTime;

/// A writer for one in-progress ingest.
///
/// Bytes append to the ingest's `data` file while an incremental digester
/// tracks the content hash. Dropping the writer keeps the partial state on
/// disk for a later resume; `commit` moves the payload to its
/// content-addressed location and removes the ingest directory.
pub struct BlobWriter {
    file: File,
    ingest_dir: PathBuf,
    blobs_dir: PathBuf,
    reference: String,
    offset: u64,
    total: u64,
    expected: Option<Digest>,
    digester: Digester,
    started_at: OffsetDateTime,
}

impl std::fmt::Debug for BlobWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobWriter")
            .field("ingest_dir", &self.ingest_dir)
            .field("blobs_dir", &self.blobs_dir)
            .field("reference", &self.reference)
            .field("offset", &self.offset)
            .field("total", &self.total)
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl BlobWriter {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        file: File,
        ingest_dir: PathBuf,
        blobs_dir: PathBuf,
        reference: String,
        offset: u64,
        total: u64,
        expected: Option<Digest>,
        digester: Digester,
        started_at: OffsetDateTime,
    ) -> Self {
        Self {
            file,
            ingest_dir,
            blobs_dir,
            reference,
            offset,
            total,
            expected,
            digester,
            started_at,
        }
    }

    /// Append data to the ingest.
    pub fn write(&mut self, data: &[u8]) -> StorageResult<()> {
        self.file.write_all(data)?;
        self.digester.update(data);
        self.offset += data.len() as u64;
        Ok(())
    }

    /// Discard written data and restart from the beginning.
    ///
    /// Only truncation to zero is supported; recovering digest state for an
    /// arbitrary prefix would require rehashing the payload.
    pub fn truncate(&mut self, size: u64) -> StorageResult<()> {
        if size != 0 {
            return Err(StorageError::InvalidIngest(format!(
                "can only truncate to 0, got {size}"
            )));
        }
        self.file.set_len(0)?;
        self.offset = 0;
        self.digester = Digester::new();
        Ok(())
    }

    /// Bytes written so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Digest of the bytes written so far.
    pub fn digest(&self) -> Digest {
        self.digester.current()
    }

    /// Current status of this ingest.
    pub fn status(&self) -> Status {
        Status {
            reference: self.reference.clone(),
            offset: self.offset,
            total: self.total,
            expected: self.expected.clone(),
            started_at: self.started_at,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    /// Finalize the ingest into a committed blob.
    ///
    /// Verifies the written size against `size` (when non-zero) and the
    /// computed digest against `expected` (or the digest declared at open).
    /// The payload is fsynced, locked down to mode 0600, and renamed into
    /// the content-addressed tree; the ingest directory is removed. When the
    /// blob already exists the ingest is discarded and `AlreadyExists` is
    /// returned, so racing ingests of identical content converge on the
    /// first finalizer's payload. Size and digest failures also discard the
    /// ingest; the bytes are known wrong and not worth resuming.
    pub fn commit(mut self, size: u64, expected: Option<&Digest>) -> StorageResult<Digest> {
        self.file.flush()?;
        self.file.sync_all()?;

        if size > 0 && size != self.offset {
            self.discard();
            return Err(StorageError::UnexpectedSize {
                expected: size,
                actual: self.offset,
            });
        }

        let digest = self.digester.current();
        if let Some(want) = expected.or(self.expected.as_ref())
            && *want != digest
        {
            self.discard();
            return Err(StorageError::DigestMismatch {
                expected: want.to_string(),
                actual: digest.to_string(),
            });
        }

        let target_dir = self.blobs_dir.join(digest.algorithm());
        fs::create_dir_all(&target_dir)?;
        let target = target_dir.join(digest.hex());
        if target.exists() {
            self.discard();
            return Err(StorageError::AlreadyExists(digest.to_string()));
        }

        let data_path = self.ingest_dir.join("data");
        fs::set_permissions(&data_path, fs::Permissions::from_mode(0o600))?;
        fs::rename(&data_path, &target)?;
        self.discard();
        Ok(digest)
    }

    fn discard(&self) {
        // Cleanup races with concurrent aborts are benign.
        let _ = fs::remove_dir_all(&self.ingest_dir);
    }
}
