use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::datastore::DatastoreAdapter;
use crate::error::RelayError;
use crate::store::SessionStore;
use crate::tag::TagGenerator;

struct BlobRecord {
    path: PathBuf,
    /// Bytes this record has charged against the store quota. May lag the
    /// actual file size while an upload is in flight; it is the amount given
    /// back on removal.
    reserved: u64,
}

struct SessionState {
    valid: bool,
    blobs: HashMap<u64, BlobRecord>,
}

/// One open logical context grouping a client's blob transfers.
///
/// A session owns a set of blob records (id to path plus reserved bytes) and
/// is optionally bound to a transaction. Sessions hold shared handles to the
/// store, the tag generator, the datastore adapter and the global blob id
/// counter instead of a reference back to their manager; disposal is driven
/// through [`SessionManager::dispose`](crate::manager::SessionManager::dispose).
///
/// All operations are thread-safe. The internal lock only ever covers the
/// in-memory blob table; file removal happens after it is dropped.
pub struct BlobSession {
    session_id: u64,
    transaction_id: Option<u64>,
    store: Arc<SessionStore>,
    tags: Arc<TagGenerator>,
    adapter: Arc<dyn DatastoreAdapter>,
    next_blob_id: Arc<AtomicU64>,
    state: Mutex<SessionState>,
}

impl BlobSession {
    pub(crate) fn new(
        session_id: u64,
        transaction_id: Option<u64>,
        store: Arc<SessionStore>,
        tags: Arc<TagGenerator>,
        adapter: Arc<dyn DatastoreAdapter>,
        next_blob_id: Arc<AtomicU64>,
    ) -> Self {
        Self {
            session_id,
            transaction_id,
            store,
            tags,
            adapter,
            next_blob_id,
            state: Mutex::new(SessionState {
                valid: true,
                blobs: HashMap::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.session_id
    }

    pub fn transaction_id(&self) -> Option<u64> {
        self.transaction_id
    }

    fn new_blob_id(&self) -> u64 {
        self.next_blob_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Registers an externally owned blob file with this session.
    ///
    /// The path is canonicalized and must exist. Externally owned files are
    /// not subject to quota accounting.
    pub fn add(&self, path: &Path) -> Result<u64, RelayError> {
        let path = std::fs::canonicalize(path)
            .map_err(|err| RelayError::NotFound(format!("{:?} does not exist - {}", path, err)))?;

        let mut state = self.state.lock().unwrap();
        state.ensure_valid()?;
        let blob_id = self.new_blob_id();
        state.blobs.insert(blob_id, BlobRecord { path, reserved: 0 });
        Ok(blob_id)
    }

    /// Allocates a blob id and a scratch file path for a fresh upload.
    ///
    /// Only the record is created; the file does not exist on disk yet.
    pub fn create_blob_file(&self, prefix: &str) -> Result<(u64, PathBuf), RelayError> {
        let mut state = self.state.lock().unwrap();
        state.ensure_valid()?;
        let blob_id = self.new_blob_id();
        let path = self.store.blob_path(blob_id, prefix);
        state.blobs.insert(
            blob_id,
            BlobRecord {
                path: path.clone(),
                reserved: 0,
            },
        );
        Ok((blob_id, path))
    }

    /// Looks up the path recorded for `blob_id`.
    pub fn find(&self, blob_id: u64) -> Option<PathBuf> {
        let state = self.state.lock().unwrap();
        if !state.valid {
            return None;
        }
        state.blobs.get(&blob_id).map(|record| record.path.clone())
    }

    /// Snapshot of the blob ids currently owned by this session.
    pub fn entries(&self) -> Vec<u64> {
        let state = self.state.lock().unwrap();
        state.blobs.keys().copied().collect()
    }

    /// Charges `size` additional bytes for `blob_id` against the store quota.
    ///
    /// Returns false when the quota is exhausted; the record is left
    /// untouched in that case.
    pub fn reserve(&self, blob_id: u64, size: u64) -> Result<bool, RelayError> {
        let mut state = self.state.lock().unwrap();
        state.ensure_valid()?;
        let record = state
            .blobs
            .get_mut(&blob_id)
            .ok_or_else(|| RelayError::NotFound(format!("blob {} is not in this session", blob_id)))?;
        if !self.store.reserve(size) {
            return Ok(false);
        }
        record.reserved += size;
        Ok(true)
    }

    /// Removes a blob record, returning its reservation and deleting its
    /// file. Unknown ids and missing files are tolerated, the file may have
    /// been handed off to the datastore for promotion.
    pub fn delete_blob(&self, blob_id: u64) {
        let record = {
            let mut state = self.state.lock().unwrap();
            state.blobs.remove(&blob_id)
        };
        if let Some(record) = record {
            self.remove_record(blob_id, record);
        }
    }

    /// Applies [`delete_blob`](Self::delete_blob) to each id.
    pub fn remove_range<I: IntoIterator<Item = u64>>(&self, blob_ids: I) {
        for blob_id in blob_ids {
            self.delete_blob(blob_id);
        }
    }

    /// The session-scoped reference tag for `blob_id`.
    pub fn compute_reference_tag(&self, blob_id: u64) -> u64 {
        self.tags.compute(blob_id, self.session_id)
    }

    /// The externally computed tag for `blob_id`, scoped by the bound
    /// transaction when there is one and by the session otherwise.
    pub fn external_tag(&self, blob_id: u64) -> u64 {
        let scope_id = self.transaction_id.unwrap_or(self.session_id);
        self.adapter.lookup_tag(blob_id, scope_id)
    }

    /// Invalidates the session and drains every blob record.
    pub(crate) fn dispose_blobs(&self) {
        let records: Vec<(u64, BlobRecord)> = {
            let mut state = self.state.lock().unwrap();
            state.valid = false;
            state.blobs.drain().collect()
        };
        for (blob_id, record) in records {
            self.remove_record(blob_id, record);
        }
    }

    fn remove_record(&self, blob_id: u64, record: BlobRecord) {
        self.store.release(record.reserved);
        match std::fs::remove_file(&record.path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                log::warn!(
                    "removing blob {} file {:?} failed - {}",
                    blob_id,
                    record.path,
                    err
                );
            }
        }
    }
}

impl SessionState {
    fn ensure_valid(&self) -> Result<(), RelayError> {
        if !self.valid {
            return Err(RelayError::NotFound("the session has been disposed".into()));
        }
        Ok(())
    }
}
