use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Error;

use crate::config::RelayConfig;
use crate::datastore::DatastoreAdapter;
use crate::error::RelayError;
use crate::session::BlobSession;
use crate::store::SessionStore;
use crate::tag::TagGenerator;

struct ManagerState {
    sessions: HashMap<u64, Arc<BlobSession>>,
    by_transaction: HashMap<u64, u64>,
}

/// Owner of all live blob sessions.
///
/// The manager allocates session and blob ids (both strictly increasing,
/// never reused within a process), maps transaction ids back to their bound
/// session and holds the shared store, tag generator and datastore adapter.
/// Both lookup tables live under one coarse mutex; when the manager lock and
/// a session lock are both needed, the manager lock is taken first.
pub struct SessionManager {
    adapter: Arc<dyn DatastoreAdapter>,
    store: Arc<SessionStore>,
    tags: Arc<TagGenerator>,
    next_session_id: AtomicU64,
    next_blob_id: Arc<AtomicU64>,
    dev_accept_mock_tag: bool,
    state: Mutex<ManagerState>,
}

impl SessionManager {
    /// Well-known tag accepted on downloads when `dev-accept-mock-tag` is
    /// configured. Development only.
    pub const MOCK_TAG: u64 = u64::MAX;

    /// Builds the manager, opening (and sweeping) the scratch directory and
    /// generating the process-local tag key. Either step failing is fatal.
    pub fn new(adapter: Arc<dyn DatastoreAdapter>, config: &RelayConfig) -> Result<Self, Error> {
        let store = Arc::new(SessionStore::open(
            &config.session_store,
            config.session_quota_size,
        )?);
        let tags = Arc::new(TagGenerator::new()?);

        Ok(Self {
            adapter,
            store,
            tags,
            next_session_id: AtomicU64::new(0),
            next_blob_id: Arc::new(AtomicU64::new(0)),
            dev_accept_mock_tag: config.dev_accept_mock_tag,
            state: Mutex::new(ManagerState {
                sessions: HashMap::new(),
                by_transaction: HashMap::new(),
            }),
        })
    }

    /// Creates a session, optionally bound to a transaction.
    ///
    /// A transaction id can be bound to at most one live session at a time.
    pub fn create_session(
        &self,
        transaction_id: Option<u64>,
    ) -> Result<Arc<BlobSession>, RelayError> {
        let session_id = self.next_session_id.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::new(BlobSession::new(
            session_id,
            transaction_id,
            Arc::clone(&self.store),
            Arc::clone(&self.tags),
            Arc::clone(&self.adapter),
            Arc::clone(&self.next_blob_id),
        ));

        let mut state = self.state.lock().unwrap();
        if let Some(transaction_id) = transaction_id {
            if state.by_transaction.contains_key(&transaction_id) {
                return Err(RelayError::BadRequest(format!(
                    "transaction {} is already bound to a session",
                    transaction_id
                )));
            }
            state.by_transaction.insert(transaction_id, session_id);
        }
        state.sessions.insert(session_id, Arc::clone(&session));

        log::debug!(
            "created session {} (transaction: {:?})",
            session_id,
            transaction_id
        );
        Ok(session)
    }

    pub fn session(&self, session_id: u64) -> Result<Arc<BlobSession>, RelayError> {
        let state = self.state.lock().unwrap();
        state
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| RelayError::NotFound("can not find the session specified".into()))
    }

    pub fn session_id_for_transaction(&self, transaction_id: u64) -> Result<u64, RelayError> {
        let state = self.state.lock().unwrap();
        state.by_transaction.get(&transaction_id).copied().ok_or_else(|| {
            RelayError::NotFound("can not find the session specified by the transaction_id".into())
        })
    }

    /// Disposes a session: drops it from both tables, then removes every
    /// blob file it owned and returns their reservations. Unknown ids are
    /// ignored.
    pub fn dispose(&self, session_id: u64) {
        let session = {
            let mut state = self.state.lock().unwrap();
            match state.sessions.remove(&session_id) {
                Some(session) => {
                    if let Some(transaction_id) = session.transaction_id() {
                        state.by_transaction.remove(&transaction_id);
                    }
                    session
                }
                None => return,
            }
        };
        session.dispose_blobs();
        log::debug!("disposed session {}", session_id);
    }

    /// Allocates a blob id, unique within the process lifetime.
    pub fn new_blob_id(&self) -> u64 {
        self.next_blob_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn external_tag(&self, blob_id: u64, scope_id: u64) -> u64 {
        self.adapter.lookup_tag(blob_id, scope_id)
    }

    pub fn external_path(&self, blob_id: u64) -> PathBuf {
        self.adapter.lookup_path(blob_id)
    }

    pub fn dev_accept_mock_tag(&self) -> bool {
        self.dev_accept_mock_tag
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }
}
