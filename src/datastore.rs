use std::path::PathBuf;

/// Capability interface onto the downstream datastore.
///
/// The relay never talks to the datastore directly; the embedder supplies
/// these two resolvers at construction time. `lookup_tag` yields the
/// externally computed access tag for a blob under a given scope (transaction
/// id when the session is transaction-bound, session id otherwise), and
/// `lookup_path` resolves a blob already promoted to the permanent blob store
/// to its on-disk location.
pub trait DatastoreAdapter: Send + Sync + 'static {
    fn lookup_tag(&self, blob_id: u64, scope_id: u64) -> u64;

    fn lookup_path(&self, blob_id: u64) -> PathBuf;
}
