//! Shared harness: a relay served on a loopback socket, plus a canned
//! datastore adapter.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;

use blob_relay::{BlobRelay, DatastoreAdapter, RelayConfig};

/// 53 bytes of well-known content, the unit of most transfer tests.
pub const TEST_BLOB: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz\n";

/// Adapter answering every lookup with fixed values, the way the original
/// deployment resolves promoted blobs.
pub struct FixedAdapter {
    pub tag: u64,
    pub path: PathBuf,
}

impl DatastoreAdapter for FixedAdapter {
    fn lookup_tag(&self, _blob_id: u64, _scope_id: u64) -> u64 {
        self.tag
    }

    fn lookup_path(&self, _blob_id: u64) -> PathBuf {
        self.path.clone()
    }
}

pub struct TestServer {
    pub relay: Arc<BlobRelay>,
    pub endpoint: String,
    pub dir: PathBuf,
    handle: tokio::task::JoinHandle<()>,
}

pub const ADAPTER_TAG: u64 = 2468;

impl TestServer {
    /// Boots a relay on an ephemeral loopback port. The scratch directory
    /// lives under `.testdir-grpc-{name}` next to the crate, recreated per
    /// run.
    pub async fn start<F: FnOnce(&mut RelayConfig)>(name: &str, configure: F) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut dir = std::fs::canonicalize(".").unwrap();
        dir.push(format!(".testdir-grpc-{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        let store = dir.join("session_store");
        std::fs::create_dir_all(&store).unwrap();

        let mut config = RelayConfig::new(&store);
        config.stream_chunk_size = 32;
        configure(&mut config);

        let adapter = Arc::new(FixedAdapter {
            tag: ADAPTER_TAG,
            path: dir.join("promoted_blob"),
        });
        let relay = Arc::new(BlobRelay::new(adapter, config).unwrap());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let incoming = TcpListenerStream::new(listener);

        let router = tonic::transport::Server::builder()
            .add_service(relay.streaming_service())
            .add_optional_service(relay.local_service());
        #[cfg(feature = "test-support")]
        let router = router.add_service(relay.support_service());

        let handle = tokio::spawn(async move {
            router.serve_with_incoming(incoming).await.unwrap();
        });

        Self {
            relay,
            endpoint: format!("http://{}", addr),
            dir,
            handle,
        }
    }

    pub fn session_store_dir(&self) -> PathBuf {
        self.dir.join("session_store")
    }

    /// Number of entries currently in the scratch directory.
    pub fn scratch_file_count(&self) -> usize {
        std::fs::read_dir(self.session_store_dir()).unwrap().count()
    }

    pub fn stop(self) {
        self.handle.abort();
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}
