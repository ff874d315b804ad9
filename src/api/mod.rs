//! gRPC service surfaces of the blob relay.

use std::sync::Arc;

use anyhow::{bail, Error};

use blob_relay_api::blobrelay::blob_local_server::BlobLocalServer;
use blob_relay_api::blobrelay::blob_streaming_server::BlobStreamingServer;

use crate::config::RelayConfig;
use crate::datastore::DatastoreAdapter;
use crate::error::RelayError;
use crate::manager::SessionManager;
use crate::session::BlobSession;

pub mod local;
pub mod streaming;
#[cfg(feature = "test-support")]
pub mod support;

pub use local::LocalService;
pub use streaming::StreamingService;
#[cfg(feature = "test-support")]
pub use support::SmokeTestSupportService;

/// Top level handle tying the session manager and the service surfaces
/// together.
///
/// The embedder constructs one `BlobRelay` per process, registers the
/// service values on its gRPC server and keeps the handle around to create
/// and dispose sessions out of band (usually when transactions begin and
/// end). Server bootstrap stays with the embedder.
pub struct BlobRelay {
    config: RelayConfig,
    manager: Arc<SessionManager>,
}

impl BlobRelay {
    /// Builds the relay. Fails when the scratch directory is unusable, the
    /// tag key cannot be generated or the configuration is inconsistent;
    /// the service must not come up degraded.
    pub fn new(adapter: Arc<dyn DatastoreAdapter>, config: RelayConfig) -> Result<Self, Error> {
        if config.stream_chunk_size == 0 {
            bail!("stream-chunk-size must not be zero");
        }
        let manager = Arc::new(SessionManager::new(adapter, &config)?);
        Ok(Self { config, manager })
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Opens a session, optionally bound to a transaction.
    pub fn create_session(
        &self,
        transaction_id: Option<u64>,
    ) -> Result<Arc<BlobSession>, RelayError> {
        self.manager.create_session(transaction_id)
    }

    /// Disposes a session and everything it owns.
    pub fn dispose_session(&self, session_id: u64) {
        self.manager.dispose(session_id);
    }

    /// The chunked streaming service, ready to be added to a server.
    pub fn streaming_service(&self) -> BlobStreamingServer<StreamingService> {
        BlobStreamingServer::new(StreamingService::new(
            Arc::clone(&self.manager),
            self.config.stream_chunk_size,
        ))
    }

    /// The same-host path-exchanging service; `None` unless enabled in the
    /// configuration.
    pub fn local_service(&self) -> Option<BlobLocalServer<LocalService>> {
        if !self.config.local_enabled {
            return None;
        }
        Some(BlobLocalServer::new(LocalService::new(
            Arc::clone(&self.manager),
            self.config.local_upload_copy_file,
        )))
    }

    /// The smoke test support service. Never register this on a production
    /// server.
    #[cfg(feature = "test-support")]
    pub fn support_service(
        &self,
    ) -> blob_relay_api::blobrelay::smoke::relay_smoke_test_support_server::RelaySmokeTestSupportServer<
        SmokeTestSupportService,
    > {
        blob_relay_api::blobrelay::smoke::relay_smoke_test_support_server::RelaySmokeTestSupportServer::new(
            SmokeTestSupportService::new(Arc::clone(&self.manager)),
        )
    }
}
