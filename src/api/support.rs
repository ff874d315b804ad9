//! Out-of-band helpers for black-box smoke tests.
//!
//! This surface can create and dispose sessions without going through the
//! embedder and materialize a blob with well-known content for download
//! tests. Compiled in only with the `test-support` feature; never register
//! it on a production server.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use blob_relay_api::blobrelay::smoke::relay_smoke_test_support_server::RelaySmokeTestSupport;
use blob_relay_api::blobrelay::smoke::{
    CreateReferenceBlobRequest, CreateReferenceBlobResponse, CreateSessionRequest,
    CreateSessionResponse, DisposeSessionRequest, DisposeSessionResponse, LookupPathRequest,
    LookupPathResponse,
};

use crate::manager::SessionManager;

/// Content of the reference blob materialized for download tests.
pub const REFERENCE_BLOB_CONTENT: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz\n";

pub struct SmokeTestSupportService {
    manager: Arc<SessionManager>,
}

impl SmokeTestSupportService {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }
}

#[tonic::async_trait]
impl RelaySmokeTestSupport for SmokeTestSupportService {
    async fn create_session(
        &self,
        request: Request<CreateSessionRequest>,
    ) -> Result<Response<CreateSessionResponse>, Status> {
        let session = self.manager.create_session(request.into_inner().transaction_id)?;
        Ok(Response::new(CreateSessionResponse {
            session_id: session.id(),
        }))
    }

    async fn dispose_session(
        &self,
        request: Request<DisposeSessionRequest>,
    ) -> Result<Response<DisposeSessionResponse>, Status> {
        self.manager.dispose(request.into_inner().session_id);
        Ok(Response::new(DisposeSessionResponse {}))
    }

    async fn lookup_path(
        &self,
        request: Request<LookupPathRequest>,
    ) -> Result<Response<LookupPathResponse>, Status> {
        let request = request.into_inner();
        let session = self.manager.session(request.session_id)?;
        let path = session
            .find(request.blob_id)
            .ok_or_else(|| Status::not_found("can not find the blob data by the blob_id given"))?;
        Ok(Response::new(LookupPathResponse {
            path: path.to_string_lossy().into_owned(),
        }))
    }

    async fn create_reference_blob(
        &self,
        request: Request<CreateReferenceBlobRequest>,
    ) -> Result<Response<CreateReferenceBlobResponse>, Status> {
        let request = request.into_inner();
        let session = self.manager.session(request.session_id)?;

        let (blob_id, path) = session.create_blob_file("smoke")?;
        if !session.reserve(blob_id, REFERENCE_BLOB_CONTENT.len() as u64)? {
            session.delete_blob(blob_id);
            return Err(Status::resource_exhausted(
                "session storage usage has reached its limit",
            ));
        }
        if let Err(err) = tokio::fs::write(&path, REFERENCE_BLOB_CONTENT).await {
            session.delete_blob(blob_id);
            return Err(Status::failed_precondition(format!(
                "cannot write the reference blob - {}",
                err
            )));
        }

        Ok(Response::new(CreateReferenceBlobResponse {
            blob_id,
            tag: session.compute_reference_tag(blob_id),
        }))
    }
}
