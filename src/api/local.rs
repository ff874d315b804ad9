//! Same-host blob transfer exchanging filesystem paths instead of bytes.

use std::path::Path;
use std::sync::Arc;

use tonic::{Request, Response, Status};

use blob_relay_api::blobrelay::blob_local_server::BlobLocal;
use blob_relay_api::blobrelay::{
    BlobReference, GetLocalRequest, GetLocalResponse, LocalData, PutLocalRequest, PutLocalResponse,
};
use blob_relay_api::{
    api_version_compatible, api_version_error_message, DOWNSTREAM_STORAGE_ID, SESSION_STORAGE_ID,
};

use crate::manager::SessionManager;

pub struct LocalService {
    manager: Arc<SessionManager>,
    upload_copy_file: bool,
}

impl LocalService {
    pub fn new(manager: Arc<SessionManager>, upload_copy_file: bool) -> Self {
        Self {
            manager,
            upload_copy_file,
        }
    }
}

#[tonic::async_trait]
impl BlobLocal for LocalService {
    async fn put(
        &self,
        request: Request<PutLocalRequest>,
    ) -> Result<Response<PutLocalResponse>, Status> {
        let request = request.into_inner();

        if !api_version_compatible(request.api_version) {
            return Err(Status::unavailable(api_version_error_message(
                request.api_version,
            )));
        }
        let data = request
            .data
            .ok_or_else(|| Status::invalid_argument("the request carries no data path"))?;

        let session = self.manager.session(request.session_id)?;

        let blob_id = if self.upload_copy_file {
            let (blob_id, path) = session.create_blob_file("upload")?;
            if let Err(err) = tokio::fs::copy(&data.path, &path).await {
                session.delete_blob(blob_id);
                if err.kind() == std::io::ErrorKind::NotFound {
                    return Err(Status::not_found(format!(
                        "{} does not exist - {}",
                        data.path, err
                    )));
                }
                return Err(Status::failed_precondition(format!(
                    "cannot copy {} into the session store - {}",
                    data.path, err
                )));
            }
            blob_id
        } else {
            // reference semantics: register the client path in place
            session.add(Path::new(&data.path))?
        };

        log::debug!(
            "local put finishes normally, session_id = {}, blob_id = {}",
            request.session_id,
            blob_id
        );
        Ok(Response::new(PutLocalResponse {
            blob: Some(BlobReference {
                storage_id: SESSION_STORAGE_ID,
                object_id: blob_id,
                tag: 0,
            }),
        }))
    }

    async fn get(
        &self,
        request: Request<GetLocalRequest>,
    ) -> Result<Response<GetLocalResponse>, Status> {
        let request = request.into_inner();

        if !api_version_compatible(request.api_version) {
            return Err(Status::unavailable(api_version_error_message(
                request.api_version,
            )));
        }
        let blob = request
            .blob
            .ok_or_else(|| Status::invalid_argument("the request carries no blob reference"))?;

        let session = self.manager.session(request.session_id)?;

        let path = match blob.storage_id {
            SESSION_STORAGE_ID => session.find(blob.object_id).ok_or_else(|| {
                Status::not_found("can not find the blob data by the blob_id given")
            })?,
            DOWNSTREAM_STORAGE_ID => self.manager.external_path(blob.object_id),
            _ => {
                return Err(Status::invalid_argument(
                    "storage_id is neither the session store nor the downstream blob store",
                ))
            }
        };

        let expected = session.compute_reference_tag(blob.object_id);
        if blob.tag != expected
            && !(self.manager.dev_accept_mock_tag() && blob.tag == SessionManager::MOCK_TAG)
        {
            log::debug!("local get finishes with PERMISSION_DENIED");
            return Err(Status::permission_denied(
                "the given tag does not match the expected value",
            ));
        }

        if tokio::fs::metadata(&path).await.is_err() {
            return Err(Status::not_found(
                "an error occurred while reading the blob file",
            ));
        }

        log::debug!("local get finishes normally, path = {:?}", path);
        Ok(Response::new(GetLocalResponse {
            data: Some(LocalData {
                path: path.to_string_lossy().into_owned(),
            }),
        }))
    }
}
