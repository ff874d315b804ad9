//! Chunked streaming transfer of blob payloads.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

use blob_relay_api::blobrelay::blob_streaming_server::BlobStreaming;
use blob_relay_api::blobrelay::{
    get_request, get_response, put_request, BlobReference, GetRequest, GetResponse, PutRequest,
    PutResponse,
};
use blob_relay_api::{
    api_version_compatible, api_version_error_message, DOWNSTREAM_STORAGE_ID, SESSION_STORAGE_ID,
};

use crate::manager::SessionManager;
use crate::session::BlobSession;

pub struct StreamingService {
    manager: Arc<SessionManager>,
    chunk_size: usize,
}

impl StreamingService {
    pub fn new(manager: Arc<SessionManager>, chunk_size: usize) -> Self {
        Self {
            manager,
            chunk_size,
        }
    }

    /// Rolls a half-written upload back: the record is dropped, its
    /// reservation returned and the partial file removed.
    fn abort_upload(session: &BlobSession, blob_id: u64) {
        session.delete_blob(blob_id);
    }
}

#[tonic::async_trait]
impl BlobStreaming for StreamingService {
    async fn put(
        &self,
        request: Request<Streaming<PutRequest>>,
    ) -> Result<Response<PutResponse>, Status> {
        let mut stream = request.into_inner();

        let first = match stream.message().await {
            Ok(Some(frame)) => frame,
            _ => return Err(Status::invalid_argument("no request")),
        };
        let metadata = match first.payload {
            Some(put_request::Payload::Metadata(metadata)) => metadata,
            _ => return Err(Status::invalid_argument("the first request is not metadata")),
        };
        if !api_version_compatible(metadata.api_version) {
            log::debug!("put finishes with UNAVAILABLE");
            return Err(Status::unavailable(api_version_error_message(
                metadata.api_version,
            )));
        }
        let declared_size = metadata.blob_size;

        let session = self.manager.session(metadata.session_id)?;
        let (blob_id, path) = session.create_blob_file("upload")?;
        log::debug!(
            "accepted put request: session_id = {}, blob_id = {}",
            metadata.session_id,
            blob_id
        );

        let mut file = match tokio::fs::File::create(&path).await {
            Ok(file) => file,
            Err(err) => {
                Self::abort_upload(&session, blob_id);
                return Err(Status::failed_precondition(format!(
                    "cannot open the file to write the blob to - {}",
                    err
                )));
            }
        };

        let mut total_written: u64 = 0;
        loop {
            let frame = match stream.message().await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    // client went away mid-stream; the partial blob stays
                    // with the session and is reclaimed at dispose time
                    log::debug!("put stream broke off after {} bytes", total_written);
                    return Err(err);
                }
            };
            let chunk = match frame.payload {
                Some(put_request::Payload::Chunk(chunk)) => chunk,
                _ => {
                    drop(file);
                    Self::abort_upload(&session, blob_id);
                    return Err(Status::invalid_argument(
                        "a subsequent request is not chunk",
                    ));
                }
            };

            if !session.reserve(blob_id, chunk.len() as u64)? {
                drop(file);
                Self::abort_upload(&session, blob_id);
                log::debug!("put finishes with RESOURCE_EXHAUSTED");
                return Err(Status::resource_exhausted(
                    "session storage usage has reached its limit",
                ));
            }
            if let Err(err) = file.write_all(&chunk).await {
                drop(file);
                Self::abort_upload(&session, blob_id);
                return Err(Status::internal(format!(
                    "writing the blob file failed - {}",
                    err
                )));
            }
            total_written += chunk.len() as u64;
        }

        if let Err(err) = file.flush().await {
            Self::abort_upload(&session, blob_id);
            return Err(Status::internal(format!(
                "writing the blob file failed - {}",
                err
            )));
        }
        drop(file);

        if let Some(declared) = declared_size {
            if declared != total_written {
                Self::abort_upload(&session, blob_id);
                log::debug!(
                    "put finishes with INVALID_ARGUMENT ({} != {})",
                    declared,
                    total_written
                );
                return Err(Status::invalid_argument(
                    "the size in the metadata does not match the size of the sent blob",
                ));
            }
        }

        log::debug!(
            "put finishes normally, blob_id = {}, {} bytes",
            blob_id,
            total_written
        );
        Ok(Response::new(PutResponse {
            blob: Some(BlobReference {
                storage_id: SESSION_STORAGE_ID,
                object_id: blob_id,
                tag: 0,
            }),
        }))
    }

    type GetStream = ReceiverStream<Result<GetResponse, Status>>;

    async fn get(&self, request: Request<GetRequest>) -> Result<Response<Self::GetStream>, Status> {
        let request = request.into_inner();

        if !api_version_compatible(request.api_version) {
            log::debug!("get finishes with UNAVAILABLE");
            return Err(Status::unavailable(api_version_error_message(
                request.api_version,
            )));
        }
        let blob = request
            .blob
            .ok_or_else(|| Status::invalid_argument("the request carries no blob reference"))?;

        let (session, transaction_scope) = match request.context_id {
            Some(get_request::ContextId::SessionId(session_id)) => {
                (self.manager.session(session_id)?, None)
            }
            Some(get_request::ContextId::TransactionId(transaction_id)) => {
                let session_id = self.manager.session_id_for_transaction(transaction_id)?;
                (self.manager.session(session_id)?, Some(transaction_id))
            }
            None => {
                return Err(Status::invalid_argument(
                    "context_id is neither session_id nor transaction_id",
                ))
            }
        };
        log::debug!(
            "accepted get request: blob_id = {} of storage {}, session_id = {}",
            blob.object_id,
            blob.storage_id,
            session.id()
        );

        if let Some(transaction_id) = transaction_scope {
            match session.transaction_id() {
                Some(bound) if bound == transaction_id => {}
                Some(_) => {
                    log::debug!("get finishes with PERMISSION_DENIED");
                    return Err(Status::permission_denied(
                        "transaction_id does not match with that of the session",
                    ));
                }
                None => {
                    log::debug!("get finishes with PERMISSION_DENIED");
                    return Err(Status::permission_denied("the session has no transaction"));
                }
            }
        }

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
            log::debug!("get finishes with PERMISSION_DENIED");
            return Err(Status::permission_denied(
                "the given tag does not match the expected value",
            ));
        }

        let blob_size = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata.len(),
            Err(_) => {
                log::debug!("get finishes with NOT_FOUND: {:?}", path);
                return Err(Status::not_found(
                    "an error occurred while reading the blob file",
                ));
            }
        };

        let chunk_size = self.chunk_size;
        let (sender, receiver) = mpsc::channel(4);
        tokio::spawn(async move {
            let metadata = GetResponse {
                payload: Some(get_response::Payload::Metadata(get_response::Metadata {
                    blob_size,
                })),
            };
            if sender.send(Ok(metadata)).await.is_err() {
                return;
            }

            let mut file = match tokio::fs::File::open(&path).await {
                Ok(file) => file,
                Err(err) => {
                    let _ = sender
                        .send(Err(Status::not_found(format!(
                            "an error occurred while reading the blob file - {}",
                            err
                        ))))
                        .await;
                    return;
                }
            };
            let mut buffer = vec![0u8; chunk_size];
            loop {
                match file.read(&mut buffer).await {
                    Ok(0) => break,
                    Ok(count) => {
                        let chunk = GetResponse {
                            payload: Some(get_response::Payload::Chunk(
                                buffer[..count].to_vec(),
                            )),
                        };
                        if sender.send(Ok(chunk)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = sender
                            .send(Err(Status::internal(format!(
                                "reading the blob file failed - {}",
                                err
                            ))))
                            .await;
                        break;
                    }
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(receiver)))
    }
}
