//! End-to-end tests of the chunked streaming services over a real socket.

use tonic::Code;

use blob_relay_api::blobrelay::blob_streaming_client::BlobStreamingClient;
use blob_relay_api::blobrelay::{
    get_request, get_response, put_request, BlobReference, GetRequest, GetResponse, PutRequest,
};
use blob_relay_api::{API_VERSION, DOWNSTREAM_STORAGE_ID, SESSION_STORAGE_ID};

use blob_relay::SessionManager;

mod harness;
use harness::{TestServer, ADAPTER_TAG, TEST_BLOB};

fn metadata_frame(session_id: u64, blob_size: Option<u64>) -> PutRequest {
    PutRequest {
        payload: Some(put_request::Payload::Metadata(put_request::Metadata {
            api_version: API_VERSION,
            session_id,
            blob_size,
        })),
    }
}

fn chunk_frame(data: &[u8]) -> PutRequest {
    PutRequest {
        payload: Some(put_request::Payload::Chunk(data.to_vec())),
    }
}

fn get_request(context_id: get_request::ContextId, blob: BlobReference) -> GetRequest {
    GetRequest {
        api_version: API_VERSION,
        context_id: Some(context_id),
        blob: Some(blob),
    }
}

/// Drains a get response stream into (metadata size, concatenated bytes),
/// asserting the metadata frame arrives first and exactly once.
async fn drain_get(
    stream: &mut tonic::codec::Streaming<GetResponse>,
) -> (u64, Vec<u8>, usize) {
    let mut blob_size = None;
    let mut data = Vec::new();
    let mut chunk_count = 0;
    while let Some(frame) = stream.message().await.unwrap() {
        match frame.payload.unwrap() {
            get_response::Payload::Metadata(metadata) => {
                assert!(blob_size.is_none(), "metadata frame received twice");
                assert!(data.is_empty(), "metadata frame arrived after chunks");
                blob_size = Some(metadata.blob_size);
            }
            get_response::Payload::Chunk(chunk) => {
                assert!(blob_size.is_some(), "chunk frame arrived before metadata");
                chunk_count += 1;
                data.extend_from_slice(&chunk);
            }
        }
    }
    (blob_size.expect("no metadata frame"), data, chunk_count)
}

#[tokio::test]
async fn round_trip() {
    let server = TestServer::start("round-trip", |_| ()).await;
    let session = server.relay.create_session(None).unwrap();

    let mut client = BlobStreamingClient::connect(server.endpoint.clone())
        .await
        .unwrap();

    let frames = vec![
        metadata_frame(session.id(), Some(TEST_BLOB.len() as u64)),
        chunk_frame(TEST_BLOB),
    ];
    let response = client
        .put(tokio_stream::iter(frames))
        .await
        .unwrap()
        .into_inner();
    let blob = response.blob.unwrap();
    assert_eq!(blob.storage_id, SESSION_STORAGE_ID);
    assert!(blob.object_id > 0);

    let request = get_request(
        get_request::ContextId::SessionId(session.id()),
        BlobReference {
            storage_id: SESSION_STORAGE_ID,
            object_id: blob.object_id,
            tag: session.compute_reference_tag(blob.object_id),
        },
    );
    let mut stream = client.get(request).await.unwrap().into_inner();
    let (blob_size, data, chunk_count) = drain_get(&mut stream).await;
    assert_eq!(blob_size, TEST_BLOB.len() as u64);
    assert_eq!(data, TEST_BLOB);
    // 53 bytes at a stream chunk size of 32 cannot fit a single chunk
    assert!(chunk_count >= 2);

    server.stop();
}

#[tokio::test]
async fn empty_blob_round_trip() {
    let server = TestServer::start("empty-blob", |_| ()).await;
    let session = server.relay.create_session(None).unwrap();

    let mut client = BlobStreamingClient::connect(server.endpoint.clone())
        .await
        .unwrap();

    let frames = vec![metadata_frame(session.id(), Some(0))];
    let blob = client
        .put(tokio_stream::iter(frames))
        .await
        .unwrap()
        .into_inner()
        .blob
        .unwrap();

    let request = get_request(
        get_request::ContextId::SessionId(session.id()),
        BlobReference {
            storage_id: SESSION_STORAGE_ID,
            object_id: blob.object_id,
            tag: session.compute_reference_tag(blob.object_id),
        },
    );
    let mut stream = client.get(request).await.unwrap().into_inner();
    let (blob_size, data, chunk_count) = drain_get(&mut stream).await;
    assert_eq!(blob_size, 0);
    assert!(data.is_empty());
    assert_eq!(chunk_count, 0);

    server.stop();
}

#[tokio::test]
async fn quota_exhaustion() {
    let server = TestServer::start("quota", |config| {
        config.session_quota_size = 520;
    })
    .await;
    let session = server.relay.create_session(None).unwrap();

    let mut client = BlobStreamingClient::connect(server.endpoint.clone())
        .await
        .unwrap();

    let mut ok = 0;
    let mut exhausted = 0;
    for _ in 0..10 {
        let frames = vec![metadata_frame(session.id(), None), chunk_frame(TEST_BLOB)];
        match client.put(tokio_stream::iter(frames)).await {
            Ok(_) => ok += 1,
            Err(status) => {
                assert_eq!(status.code(), Code::ResourceExhausted);
                exhausted += 1;
            }
        }
    }
    assert_eq!(ok, 9);
    assert_eq!(exhausted, 1);
    assert_eq!(
        server.relay.session_manager().store().current_size(),
        9 * TEST_BLOB.len() as u64
    );

    server.stop();
}

#[tokio::test]
async fn declared_size_mismatch() {
    let server = TestServer::start("size-mismatch", |config| {
        config.session_quota_size = 1024;
    })
    .await;
    let session = server.relay.create_session(None).unwrap();

    let mut client = BlobStreamingClient::connect(server.endpoint.clone())
        .await
        .unwrap();

    let frames = vec![
        metadata_frame(session.id(), Some(100)),
        chunk_frame(&[7u8; 99]),
    ];
    let status = client.put(tokio_stream::iter(frames)).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    // full rollback: no scratch file, no reservation, no record
    assert_eq!(server.scratch_file_count(), 0);
    assert_eq!(server.relay.session_manager().store().current_size(), 0);
    assert!(session.entries().is_empty());

    server.stop();
}

#[tokio::test]
async fn api_version_rejection() {
    let server = TestServer::start("api-version", |_| ()).await;
    let session = server.relay.create_session(None).unwrap();

    let mut client = BlobStreamingClient::connect(server.endpoint.clone())
        .await
        .unwrap();

    let frames = vec![PutRequest {
        payload: Some(put_request::Payload::Metadata(put_request::Metadata {
            api_version: API_VERSION + 1,
            session_id: session.id(),
            blob_size: None,
        })),
    }];
    let status = client.put(tokio_stream::iter(frames)).await.unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);
    assert_eq!(server.scratch_file_count(), 0);

    let mut request = get_request(
        get_request::ContextId::SessionId(session.id()),
        BlobReference::default(),
    );
    request.api_version = API_VERSION + 1;
    let status = client.get(request).await.unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);

    server.stop();
}

#[tokio::test]
async fn bad_framing() {
    let server = TestServer::start("framing", |_| ()).await;
    let session = server.relay.create_session(None).unwrap();

    let mut client = BlobStreamingClient::connect(server.endpoint.clone())
        .await
        .unwrap();

    // empty request stream
    let status = client
        .put(tokio_stream::iter(Vec::<PutRequest>::new()))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    // first frame is not metadata
    let frames = vec![chunk_frame(TEST_BLOB)];
    let status = client.put(tokio_stream::iter(frames)).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    // a second metadata frame mid-stream aborts and rolls back
    let frames = vec![
        metadata_frame(session.id(), None),
        metadata_frame(session.id(), None),
    ];
    let status = client.put(tokio_stream::iter(frames)).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(server.scratch_file_count(), 0);
    assert!(session.entries().is_empty());

    server.stop();
}

#[tokio::test]
async fn unknown_ids() {
    let server = TestServer::start("unknown-ids", |_| ()).await;
    let session = server.relay.create_session(None).unwrap();

    let mut client = BlobStreamingClient::connect(server.endpoint.clone())
        .await
        .unwrap();

    // unknown session on put
    let frames = vec![metadata_frame(9999, None), chunk_frame(TEST_BLOB)];
    let status = client.put(tokio_stream::iter(frames)).await.unwrap_err();
    assert_eq!(status.code(), Code::NotFound);

    // unknown session / blob / storage on get
    let status = client
        .get(get_request(
            get_request::ContextId::SessionId(9999),
            BlobReference::default(),
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);

    let status = client
        .get(get_request(
            get_request::ContextId::SessionId(session.id()),
            BlobReference {
                storage_id: SESSION_STORAGE_ID,
                object_id: 4242,
                tag: session.compute_reference_tag(4242),
            },
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);

    let status = client
        .get(get_request(
            get_request::ContextId::SessionId(session.id()),
            BlobReference {
                storage_id: 17,
                object_id: 1,
                tag: 0,
            },
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    server.stop();
}

#[tokio::test]
async fn tag_enforcement() {
    let server = TestServer::start("tags", |_| ()).await;
    let session = server.relay.create_session(None).unwrap();

    let mut client = BlobStreamingClient::connect(server.endpoint.clone())
        .await
        .unwrap();

    let frames = vec![metadata_frame(session.id(), None), chunk_frame(TEST_BLOB)];
    let blob = client
        .put(tokio_stream::iter(frames))
        .await
        .unwrap()
        .into_inner()
        .blob
        .unwrap();

    let good_tag = session.compute_reference_tag(blob.object_id);

    // altered tag
    let status = client
        .get(get_request(
            get_request::ContextId::SessionId(session.id()),
            BlobReference {
                storage_id: SESSION_STORAGE_ID,
                object_id: blob.object_id,
                tag: good_tag ^ 1,
            },
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);

    // the mock tag is rejected unless explicitly enabled
    let status = client
        .get(get_request(
            get_request::ContextId::SessionId(session.id()),
            BlobReference {
                storage_id: SESSION_STORAGE_ID,
                object_id: blob.object_id,
                tag: SessionManager::MOCK_TAG,
            },
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);

    server.stop();
}

#[tokio::test]
async fn mock_tag_accepted_when_enabled() {
    let server = TestServer::start("mock-tag", |config| {
        config.dev_accept_mock_tag = true;
    })
    .await;
    let session = server.relay.create_session(None).unwrap();

    let mut client = BlobStreamingClient::connect(server.endpoint.clone())
        .await
        .unwrap();

    let frames = vec![metadata_frame(session.id(), None), chunk_frame(TEST_BLOB)];
    let blob = client
        .put(tokio_stream::iter(frames))
        .await
        .unwrap()
        .into_inner()
        .blob
        .unwrap();

    let mut stream = client
        .get(get_request(
            get_request::ContextId::SessionId(session.id()),
            BlobReference {
                storage_id: SESSION_STORAGE_ID,
                object_id: blob.object_id,
                tag: SessionManager::MOCK_TAG,
            },
        ))
        .await
        .unwrap()
        .into_inner();
    let (_, data, _) = drain_get(&mut stream).await;
    assert_eq!(data, TEST_BLOB);

    // a random wrong tag is still refused
    let status = client
        .get(get_request(
            get_request::ContextId::SessionId(session.id()),
            BlobReference {
                storage_id: SESSION_STORAGE_ID,
                object_id: blob.object_id,
                tag: 1,
            },
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);

    server.stop();
}

#[tokio::test]
async fn transaction_scoped_download() {
    let server = TestServer::start("txn-download", |_| ()).await;

    let transaction_id = 12345;
    let session = server.relay.create_session(Some(transaction_id)).unwrap();

    // register an external file with the session
    let external = server.dir.join("external_data");
    let mut content = Vec::new();
    for _ in 0..10 {
        content.extend_from_slice(TEST_BLOB);
    }
    std::fs::write(&external, &content).unwrap();
    let blob_id = session.add(&external).unwrap();

    let mut client = BlobStreamingClient::connect(server.endpoint.clone())
        .await
        .unwrap();

    let mut stream = client
        .get(get_request(
            get_request::ContextId::TransactionId(transaction_id),
            BlobReference {
                storage_id: SESSION_STORAGE_ID,
                object_id: blob_id,
                tag: session.compute_reference_tag(blob_id),
            },
        ))
        .await
        .unwrap()
        .into_inner();
    let (blob_size, data, _) = drain_get(&mut stream).await;
    assert_eq!(blob_size, content.len() as u64);
    assert_eq!(data, content);

    // an unknown transaction id does not resolve
    let status = client
        .get(get_request(
            get_request::ContextId::TransactionId(transaction_id + 1),
            BlobReference {
                storage_id: SESSION_STORAGE_ID,
                object_id: blob_id,
                tag: session.compute_reference_tag(blob_id),
            },
        ))
        .await
        .unwrap_err();
    assert!(matches!(
        status.code(),
        Code::NotFound | Code::PermissionDenied
    ));

    server.stop();
}

#[tokio::test]
async fn downstream_storage_download() {
    let server = TestServer::start("downstream", |_| ()).await;
    let session = server.relay.create_session(None).unwrap();

    // materialize the promoted blob where the adapter resolves it
    std::fs::write(server.dir.join("promoted_blob"), TEST_BLOB).unwrap();

    let mut client = BlobStreamingClient::connect(server.endpoint.clone())
        .await
        .unwrap();

    let object_id = 6789;
    let mut stream = client
        .get(get_request(
            get_request::ContextId::SessionId(session.id()),
            BlobReference {
                storage_id: DOWNSTREAM_STORAGE_ID,
                object_id,
                tag: session.compute_reference_tag(object_id),
            },
        ))
        .await
        .unwrap()
        .into_inner();
    let (blob_size, data, _) = drain_get(&mut stream).await;
    assert_eq!(blob_size, TEST_BLOB.len() as u64);
    assert_eq!(data, TEST_BLOB);

    // the adapter supplied tag is not a reference tag
    assert_ne!(session.compute_reference_tag(object_id), ADAPTER_TAG);

    server.stop();
}

#[tokio::test]
async fn dispose_invalidates_session() {
    let server = TestServer::start("dispose", |config| {
        config.session_quota_size = 1024;
    })
    .await;
    let session = server.relay.create_session(None).unwrap();

    let mut client = BlobStreamingClient::connect(server.endpoint.clone())
        .await
        .unwrap();

    let frames = vec![metadata_frame(session.id(), None), chunk_frame(TEST_BLOB)];
    let blob = client
        .put(tokio_stream::iter(frames))
        .await
        .unwrap()
        .into_inner()
        .blob
        .unwrap();
    let scratch_path = session.find(blob.object_id).unwrap();
    assert!(scratch_path.exists());

    let tag = session.compute_reference_tag(blob.object_id);
    server.relay.dispose_session(session.id());

    assert!(!scratch_path.exists());
    assert_eq!(server.relay.session_manager().store().current_size(), 0);

    let status = client
        .get(get_request(
            get_request::ContextId::SessionId(session.id()),
            BlobReference {
                storage_id: SESSION_STORAGE_ID,
                object_id: blob.object_id,
                tag,
            },
        ))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);

    let frames = vec![metadata_frame(session.id(), None), chunk_frame(TEST_BLOB)];
    let status = client.put(tokio_stream::iter(frames)).await.unwrap_err();
    assert_eq!(status.code(), Code::NotFound);

    server.stop();
}

#[tokio::test]
async fn remove_range_returns_quota() {
    let server = TestServer::start("remove-range", |config| {
        config.session_quota_size = 4096;
    })
    .await;
    let session = server.relay.create_session(None).unwrap();

    let mut client = BlobStreamingClient::connect(server.endpoint.clone())
        .await
        .unwrap();

    let mut ids = Vec::new();
    for _ in 0..20 {
        let frames = vec![metadata_frame(session.id(), None), chunk_frame(TEST_BLOB)];
        let blob = client
            .put(tokio_stream::iter(frames))
            .await
            .unwrap()
            .into_inner()
            .blob
            .unwrap();
        ids.push(blob.object_id);
    }
    assert_eq!(
        server.relay.session_manager().store().current_size(),
        20 * TEST_BLOB.len() as u64
    );
    assert_eq!(server.scratch_file_count(), 20);

    session.remove_range(ids);
    assert_eq!(server.relay.session_manager().store().current_size(), 0);
    assert_eq!(server.scratch_file_count(), 0);

    server.stop();
}

#[tokio::test]
async fn concurrent_puts_respect_quota() {
    let server = TestServer::start("concurrent-quota", |config| {
        config.session_quota_size = 520;
    })
    .await;
    let session = server.relay.create_session(None).unwrap();
    let session_id = session.id();

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let endpoint = server.endpoint.clone();
        tasks.push(tokio::spawn(async move {
            let mut client = BlobStreamingClient::connect(endpoint).await.unwrap();
            let frames = vec![metadata_frame(session_id, None), chunk_frame(TEST_BLOB)];
            client
                .put(tokio_stream::iter(frames))
                .await
                .map(|_| ())
                .map_err(|status| status.code())
        }));
    }

    let mut ok = 0u64;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => ok += 1,
            Err(code) => assert_eq!(code, Code::ResourceExhausted),
        }
    }
    // at least one upload must lose; the winners account for every byte
    assert!(ok < 10);
    assert_eq!(
        server.relay.session_manager().store().current_size(),
        ok * TEST_BLOB.len() as u64
    );

    server.stop();
}
