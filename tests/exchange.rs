//! Client and workflow against a live in-memory exchange service.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use pickup::server::{self, ExchangeState};
use pickup::{
    CodeInput, Deleted, Error, ExchangeClient, FetchOutcome, FileRef, LocalFileStore, PickupCode,
    PublishItem, Registry, SharingGateway, Workflow,
};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn start_exchange() -> (SocketAddr, ExchangeState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = ExchangeState::new();
    tokio::spawn(server::serve(listener, state.clone()));
    (addr, state)
}

async fn start_router(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn client(addr: SocketAddr) -> ExchangeClient {
    ExchangeClient::new(&format!("http://{addr}"), TIMEOUT).unwrap()
}

async fn workflow(root: PathBuf, addr: SocketAddr) -> Workflow {
    let registry = Arc::new(Registry::open(&root).await.unwrap());
    let store = LocalFileStore::new(&root).unwrap();
    let gateway = SharingGateway::new(Vec::new(), Box::new(pickup::gateway::RevealInFolder));
    Workflow::new(registry, store, client(addr), gateway, "pickup://scan/")
}

fn image_ref() -> FileRef {
    FileRef {
        url: "https://files.example/abc/holiday.jpg".into(),
        name: "holiday.jpg".into(),
        mime_type: Some("image/jpeg".into()),
    }
}

fn unused_code(state: &ExchangeState) -> PickupCode {
    (0..10_000u32)
        .map(|n| format!("{n:04}"))
        .find(|c| !state.sessions.contains_key(c))
        .map(|c| PickupCode::parse(&c).unwrap())
        .unwrap()
}

#[tokio::test]
async fn upload_then_fetch_returns_same_references() {
    let (addr, _state) = start_exchange().await;
    let client = client(addr);
    let files = vec![
        image_ref(),
        FileRef {
            url: "https://files.example/abc/notes.txt".into(),
            name: "notes.txt".into(),
            mime_type: None,
        },
    ];

    let code = client.upload(&files).await.unwrap();
    assert_eq!(code.as_str().len(), 4);

    match client.fetch_by_code(&code).await.unwrap() {
        FetchOutcome::Files(fetched) => assert_eq!(fetched, files),
        FetchOutcome::NoFiles => panic!("expected files for {code}"),
    }
}

#[tokio::test]
async fn unknown_code_is_no_files_not_an_error() {
    let (addr, state) = start_exchange().await;
    let client = client(addr);
    client.upload(&[image_ref()]).await.unwrap();

    let code = unused_code(&state);
    assert_eq!(client.fetch_by_code(&code).await.unwrap(), FetchOutcome::NoFiles);
    assert!(!client.exists(&code).await.unwrap());
}

#[tokio::test]
async fn exists_reflects_uploads() {
    let (addr, _state) = start_exchange().await;
    let client = client(addr);
    let code = client.upload(&[image_ref()]).await.unwrap();
    assert!(client.exists(&code).await.unwrap());
}

#[tokio::test]
async fn repeated_delete_is_not_fatal() {
    let (addr, _state) = start_exchange().await;
    let client = client(addr);
    let code = client.upload(&[image_ref()]).await.unwrap();

    assert_eq!(client.delete_by_code(&code).await.unwrap(), Deleted::Removed);
    assert_eq!(client.delete_by_code(&code).await.unwrap(), Deleted::AlreadyGone);
    assert_eq!(client.fetch_by_code(&code).await.unwrap(), FetchOutcome::NoFiles);
}

#[tokio::test]
async fn empty_upload_is_rejected_with_status() {
    let (addr, _state) = start_exchange().await;
    let err = client(addr).upload(&[]).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Remote {
            status: Some(400),
            ..
        }
    ));
}

#[tokio::test]
async fn server_error_carries_detail() {
    let router = Router::new().route(
        "/api/expo/files",
        get(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(serde_json::json!({ "error": "database offline" })),
            )
        }),
    );
    let addr = start_router(router).await;
    let code = PickupCode::parse("1234").unwrap();

    match client(addr).fetch_by_code(&code).await.unwrap_err() {
        Error::Remote { status, detail, .. } => {
            assert_eq!(status, Some(500));
            assert_eq!(detail.as_deref(), Some("database offline"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn empty_file_list_is_no_files() {
    let router = Router::new().route(
        "/api/expo/files",
        get(|| async { axum::Json(serde_json::json!({ "files": [] })) }),
    );
    let addr = start_router(router).await;
    let code = PickupCode::parse("1234").unwrap();
    assert_eq!(
        client(addr).fetch_by_code(&code).await.unwrap(),
        FetchOutcome::NoFiles
    );
}

#[tokio::test]
async fn silent_server_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let client = ExchangeClient::new(&format!("http://{addr}"), Duration::from_millis(200)).unwrap();
    let code = PickupCode::parse("1234").unwrap();
    let err = client.exists(&code).await.unwrap_err();
    assert!(err.is_timeout(), "{err:?}");
}

#[tokio::test]
async fn publish_on_one_device_retrieve_on_another() {
    let tmp = TempDir::new().unwrap();
    let (addr, _state) = start_exchange().await;
    let sender = workflow(tmp.path().join("sender"), addr).await;
    let receiver = workflow(tmp.path().join("receiver"), addr).await;

    let picked = tmp.path().join("beach.png");
    tokio::fs::write(&picked, b"\x89PNG fake").await.unwrap();

    let outcome = sender.publish(&[PublishItem::local(&picked)]).await.unwrap();
    let published = outcome.upload.unwrap();
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(sender.list_files().await.len(), 1);

    let retrieved = receiver
        .retrieve(&CodeInput::Typed(published.code.to_string()))
        .await
        .unwrap();
    let files = match retrieved.outcome {
        FetchOutcome::Files(files) => files,
        FetchOutcome::NoFiles => panic!("published code has no files"),
    };
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "beach.png");
    assert_eq!(files[0].mime_type.as_deref(), Some("image/png"));

    let scanned = receiver
        .retrieve(&CodeInput::Scanned(published.scan_payload.clone()))
        .await
        .unwrap();
    assert_eq!(scanned.code, published.code);

    let record = receiver
        .download(&files[0], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(receiver.list_files().await, vec![record.clone()]);
    assert_eq!(
        tokio::fs::read(&record.location).await.unwrap(),
        b"\x89PNG fake"
    );
}

#[tokio::test]
async fn http_download_is_registered() {
    let tmp = TempDir::new().unwrap();
    let (exchange, _state) = start_exchange().await;
    let blobs = start_router(Router::new().route(
        "/blob/report.pdf",
        get(|| async { b"%PDF-1.7 body".to_vec() }),
    ))
    .await;
    let wf = workflow(tmp.path().join("root"), exchange).await;

    let file = FileRef {
        url: format!("http://{blobs}/blob/report.pdf"),
        name: "report.pdf".into(),
        mime_type: Some("application/pdf".into()),
    };
    let record = wf.download(&file, &CancellationToken::new()).await.unwrap();
    assert_eq!(tokio::fs::read(&record.location).await.unwrap(), b"%PDF-1.7 body");

    let mut partial = tokio::fs::read_dir(tmp.path().join("root").join("partial"))
        .await
        .unwrap();
    assert!(partial.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn failed_download_is_not_registered() {
    let tmp = TempDir::new().unwrap();
    let (exchange, _state) = start_exchange().await;
    let blobs = start_router(Router::new().route(
        "/missing",
        get(|| async { StatusCode::NOT_FOUND }),
    ))
    .await;
    let wf = workflow(tmp.path().join("root"), exchange).await;

    let file = FileRef {
        url: format!("http://{blobs}/missing"),
        name: "gone.bin".into(),
        mime_type: None,
    };
    let err = wf.download(&file, &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::Remote { status: Some(404), .. }));
    assert!(wf.list_files().await.is_empty());
}

#[tokio::test]
async fn truncated_download_is_discarded() {
    let tmp = TempDir::new().unwrap();
    let (exchange, _state) = start_exchange().await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let blobs = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nshort")
                .await;
            let _ = socket.shutdown().await;
        }
    });

    let wf = workflow(tmp.path().join("root"), exchange).await;
    let file = FileRef {
        url: format!("http://{blobs}/video.mp4"),
        name: "video.mp4".into(),
        mime_type: Some("video/mp4".into()),
    };
    assert!(wf.download(&file, &CancellationToken::new()).await.is_err());
    assert!(wf.list_files().await.is_empty());

    let mut partial = tokio::fs::read_dir(tmp.path().join("root").join("partial"))
        .await
        .unwrap();
    assert!(partial.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn revoked_code_retrieves_nothing() {
    let tmp = TempDir::new().unwrap();
    let (addr, _state) = start_exchange().await;
    let wf = workflow(tmp.path().join("root"), addr).await;

    let picked = tmp.path().join("a.txt");
    tokio::fs::write(&picked, b"a").await.unwrap();
    let published = wf
        .publish(&[PublishItem::local(&picked)])
        .await
        .unwrap()
        .upload
        .unwrap();

    assert_eq!(wf.revoke(&published.code).await.unwrap(), Deleted::Removed);
    let retrieved = wf
        .retrieve(&CodeInput::Typed(published.code.to_string()))
        .await
        .unwrap();
    assert_eq!(retrieved.outcome, FetchOutcome::NoFiles);
    assert!(
        !wf.check_code(&CodeInput::Typed(published.code.to_string()))
            .await
            .unwrap()
    );
}
