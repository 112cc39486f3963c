use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;
use upload_server::config::UploadConfig;
use upload_server::services::events::{EventLevel, MemoryEvents};
use upload_server::services::upload_service::UploadService;
use upload_server::{AppState, create_app};

const BOUNDARY: &str = "------------------------upload7MA4YWxkTrZu0gW";

fn multipart_body(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (filename, content) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\n\
                Content-Disposition: form-data; name=\"files\"; filename=\"{filename}\"\r\n\
                Content-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn text_field(name: &str, value: &str) -> Vec<u8> {
    format!(
        "--{BOUNDARY}\r\n\
        Content-Disposition: form-data; name=\"{name}\"\r\n\r\n\
        {value}\r\n"
    )
    .into_bytes()
}

fn upload_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn app_with(config: UploadConfig) -> (Router, Arc<MemoryEvents>) {
    let events = Arc::new(MemoryEvents::new());
    let uploads = UploadService::from_config(&config).with_events(events.clone());
    (create_app(AppState::with_uploads(config, uploads)), events)
}

fn app_for(dir: &Path) -> (Router, Arc<MemoryEvents>) {
    app_with(UploadConfig::for_dir(dir))
}

async fn read_text(response: axum::response::Response) -> String {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(body.to_vec()).unwrap()
}

fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_upload_single_file() {
    let dir = tempfile::tempdir().unwrap();
    let (app, events) = app_for(dir.path());

    // Binary content including a CRLF that is not a boundary
    let content: &[u8] = b"\x00\x01binary\r\ncontent\xff";
    let response = app
        .oneshot(upload_request(multipart_body(&[("hello.bin", content)])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(read_text(response).await, "Uploaded hello.bin\n");

    assert_eq!(entries(dir.path()), vec!["hello.bin".to_string()]);
    assert_eq!(std::fs::read(dir.path().join("hello.bin")).unwrap(), content);
    assert!(
        events
            .messages(EventLevel::Info)
            .iter()
            .any(|m| m.starts_with("Uploaded hello.bin"))
    );
}

#[tokio::test]
async fn test_existing_file_is_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"original notes").unwrap();
    let (app, _) = app_for(dir.path());

    let response = app
        .oneshot(upload_request(multipart_body(&[(
            "notes.txt",
            b"replacement".as_slice(),
        )])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(read_text(response).await, "File already exists notes.txt\n");
    assert_eq!(
        std::fs::read(dir.path().join("notes.txt")).unwrap(),
        b"original notes"
    );
    assert_eq!(entries(dir.path()), vec!["notes.txt".to_string()]);
}

#[tokio::test]
async fn test_batch_continues_after_collision() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("b.txt"), b"existing").unwrap();
    let (app, _) = app_for(dir.path());

    let body = multipart_body(&[
        ("a.txt", b"first".as_slice()),
        ("b.txt", b"second".as_slice()),
        ("c.txt", b"third".as_slice()),
    ]);
    let response = app.oneshot(upload_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let text = read_text(response).await;
    assert_eq!(
        text,
        "Uploaded a.txt\nFile already exists b.txt\nUploaded c.txt\n"
    );
    assert_eq!(text.lines().filter(|l| l.starts_with("Uploaded ")).count(), 2);

    assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"first");
    assert_eq!(std::fs::read(dir.path().join("b.txt")).unwrap(), b"existing");
    assert_eq!(std::fs::read(dir.path().join("c.txt")).unwrap(), b"third");
}

#[tokio::test]
async fn test_json_report() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("taken.txt"), b"x").unwrap();
    let (app, _) = app_for(dir.path());

    let body = multipart_body(&[
        ("taken.txt", b"y".as_slice()),
        ("fresh.txt", b"z".as_slice()),
    ]);
    let mut request = upload_request(body);
    request
        .headers_mut()
        .insert(header::ACCEPT, "application/json".parse().unwrap());

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let json: Value = serde_json::from_str(&read_text(response).await).unwrap();
    let files = json["files"].as_array().unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0]["filename"], "taken.txt");
    assert_eq!(files[0]["status"], "conflict");
    assert_eq!(files[0]["stored"], false);
    assert_eq!(files[0]["message"], "File already exists taken.txt");
    assert_eq!(files[1]["filename"], "fresh.txt");
    assert_eq!(files[1]["status"], "created");
    assert_eq!(files[1]["stored"], true);
    assert!(files[1].get("message").is_none());
}

#[tokio::test]
async fn test_oversized_body_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = UploadConfig::for_dir(dir.path());
    config.max_size_mb = 1;
    let (app, _) = app_with(config);

    let big = vec![b'x'; 2 * 1024 * 1024];
    let body = multipart_body(&[("small.txt", b"tiny".as_slice()), ("big.bin", &big)]);

    // Streamed in small frames, so the first part is staged before the
    // limit is hit
    let frames: Vec<Result<Bytes, std::io::Error>> = body
        .chunks(64 * 1024)
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect();
    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from_stream(futures::stream::iter(frames)))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(entries(dir.path()).is_empty());
}

#[tokio::test]
async fn test_declared_length_over_limit_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = UploadConfig::for_dir(dir.path());
    config.max_size_mb = 1;
    let (app, _) = app_with(config);

    let big = vec![b'x'; 1024 * 1024 + 1];
    let body = multipart_body(&[("big.bin", &big)]);
    let mut request = upload_request(body.clone());
    request
        .headers_mut()
        .insert(header::CONTENT_LENGTH, body.len().to_string().parse().unwrap());

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let json: Value = serde_json::from_str(&read_text(response).await).unwrap();
    assert_eq!(json["error"], "Request body exceeds the maximum allowed limit");
    assert!(entries(dir.path()).is_empty());
}

#[tokio::test]
async fn test_traversal_filename_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let uploads = root.path().join("uploads");
    std::fs::create_dir(&uploads).unwrap();
    let (app, _) = app_for(&uploads);

    let body = multipart_body(&[
        ("../escape.txt", b"outside".as_slice()),
        ("inside.txt", b"inside".as_slice()),
    ]);
    let response = app.oneshot(upload_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let text = read_text(response).await;
    assert!(text.starts_with("Invalid filename \"../escape.txt\""));
    assert!(text.ends_with("Uploaded inside.txt\n"));

    assert!(!root.path().join("escape.txt").exists());
    assert_eq!(entries(&uploads), vec!["inside.txt".to_string()]);
}

#[tokio::test]
async fn test_other_fields_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = app_for(dir.path());

    let mut body = text_field("note", "not a file");
    body.extend(multipart_body(&[("kept.txt", b"kept".as_slice())]));
    let response = app.oneshot(upload_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(entries(dir.path()), vec!["kept.txt".to_string()]);
}

#[tokio::test]
async fn test_form_without_files_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = app_for(dir.path());

    let mut body = text_field("note", "nothing here");
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    let response = app.oneshot(upload_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json: Value = serde_json::from_str(&read_text(response).await).unwrap();
    assert_eq!(json["error"], "No files provided");
}

#[tokio::test]
async fn test_blank_file_input_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = app_for(dir.path());

    let body = multipart_body(&[("", b"".as_slice()), ("ok.txt", b"ok".as_slice())]);
    let response = app.clone().oneshot(upload_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_text(response).await, "Uploaded ok.txt\n");
    assert_eq!(entries(dir.path()), vec!["ok.txt".to_string()]);

    let response = app
        .oneshot(upload_request(multipart_body(&[("", b"".as_slice())])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json: Value = serde_json::from_str(&read_text(response).await).unwrap();
    assert_eq!(json["error"], "No files provided");
}

#[tokio::test]
async fn test_missing_upload_dir_reports_io_error() {
    let root = tempfile::tempdir().unwrap();
    let (app, events) = app_for(&root.path().join("nope"));

    let files: &[(&str, &[u8])] = &[("a.txt", b"first".as_slice()), ("b.txt", b"second".as_slice())];
    let response = app
        .clone()
        .oneshot(upload_request(multipart_body(files)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        read_text(response).await,
        "Unable to open file\nUnable to open file\n"
    );

    let errors = events.messages(EventLevel::Error);
    assert_eq!(errors.len(), 2);
    assert!(errors[0].starts_with("Unable to open staging file for a.txt"));
    assert!(errors[1].starts_with("Unable to open staging file for b.txt"));

    let mut request = upload_request(multipart_body(files));
    request
        .headers_mut()
        .insert(header::ACCEPT, "application/json".parse().unwrap());
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json: Value = serde_json::from_str(&read_text(response).await).unwrap();
    for (file, name) in json["files"].as_array().unwrap().iter().zip(["a.txt", "b.txt"]) {
        assert_eq!(file["filename"], name);
        assert_eq!(file["status"], "io_error");
        assert_eq!(file["stored"], false);
        assert_eq!(file["message"], "Unable to open file");
    }
    assert!(!root.path().join("nope").exists());
}

#[tokio::test]
async fn test_methods_not_allowed() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = app_for(dir.path());

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/upload").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert!(entries(dir.path()).is_empty());
}

#[tokio::test]
async fn test_index_page() {
    let dir = tempfile::tempdir().unwrap();
    let index = dir.path().join("index.html");
    std::fs::write(&index, "<h1>upload here</h1>").unwrap();

    let mut config = UploadConfig::for_dir(dir.path());
    config.index_file = index;
    let (app, _) = app_with(config);

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/html"));
    assert_eq!(read_text(response).await, "<h1>upload here</h1>");
}

#[tokio::test]
async fn test_missing_index_page() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = UploadConfig::for_dir(dir.path());
    config.index_file = dir.path().join("missing.html");
    let (app, _) = app_with(config);

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_concurrent_uploads_of_same_name() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = app_for(dir.path());

    let first = vec![b'a'; 256 * 1024];
    let second = vec![b'b'; 256 * 1024];

    let (one, two) = tokio::join!(
        app.clone()
            .oneshot(upload_request(multipart_body(&[("race.bin", &first)]))),
        app.clone()
            .oneshot(upload_request(multipart_body(&[("race.bin", &second)]))),
    );

    let mut statuses = vec![one.unwrap().status(), two.unwrap().status()];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);

    let stored = std::fs::read(dir.path().join("race.bin")).unwrap();
    assert!(stored == first || stored == second);
    assert_eq!(entries(dir.path()), vec!["race.bin".to_string()]);
}

#[tokio::test]
async fn test_health() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = app_for(dir.path());

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = serde_json::from_str(&read_text(response).await).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["upload_dir_available"], true);
    assert_eq!(json["post_processing"], false);
}

#[tokio::test]
async fn test_openapi_document() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = app_for(dir.path());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api-docs/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json: Value = serde_json::from_str(&read_text(response).await).unwrap();
    assert!(json["paths"]["/upload"]["post"].is_object());
    assert!(json["components"]["schemas"]["UploadReport"].is_object());
}

#[tokio::test]
async fn test_request_id_is_propagated() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = app_for(dir.path());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "trace-me-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers()["x-request-id"], "trace-me-42");
}
