use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use image::{DynamicImage, ImageFormat, RgbaImage};
use media_store::{
    db,
    imaging::{ImageOptimizer, MetadataCache, ProfileTable},
    routes::routes::app,
    services::{storage_service::StorageService, upload_service::UploadService},
    state::AppState,
};
use serde_json::{Value, json};
use std::{io::Cursor, sync::Arc};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "media-store-test-boundary";

struct TestApp {
    router: Router,
    dir: TempDir,
}

impl TestApp {
    async fn new() -> Self {
        Self::with_limit(10 * 1024 * 1024).await
    }

    async fn with_limit(max_upload_bytes: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let pool = db::connect_in_memory().await.unwrap();
        db::run_migrations(&pool).await.unwrap();

        let storage = StorageService::new(
            Arc::new(pool),
            dir.path().join("files"),
            "http://media.test",
        );
        let uploads = UploadService::new(
            storage.clone(),
            ImageOptimizer::new(Arc::new(MetadataCache::default())),
            Arc::new(ProfileTable::default()),
        );
        let router = app(AppState { storage, uploads }, max_upload_bytes);
        Self { router, dir }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn upload(&self, filename: &str, content_type: &str, data: &[u8]) -> Response {
        self.send(multipart_request("file", filename, content_type, data))
            .await
    }

    async fn get(&self, uri: &str) -> Response {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    fn stored_file_count(&self) -> usize {
        std::fs::read_dir(self.dir.path().join("files"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

fn multipart_request(field: &str, filename: &str, content_type: &str, data: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
             Content-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri("/file-upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x * 3 % 256) as u8, (y * 5 % 256) as u8, 90, 255])
    }));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn upload_then_fetch_download_and_delete() {
    let app = TestApp::new().await;

    let response = app.upload("cat.png", "image/png", &png(120, 80)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let media = json_body(response).await;

    let id = media["id"].as_str().unwrap().to_string();
    let filename = media["filename"].as_str().unwrap().to_string();
    assert!(filename.ends_with(".webp"));
    assert_eq!(media["originalFilename"], "cat.png");
    assert_eq!(media["type"], "IMAGE");
    assert_eq!(media["url"], format!("http://media.test/files/{filename}"));
    assert!(media.get("localPath").is_none());

    let fetched = json_body(app.get(&format!("/media/{id}")).await).await;
    assert_eq!(fetched["checksum"], media["checksum"]);

    let download = app.get(&format!("/files/{filename}")).await;
    assert_eq!(download.status(), StatusCode::OK);
    assert_eq!(download.headers()[header::CONTENT_TYPE], "image/webp");
    let bytes = to_bytes(download.into_body(), usize::MAX).await.unwrap();
    assert_eq!(bytes.len() as u64, media["size"].as_u64().unwrap());

    let deleted = app
        .send(
            Request::delete(format!("/media/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    assert_eq!(app.stored_file_count(), 0);

    let missing = app.get(&format!("/media/{id}")).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(missing).await["error"], "api.media.notFound");
}

#[tokio::test]
async fn corrupt_image_is_invalid_format() {
    let app = TestApp::new().await;
    let response = app.upload("broken.jpg", "image/jpeg", b"not really a jpeg").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "api.media.invalidFormat");
    assert_eq!(app.stored_file_count(), 0);
}

#[tokio::test]
async fn unsupported_file_type_is_invalid_format() {
    let app = TestApp::new().await;
    let response = app
        .upload("notes.txt", "text/plain", b"plain text is not an image")
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "api.media.invalidFormat");
}

#[tokio::test]
async fn missing_file_field_is_file_undefined() {
    let app = TestApp::new().await;
    let response = app
        .send(multipart_request("avatar", "cat.png", "image/png", &png(4, 4)))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "api.file.undefined");
}

#[tokio::test]
async fn heic_upload_is_stored_unchanged() {
    let app = TestApp::new().await;
    let payload = b"\0\0\0\x18ftypheic-opaque-payload";
    let response = app.upload("IMG_0001.HEIC", "image/heic", payload).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let media = json_body(response).await;
    let filename = media["filename"].as_str().unwrap();
    assert!(filename.ends_with(".heic"));

    let download = app.get(&format!("/files/{filename}")).await;
    let bytes = to_bytes(download.into_body(), usize::MAX).await.unwrap();
    assert_eq!(bytes.as_ref(), payload);
}

#[tokio::test]
async fn list_pages_through_all_media() {
    let app = TestApp::new().await;
    for i in 0..3 {
        let response = app
            .upload(&format!("{i}.png"), "image/png", &png(10 + i, 10))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let first = json_body(app.get("/media?limit=2").await).await;
    assert_eq!(first["media"].as_array().unwrap().len(), 2);
    assert_eq!(first["isTruncated"], true);
    let token = first["nextContinuationToken"].as_str().unwrap();

    let second = json_body(app.get(&format!("/media?limit=2&continuation-token={token}")).await).await;
    assert_eq!(second["media"].as_array().unwrap().len(), 1);
    assert_eq!(second["isTruncated"], false);
    assert!(second["nextContinuationToken"].is_null());

    let bad = app.get("/media?continuation-token=garbage").await;
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn batch_returns_known_ids_only() {
    let app = TestApp::new().await;
    let media = json_body(app.upload("a.png", "image/png", &png(8, 8)).await).await;

    let response = app
        .send(
            Request::post("/media/batch")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "ids": [media["id"], uuid::Uuid::new_v4()] }).to_string(),
                ))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let found = json_body(response).await;
    let found = found.as_array().unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["id"], media["id"]);
}

#[tokio::test]
async fn deleting_unknown_media_is_not_found() {
    let app = TestApp::new().await;
    let response = app
        .send(
            Request::delete(format!("/media/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let app = TestApp::with_limit(1024).await;
    let response = app.upload("big.png", "image/png", &vec![7u8; 4096]).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(app.stored_file_count(), 0);
}

#[tokio::test]
async fn health_endpoints() {
    let app = TestApp::new().await;
    assert_eq!(app.get("/healthz").await.status(), StatusCode::OK);

    let ready = app.get("/readyz").await;
    assert_eq!(ready.status(), StatusCode::OK);
    let body = json_body(ready).await;
    assert_eq!(body["checks"]["sqlite"]["ok"], true);
    assert_eq!(body["checks"]["disk"]["ok"], true);
}

#[tokio::test]
async fn non_multipart_upload_gets_json_error() {
    let app = TestApp::new().await;
    let response = app
        .send(
            Request::post("/file-upload")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"file":"cat.png"}"#))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "api.request.invalid");
    assert_eq!(body["status"], 400);
}
