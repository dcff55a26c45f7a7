//! Test harness: a router backed by a scratch chunk store and SQLite file.

use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode, header},
};
use media_store::{
    config::DEFAULT_CHUNK_SIZE,
    routes::routes::routes,
    services::{
        chunk_store::ChunkStore, metadata_index::MetadataIndex, storage_service::StorageService,
    },
};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "media-store-test-boundary";
const TEST_UPLOAD_LIMIT: usize = 64 * 1024 * 1024;

/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestApp {
    pub router: Router,
    pub service: StorageService,
    _dir: TempDir,
}

#[allow(dead_code)]
impl TestApp {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let url = format!("sqlite://{}", dir.path().join("meta.db").display());
        let index = MetadataIndex::connect(&url)
            .await
            .expect("Failed to open metadata index");
        index.migrate().await.expect("Failed to apply schema");
        let chunks = ChunkStore::open(dir.path().join("chunks"), DEFAULT_CHUNK_SIZE)
            .await
            .expect("Failed to open chunk store");

        let service = StorageService::new(index, chunks);
        let router = routes(TEST_UPLOAD_LIMIT).with_state(service.clone());
        Self {
            router,
            service,
            _dir: dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Upload `data` as the `file` field and return the JSON record.
    pub async fn upload(&self, filename: &str, content_type: Option<&str>, data: &[u8]) -> Value {
        let response = self.send(upload_request(filename, content_type, data)).await;
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn get_range(&self, uri: &str, range: &str) -> Response<Body> {
        let request = Request::get(uri)
            .header(header::RANGE, range)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn delete(&self, uri: &str) -> Response<Body> {
        self.send(Request::delete(uri).body(Body::empty()).unwrap()).await
    }
}

/// Build a `multipart/form-data` upload with a single `file` field.
#[allow(dead_code)]
pub fn upload_request(filename: &str, content_type: Option<&str>, data: &[u8]) -> Request<Body> {
    let mut body = Vec::with_capacity(data.len() + 256);
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n"
        )
        .as_bytes(),
    );
    if let Some(content_type) = content_type {
        body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
    }
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::post("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

/// Deterministic bytes with no repeated neighbours, so they never contain
/// the multipart boundary.
#[allow(dead_code)]
pub fn synthetic_blob(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

#[allow(dead_code)]
pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

#[allow(dead_code)]
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

#[allow(dead_code)]
pub fn header_str<'a>(response: &'a Response<Body>, name: header::HeaderName) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}
