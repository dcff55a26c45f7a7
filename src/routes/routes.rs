//! Defines routes for the media store.
//!
//! ## Structure
//! - `POST   /upload`       : multipart upload, field `file`
//! - `GET    /files`        : list all records
//! - `GET    /files/{name}` : one record, by id or display name
//! - `DELETE /files/{id}`   : delete record and chunks
//! - `GET    /image/{name}` : whole-object image delivery
//! - `GET    /video/{name}` : range-capable video delivery
//! - `GET    /healthz`, `GET /readyz`

use crate::{
    handlers::{
        file_handlers::{delete_file, get_file, get_image, get_video, list_files, upload_file},
        health_handlers::{healthz, readyz},
    },
    services::storage_service::StorageService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router. Uploads may carry up to `max_upload_bytes` of request
/// body; every other route keeps axum's default limit.
pub fn routes(max_upload_bytes: usize) -> Router<StorageService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/upload",
            post(upload_file).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/files", get(list_files))
        .route("/files/{name}", get(get_file).delete(delete_file))
        .route("/image/{name}", get(get_image))
        .route("/video/{name}", get(get_video))
}
