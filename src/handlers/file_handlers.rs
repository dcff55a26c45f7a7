//! HTTP handlers for uploading, listing, streaming and deleting files.
//! Bodies are streamed in both directions and storage concerns are delegated
//! to `StorageService`.

use crate::{
    errors::AppError,
    models::object::{ContentKind, StoredObject},
    services::storage_service::{ObjectBody, StorageService},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde_json::json;
use std::io;

/// Multipart field carrying the uploaded file.
const FILE_FIELD: &str = "file";
const FALLBACK_FILENAME: &str = "upload";
/// IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// `POST /upload`: stream the `file` field of a multipart form into storage.
pub async fn upload_file(
    State(service): State<StorageService>,
    mut multipart: Multipart,
) -> Result<Json<StoredObject>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::new(err.status(), err.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let display_name = field
            .file_name()
            .filter(|name| !name.is_empty())
            .unwrap_or(FALLBACK_FILENAME)
            .to_string();
        let content_type = field.content_type().map(str::to_string);
        let stream = field.map(|chunk| chunk.map_err(io::Error::other));

        let object = service
            .upload(&display_name, content_type.as_deref(), stream)
            .await?;
        return Ok(Json(object));
    }

    Err(AppError::bad_request(format!(
        "multipart field `{}` is missing",
        FILE_FIELD
    )))
}

/// `GET /files`: every record as JSON.
pub async fn list_files(
    State(service): State<StorageService>,
) -> Result<Json<Vec<StoredObject>>, AppError> {
    let files = service.list().await?;
    if files.is_empty() {
        return Err(AppError::not_found("No files exists"));
    }
    Ok(Json(files))
}

/// `GET /files/{name}`: one record, by id or display name.
pub async fn get_file(
    State(service): State<StorageService>,
    Path(name): Path<String>,
) -> Result<Json<StoredObject>, AppError> {
    Ok(Json(service.resolve(&name).await?))
}

/// `GET /image/{name}`: whole-object delivery for image content.
pub async fn get_image(
    State(service): State<StorageService>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let object = service.resolve(&name).await?;
    if object.kind != ContentKind::Image {
        return Err(AppError::not_found("Not an image"));
    }

    let body = service.read(object, None).await?;
    Ok(object_response(body, false))
}

/// `GET /video/{name}`: range-capable delivery for video content.
pub async fn get_video(
    State(service): State<StorageService>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let object = service.resolve(&name).await?;
    if object.kind != ContentKind::Video {
        return Err(AppError::not_found("Not a video"));
    }

    let range = match headers.get(header::RANGE) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| AppError::bad_request("Range header is not valid ASCII"))?,
        ),
        None => None,
    };

    let body = service.read(object, range).await?;
    Ok(object_response(body, true))
}

/// `DELETE /files/{id}`: remove the record and its chunks.
pub async fn delete_file(
    State(service): State<StorageService>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !service.delete(&id).await? {
        return Err(AppError::not_found("No file exists"));
    }
    Ok(Json(json!({ "deleted": id })))
}

/// Build a 200 or 206 streaming response for `body`.
fn object_response(body: ObjectBody, accept_ranges: bool) -> Response {
    let content_length = body.content_length();
    let ObjectBody {
        object,
        range,
        stream,
    } = body;

    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    set_object_headers(headers, &object, content_length);

    if accept_ranges {
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    }
    match range {
        Some(range) => {
            if let Ok(value) = HeaderValue::from_str(&range.content_range(object.size())) {
                headers.insert(header::CONTENT_RANGE, value);
            }
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
        }
        None => *response.status_mut() = StatusCode::OK,
    }
    response
}

fn set_object_headers(headers: &mut HeaderMap, meta: &StoredObject, length: u64) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&meta.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));

    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.md5)) {
        headers.insert(header::ETAG, value);
    }
    let last_modified = meta.created_at.format(HTTP_DATE_FORMAT).to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
