use crate::services::StorageError;
use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for errors surfaced to HTTP clients.
///
/// Rendered as `{"err": message, "status": code}` plus any extra headers.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub headers: HeaderMap,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// 416 with the `Content-Range: bytes */{size}` header clients use to
    /// learn the object length.
    pub fn range_not_satisfiable(size: u64) -> Self {
        let mut err = Self::new(
            StatusCode::RANGE_NOT_SATISFIABLE,
            format!("Requested range not satisfiable for {} bytes", size),
        );
        if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
            err.headers.insert(header::CONTENT_RANGE, value);
        }
        err
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "err": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, self.headers, body).into_response()
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => AppError::not_found("No file exists"),
            StorageError::InvalidObjectId(_)
            | StorageError::InvalidRange(_)
            | StorageError::UploadFailed(_) => AppError::bad_request(err.to_string()),
            StorageError::RangeNotSatisfiable { size } => AppError::range_not_satisfiable(size),
            StorageError::Conflict(_) => AppError::new(StatusCode::CONFLICT, err.to_string()),
            StorageError::StorageLeak { .. }
            | StorageError::ChunkSizeMismatch { .. }
            | StorageError::Sqlx(_)
            | StorageError::Io(_) => {
                tracing::error!(error = %err, "storage failure");
                AppError::internal("internal storage error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_to_statuses() {
        let cases = [
            (StorageError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (StorageError::InvalidRange("bad".into()), StatusCode::BAD_REQUEST),
            (StorageError::UploadFailed("eof".into()), StatusCode::BAD_REQUEST),
            (StorageError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                StorageError::RangeNotSatisfiable { size: 9 },
                StatusCode::RANGE_NOT_SATISFIABLE,
            ),
            (
                StorageError::Io(std::io::Error::other("disk")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }

    #[test]
    fn unsatisfiable_range_reports_object_size() {
        let err = AppError::from(StorageError::RangeNotSatisfiable { size: 1234 });
        assert_eq!(err.headers.get(header::CONTENT_RANGE).unwrap(), "bytes */1234");
    }

    #[test]
    fn internal_details_are_not_leaked() {
        let err = AppError::from(StorageError::Io(std::io::Error::other("/secret/path")));
        assert_eq!(err.message, "internal storage error");
    }
}
