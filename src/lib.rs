//! Chunked object storage with HTTP range serving.
//!
//! Uploads are streamed into fixed-size chunks on disk, published through a
//! SQLite metadata index and served back whole or by byte range.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
