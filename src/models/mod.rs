//! Core data model for the media store.
//!
//! A `StoredObject` maps cleanly to the `objects` table via `sqlx::FromRow`
//! and serializes as the JSON record returned by the API.

pub mod object;
