//! Core data models for the media service.
//!
//! Records map to database tables via `sqlx::FromRow` and serialize as the
//! JSON returned by the HTTP API.

pub mod media;
