//! Media upload service with an image optimization pipeline.
//!
//! Uploads are screened, validated, resized and re-encoded before they are
//! written to disk and recorded in SQLite.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod imaging;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
