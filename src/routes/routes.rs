//! Defines routes for media upload, lookup and deletion.
//!
//! ## Structure
//! - **Upload**
//!   - `POST   /file-upload` (multipart field `file`): upload and optimize
//!
//! - **Media records**
//!   - `GET    /media` (supports limit, continuation-token): list
//!   - `POST   /media/batch`: fetch by a list of ids
//!   - `GET    /media/{id}`: fetch one record
//!   - `DELETE /media/{id}`: delete record and file
//!
//! - **Files**
//!   - `GET    /files/{filename}`: stream a stored file

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        media_handlers::{
            delete_media, download_file, get_many_media, get_media, list_media, upload_media,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router for every endpoint. Handlers pull what they need out of
/// `AppState`.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/file-upload", post(upload_media))
        .route("/media", get(list_media))
        .route("/media/batch", post(get_many_media))
        .route("/media/{id}", get(get_media).delete(delete_media))
        .route("/files/{filename}", get(download_file))
}

/// Routes with state attached and the request body capped at `max_upload_bytes`.
pub fn app(state: AppState, max_upload_bytes: usize) -> Router {
    routes()
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}
