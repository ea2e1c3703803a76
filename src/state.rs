use crate::services::{storage_service::StorageService, upload_service::UploadService};
use axum::extract::FromRef;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,
    pub uploads: UploadService,
}

impl FromRef<AppState> for StorageService {
    fn from_ref(state: &AppState) -> Self {
        state.storage.clone()
    }
}

impl FromRef<AppState> for UploadService {
    fn from_ref(state: &AppState) -> Self {
        state.uploads.clone()
    }
}
