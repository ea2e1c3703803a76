//! HTTP handlers for uploading, listing, fetching, downloading and deleting
//! media. Upload work is delegated to `UploadService`, records and files to
//! `StorageService`.

use crate::{
    errors::{AppError, messages},
    imaging::OutputFormat,
    models::media::Media,
    services::{
        storage_service::{ListMediaParams, MAX_PAGE_SIZE, MediaCursor, StorageService},
        upload_service::{UploadService, UploadedAsset},
    },
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State, multipart::MultipartRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

const UPLOAD_FIELD: &str = "file";
const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
pub struct ListMediaQuery {
    pub limit: Option<usize>,
    #[serde(rename = "continuation-token")]
    pub continuation_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMediaResponse {
    pub media: Vec<Media>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchMediaRequest {
    pub ids: Vec<Uuid>,
}

/// `POST /file-upload`: multipart upload, field `file`.
pub async fn upload_media(
    State(uploads): State<UploadService>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, AppError> {
    let mut multipart = multipart.map_err(|rejection| {
        warn!(error = %rejection, "upload is not a multipart request");
        AppError::invalid_request()
    })?;
    let mut asset = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        warn!(error = %err, "malformed multipart body");
        AppError::new(err.status(), messages::INVALID_REQUEST)
    })? {
        if field.name() != Some(UPLOAD_FIELD) {
            debug!(field = ?field.name(), "ignoring multipart field");
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await.map_err(|err| {
            warn!(error = %err, "failed to read uploaded file");
            AppError::new(err.status(), messages::INVALID_REQUEST)
        })?;
        asset = Some(UploadedAsset {
            data,
            filename,
            content_type,
        });
        break;
    }

    let media = uploads.upload(asset).await?;
    Ok((StatusCode::CREATED, Json(media)))
}

/// `GET /media`: one page of media, oldest first.
pub async fn list_media(
    State(storage): State<StorageService>,
    Query(q): Query<ListMediaQuery>,
) -> Result<Json<ListMediaResponse>, AppError> {
    let after = match q.continuation_token.as_deref() {
        Some(token) => Some(decode_continuation_token(token).ok_or_else(|| {
            debug!(token, "rejecting malformed continuation token");
            AppError::invalid_request()
        })?),
        None => None,
    };
    let limit = q.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    let page = storage.list_media(ListMediaParams { after, limit }).await?;

    Ok(Json(ListMediaResponse {
        media: page.media,
        is_truncated: page.is_truncated,
        next_continuation_token: page.next_cursor.as_ref().map(encode_continuation_token),
    }))
}

/// `GET /media/{id}`
pub async fn get_media(
    State(storage): State<StorageService>,
    Path(id): Path<Uuid>,
) -> Result<Json<Media>, AppError> {
    Ok(Json(storage.get_media(id).await?))
}

/// `POST /media/batch`: records for every known id in the body.
pub async fn get_many_media(
    State(storage): State<StorageService>,
    Json(req): Json<BatchMediaRequest>,
) -> Result<Json<Vec<Media>>, AppError> {
    if req.ids.len() > MAX_PAGE_SIZE {
        return Err(AppError::invalid_request());
    }
    Ok(Json(storage.get_many_media(&req.ids).await?))
}

/// `DELETE /media/{id}`: removes the record and its file.
pub async fn delete_media(
    State(storage): State<StorageService>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    storage
        .delete_media(id)
        .await
        .map_err(AppError::from_delete)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /files/{filename}`: stream a stored file.
pub async fn download_file(
    State(storage): State<StorageService>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    let (file, len) = storage.open_file(&filename).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&filename)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    *response.status_mut() = StatusCode::OK;
    Ok(response)
}

fn content_type_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if let Ok(format) = OutputFormat::parse(&ext) {
        return format.mime_type();
    }
    match ext.as_str() {
        "gif" => "image/gif",
        "heic" => "image/heic",
        "heif" => "image/heif",
        _ => "application/octet-stream",
    }
}

fn encode_continuation_token(cursor: &MediaCursor) -> String {
    let raw = format!(
        "{}|{}",
        cursor
            .created_at
            .to_rfc3339_opts(SecondsFormat::Nanos, true),
        cursor.id
    );
    general_purpose::STANDARD.encode(raw)
}

fn decode_continuation_token(token: &str) -> Option<MediaCursor> {
    let bytes = general_purpose::STANDARD.decode(token).ok()?;
    let raw = String::from_utf8(bytes).ok()?;
    let (created_at, id) = raw.split_once('|')?;
    Some(MediaCursor {
        created_at: DateTime::parse_from_rfc3339(created_at)
            .ok()?
            .with_timezone(&Utc),
        id: Uuid::parse_str(id).ok()?,
    })
}
