//! src/services/upload_service.rs
//!
//! UploadService: the upload pipeline. One asset per call, every step a
//! hard gate:
//!
//! screen → validate → metadata → choose options → optimize → name → store
//!
//! Everything up to naming is CPU-bound and runs on the blocking pool.

use crate::{
    imaging::{ImageError, ImageOptimizer, OptimizeOptions, ProfileTable, is_opaque_filename},
    models::media::Media,
    services::storage_service::{StorageError, StorageService},
};
use bytes::Bytes;
use std::{fmt, path::Path, sync::Arc};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const RASTER_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "gif"];
const RASTER_MIME_TYPES: [&str; 5] = [
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/webp",
    "image/gif",
];
const OPAQUE_MIME_TYPES: [(&str, &str); 2] = [("image/heic", "heic"), ("image/heif", "heif")];

/// Raw upload as received from the client. Dropped once the pipeline ends.
#[derive(Debug, Clone)]
pub struct UploadedAsset {
    pub data: Bytes,
    pub filename: String,
    pub content_type: Option<String>,
}

/// How an accepted asset is processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetKind {
    /// Decoded, resized and re-encoded.
    Raster,
    /// Stored byte-for-byte under the given lowercase extension.
    Opaque { extension: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    MissingFile,
    EmptyFile,
    UnsupportedType {
        filename: String,
        content_type: Option<String>,
    },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFile => f.write_str("no file provided"),
            Self::EmptyFile => f.write_str("file is empty"),
            Self::UnsupportedType {
                filename,
                content_type,
            } => write!(
                f,
                "`{}` ({}) is not a supported image",
                filename,
                content_type.as_deref().unwrap_or("no content type")
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screening {
    Accepted(AssetKind),
    Rejected(RejectReason),
}

fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

fn normalized_mime(content_type: Option<&str>) -> Option<String> {
    content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .filter(|ct| !ct.is_empty())
}

/// Decide from the declared name and MIME type whether an upload enters the
/// pipeline at all. Either signal is enough to accept.
pub fn screen_upload(asset: Option<&UploadedAsset>) -> Screening {
    let Some(asset) = asset else {
        return Screening::Rejected(RejectReason::MissingFile);
    };
    if asset.data.is_empty() {
        return Screening::Rejected(RejectReason::EmptyFile);
    }

    let extension = extension_of(&asset.filename);
    let mime = normalized_mime(asset.content_type.as_deref());

    if is_opaque_filename(&asset.filename) {
        if let Some(extension) = extension {
            return Screening::Accepted(AssetKind::Opaque { extension });
        }
    }
    if let Some(mime) = mime.as_deref() {
        if let Some((_, ext)) = OPAQUE_MIME_TYPES.iter().find(|(m, _)| *m == mime) {
            return Screening::Accepted(AssetKind::Opaque {
                extension: (*ext).to_string(),
            });
        }
    }

    let raster_ext = extension
        .as_deref()
        .is_some_and(|ext| RASTER_EXTENSIONS.contains(&ext));
    let raster_mime = mime
        .as_deref()
        .is_some_and(|mime| RASTER_MIME_TYPES.contains(&mime));
    if raster_ext || raster_mime {
        return Screening::Accepted(AssetKind::Raster);
    }

    Screening::Rejected(RejectReason::UnsupportedType {
        filename: asset.filename.clone(),
        content_type: asset.content_type.clone(),
    })
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload rejected: {0}")]
    Rejected(RejectReason),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("upload task failed: {0}")]
    Task(String),
}

pub type UploadResult<T> = Result<T, UploadError>;

/// Output of the CPU stage, ready to be written.
#[derive(Debug)]
pub struct OptimizedAsset {
    pub data: Vec<u8>,
    pub filename: String,
    pub size: usize,
}

#[derive(Clone)]
pub struct UploadService {
    storage: StorageService,
    optimizer: ImageOptimizer,
    profiles: Arc<ProfileTable>,
}

impl UploadService {
    pub fn new(
        storage: StorageService,
        optimizer: ImageOptimizer,
        profiles: Arc<ProfileTable>,
    ) -> Self {
        Self {
            storage,
            optimizer,
            profiles,
        }
    }

    pub fn optimizer(&self) -> &ImageOptimizer {
        &self.optimizer
    }

    pub fn profiles(&self) -> &ProfileTable {
        &self.profiles
    }

    /// Run the full pipeline for one asset and return the stored record.
    pub async fn upload(&self, asset: Option<UploadedAsset>) -> UploadResult<Media> {
        let kind = match screen_upload(asset.as_ref()) {
            Screening::Accepted(kind) => kind,
            Screening::Rejected(reason) => {
                warn!(%reason, "upload rejected by screening");
                return Err(UploadError::Rejected(reason));
            }
        };
        let Some(asset) = asset else {
            return Err(UploadError::Rejected(RejectReason::MissingFile));
        };
        let original_filename = original_name(&asset.filename);
        info!(
            filename = %original_filename,
            bytes = asset.data.len(),
            ?kind,
            "processing upload"
        );

        let optimizer = self.optimizer.clone();
        let profiles = Arc::clone(&self.profiles);
        let prepared = tokio::task::spawn_blocking(move || {
            prepare_asset(&optimizer, &profiles, &asset, &kind)
        })
        .await
        .map_err(|err| {
            error!(error = %err, "upload task panicked or was cancelled");
            UploadError::Task(err.to_string())
        })?;

        let optimized = prepared.inspect_err(|err| {
            warn!(filename = %original_filename, error = %err, "upload rejected as invalid image");
        })?;
        debug!(
            filename = %optimized.filename,
            size = optimized.size,
            "upload prepared"
        );

        let media = self
            .storage
            .store_media(&optimized.filename, &original_filename, &optimized.data)
            .await
            .inspect_err(|err| {
                error!(
                    filename = %optimized.filename,
                    error = %err,
                    "failed to persist uploaded media"
                );
            })?;

        info!(
            id = %media.id,
            filename = %media.filename,
            size = media.size,
            "upload stored"
        );
        Ok(media)
    }
}

/// Client-supplied name reduced to its final path component.
fn original_name(filename: &str) -> String {
    Path::new(filename)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(filename)
        .to_string()
}

fn prepare_asset(
    optimizer: &ImageOptimizer,
    profiles: &ProfileTable,
    asset: &UploadedAsset,
    kind: &AssetKind,
) -> UploadResult<OptimizedAsset> {
    // The optimizer recognizes opaque input by its name only.
    let hint = match kind {
        AssetKind::Raster => asset.filename.clone(),
        AssetKind::Opaque { extension } => format!("upload.{extension}"),
    };
    let hint = Some(hint.as_str());
    let data = asset.data.as_ref();

    if !optimizer.validate_image(data, hint) {
        return Err(ImageError::InvalidFormat("image failed validation".into()).into());
    }

    let metadata = optimizer.image_metadata(data, hint)?;
    let size = data.len() as u64;
    let options = if profiles.should_optimize(size, metadata.width, metadata.height) {
        let profile = profiles.select_profile(size);
        debug!(profile = %profile.name, "selected optimization profile");
        profiles.profile_to_options(&profile)
    } else {
        debug!("using fast default options");
        OptimizeOptions::fast_default()
    };

    let optimized = optimizer.optimize_image(data, &options, hint)?;

    let extension = match kind {
        AssetKind::Raster => options.format.extension(),
        AssetKind::Opaque { extension } => extension.as_str(),
    };
    let filename = format!("{}.{}", Uuid::new_v4(), extension);
    let size = optimized.len();

    Ok(OptimizedAsset {
        data: optimized,
        filename,
        size,
    })
}
