//! Image validation, metadata extraction and optimization.
//!
//! - [`cache`]: fingerprint-keyed metadata cache with lazy TTL eviction
//! - [`profiles`]: compression profiles and size-based selection
//! - [`optimizer`]: decode → orient → resize → encode pipeline
//! - [`encode`], [`orientation`]: the codec and EXIF helpers it is built from

pub mod cache;
pub mod encode;
pub mod optimizer;
pub mod orientation;
pub mod profiles;

pub use cache::{CacheStats, MetadataCache, fingerprint};
pub use optimizer::{ImageOptimizer, OptimizeRequest, is_opaque_filename};
pub use profiles::{OptimizationProfile, OptimizeOptions, OutputFormat, ProfileTable};

use serde::Serialize;
use thiserror::Error;

/// Header-level facts about an image.
///
/// Opaque formats (HEIC/HEIF) are never decoded, so their geometry is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub format: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub opaque: bool,
}

impl ImageMetadata {
    pub fn opaque(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            width: None,
            height: None,
            opaque: true,
        }
    }

    /// True when both dimensions are known and nonzero.
    pub fn has_geometry(&self) -> bool {
        matches!((self.width, self.height), (Some(w), Some(h)) if w > 0 && h > 0)
    }

    pub fn pixel_count(&self) -> Option<u64> {
        Some(u64::from(self.width?) * u64::from(self.height?))
    }
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("invalid image format: {0}")]
    InvalidFormat(String),
    #[error("image of {width}x{height} exceeds the input pixel limit")]
    TooLarge { width: u32, height: u32 },
    #[error("unsupported output format `{0}`")]
    UnsupportedOutput(String),
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("image task failed: {0}")]
    Task(String),
}

impl From<image::ImageError> for ImageError {
    fn from(err: image::ImageError) -> Self {
        ImageError::InvalidFormat(err.to_string())
    }
}

pub type ImageResult<T> = Result<T, ImageError>;
