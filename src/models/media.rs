//! Represents a stored media file and its metadata record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::{fmt, path::Path};
use uuid::Uuid;

/// Coarse classification of a stored file.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum MediaType {
    Image,
    File,
}

const IMAGE_EXTENSIONS: [&str; 8] = ["png", "jpg", "jpeg", "webp", "gif", "heic", "heif", "avif"];

impl MediaType {
    /// Classify by the extension of `filename` (case-insensitive).
    pub fn detect(filename: &str) -> Self {
        let is_image = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                IMAGE_EXTENSIONS
                    .iter()
                    .any(|candidate| candidate.eq_ignore_ascii_case(ext))
            });
        if is_image { Self::Image } else { Self::File }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "IMAGE",
            Self::File => "FILE",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for MediaType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "IMAGE" => Ok(Self::Image),
            "FILE" => Ok(Self::File),
            other => Err(format!("unknown media type `{other}`")),
        }
    }
}

/// A media record.
///
/// `filename` is the generated on-disk name (unique within the storage
/// directory); the name the client uploaded is kept in `original_filename`.
/// `size` is always the byte length of the file actually written.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    pub id: Uuid,

    /// Public URL the file is served from.
    pub url: String,

    /// Absolute or root-relative path of the payload on disk.
    #[serde(skip_serializing)]
    pub local_path: String,

    pub filename: String,

    pub original_filename: String,

    #[serde(rename = "type")]
    #[sqlx(try_from = "String")]
    pub media_type: MediaType,

    /// Size in bytes.
    pub size: i64,

    /// MD5 of the stored payload, lowercase hex.
    pub checksum: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}
