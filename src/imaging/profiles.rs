//! Compression profiles and the size-based profile selection rules.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

use super::ImageError;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Above this size (MiB) an upload is always optimized.
const ALWAYS_OPTIMIZE_MIB: f64 = 5.0;
/// Above this pixel count an upload is optimized regardless of size.
const ALWAYS_OPTIMIZE_PIXELS: u64 = 4_000_000;
/// Above this size (MiB) an upload is optimized.
const OPTIMIZE_MIB: f64 = 1.0;

/// Reference frame used by [`ProfileTable::estimate_compression_ratio`].
const FULL_HD_PIXELS: f64 = 1920.0 * 1080.0;

/// Encodings the optimizer can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    WebP,
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Result<Self, ImageError> {
        match value.to_ascii_lowercase().as_str() {
            "webp" => Ok(Self::WebP),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            other => Err(ImageError::UnsupportedOutput(other.to_string())),
        }
    }

    /// File extension used for stored files.
    pub fn extension(self) -> &'static str {
        match self {
            Self::WebP => "webp",
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::WebP => "image/webp",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::WebP => "webp",
            Self::Jpeg => "jpeg",
            Self::Png => "png",
        })
    }
}

/// A named bundle of target box, quality and encoder effort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationProfile {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// 0 to 100.
    pub quality: u8,
    pub format: OutputFormat,
    /// Encoder speed/size knob, independent of quality. Higher is slower.
    pub effort: u8,
}

impl OptimizationProfile {
    pub fn new(
        name: impl Into<String>,
        width: u32,
        height: u32,
        quality: u8,
        format: OutputFormat,
        effort: u8,
    ) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            quality: quality.min(100),
            format,
            effort,
        }
    }
}

/// Options consumed by [`ImageOptimizer::optimize_image`](super::ImageOptimizer::optimize_image).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimizeOptions {
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    pub format: OutputFormat,
    pub effort: u8,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            width: 800,
            height: 800,
            quality: 80,
            format: OutputFormat::WebP,
            effort: 2,
        }
    }
}

impl OptimizeOptions {
    /// Options used when an upload is small enough to skip profile selection.
    pub fn fast_default() -> Self {
        Self {
            quality: 95,
            ..Self::default()
        }
    }
}

impl From<&OptimizationProfile> for OptimizeOptions {
    fn from(profile: &OptimizationProfile) -> Self {
        Self {
            width: profile.width,
            height: profile.height,
            quality: profile.quality,
            format: profile.format,
            effort: profile.effort,
        }
    }
}

/// Size buckets that map an upload to one of the built-in profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeTier {
    Small,
    Medium,
    Large,
    Original,
}

impl SizeTier {
    /// Lower bounds are inclusive: exactly 0.5, 2 or 10 MiB select the upper bucket.
    pub fn for_size(file_size_bytes: u64) -> Self {
        let mib = file_size_bytes as f64 / BYTES_PER_MIB;
        if mib < 0.5 {
            Self::Small
        } else if mib < 2.0 {
            Self::Medium
        } else if mib < 10.0 {
            Self::Large
        } else {
            Self::Original
        }
    }

    pub fn profile_name(self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::Original => "original",
        }
    }

    fn builtin(self) -> OptimizationProfile {
        match self {
            Self::Small => OptimizationProfile::new("small", 400, 400, 75, OutputFormat::WebP, 2),
            Self::Medium => OptimizationProfile::new("medium", 800, 800, 80, OutputFormat::WebP, 2),
            Self::Large => OptimizationProfile::new("large", 1200, 1200, 85, OutputFormat::WebP, 3),
            Self::Original => {
                OptimizationProfile::new("original", 1920, 1920, 90, OutputFormat::WebP, 4)
            }
        }
    }
}

/// Immutable set of named profiles.
///
/// Overrides never mutate a table in place; [`ProfileTable::with_profile`]
/// returns a new table, so a table shared between requests never changes
/// underneath them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileTable {
    profiles: BTreeMap<String, OptimizationProfile>,
}

impl Default for ProfileTable {
    fn default() -> Self {
        let thumbnail = OptimizationProfile::new("thumbnail", 200, 200, 70, OutputFormat::WebP, 1);
        let profiles = std::iter::once(thumbnail)
            .chain(
                [
                    SizeTier::Small,
                    SizeTier::Medium,
                    SizeTier::Large,
                    SizeTier::Original,
                ]
                .into_iter()
                .map(SizeTier::builtin),
            )
            .map(|profile| (profile.name.clone(), profile))
            .collect();
        Self { profiles }
    }
}

impl ProfileTable {
    /// Copy of this table with `profile` registered, replacing any profile of the same name.
    pub fn with_profile(&self, profile: OptimizationProfile) -> Self {
        let mut profiles = self.profiles.clone();
        profiles.insert(profile.name.clone(), profile);
        Self { profiles }
    }

    pub fn profile(&self, name: &str) -> Option<&OptimizationProfile> {
        self.profiles.get(name)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &OptimizationProfile> {
        self.profiles.values()
    }

    /// Pick the profile for an upload of `file_size_bytes`.
    pub fn select_profile(&self, file_size_bytes: u64) -> OptimizationProfile {
        let tier = SizeTier::for_size(file_size_bytes);
        self.profile(tier.profile_name())
            .cloned()
            .unwrap_or_else(|| tier.builtin())
    }

    pub fn profile_to_options(&self, profile: &OptimizationProfile) -> OptimizeOptions {
        OptimizeOptions::from(profile)
    }

    /// Whether the upload warrants the full profile-driven pipeline rather
    /// than [`OptimizeOptions::fast_default`].
    pub fn should_optimize(
        &self,
        file_size_bytes: u64,
        width: Option<u32>,
        height: Option<u32>,
    ) -> bool {
        let mib = file_size_bytes as f64 / BYTES_PER_MIB;
        if mib > ALWAYS_OPTIMIZE_MIB {
            return true;
        }

        if let (Some(width), Some(height)) = (width, height) {
            if u64::from(width) * u64::from(height) > ALWAYS_OPTIMIZE_PIXELS {
                return true;
            }
        }

        mib > OPTIMIZE_MIB
    }

    /// Rough output/input size ratio for `profile`, capped at 0.9.
    pub fn estimate_compression_ratio(
        &self,
        _original_size: u64,
        profile: &OptimizationProfile,
    ) -> f64 {
        let quality_factor = f64::from(profile.quality) / 100.0;
        let size_factor = f64::from(profile.width) * f64::from(profile.height) / FULL_HD_PIXELS;
        (quality_factor * size_factor).min(0.9)
    }
}
