//! Format-specific encoders.
//!
//! Quality is honoured by the lossy encoders (WebP, JPEG). `effort` becomes
//! the libwebp method for WebP and picks the zlib level and row filter for
//! PNG. JPEG has no speed knob.

use image::{
    DynamicImage,
    codecs::{
        jpeg::JpegEncoder,
        png::{CompressionType, FilterType, PngEncoder},
    },
};
use std::io::Cursor;

use super::{ImageError, OutputFormat};

/// libwebp `method` runs from 0 (fastest) to 6 (smallest output).
const MAX_WEBP_METHOD: u8 = 6;

pub fn encode_image(
    img: &DynamicImage,
    format: OutputFormat,
    quality: u8,
    effort: u8,
) -> Result<Vec<u8>, ImageError> {
    let quality = quality.clamp(1, 100);
    match format {
        OutputFormat::WebP => encode_webp(img, quality, effort),
        OutputFormat::Jpeg => encode_jpeg(img, quality),
        OutputFormat::Png => encode_png(img, effort),
    }
}

fn encode_webp(img: &DynamicImage, quality: u8, effort: u8) -> Result<Vec<u8>, ImageError> {
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut config = webp::WebPConfig::new()
        .map_err(|_| ImageError::Encode("webp config init failed".into()))?;
    config.quality = f32::from(quality);
    config.method = i32::from(effort.min(MAX_WEBP_METHOD));
    let encoded = webp::Encoder::from_rgba(&rgba, width, height)
        .encode_advanced(&config)
        .map_err(|e| ImageError::Encode(format!("webp encode failed: {e:?}")))?;
    if encoded.is_empty() {
        return Err(ImageError::Encode("webp encoder produced no output".into()));
    }
    Ok(encoded.to_vec())
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    img.to_rgb8()
        .write_with_encoder(encoder)
        .map_err(|e| ImageError::Encode(format!("jpeg encode failed: {e}")))?;
    Ok(buf.into_inner())
}

fn encode_png(img: &DynamicImage, effort: u8) -> Result<Vec<u8>, ImageError> {
    let (compression, filter) = match effort {
        0..=2 => (CompressionType::Fast, FilterType::Sub),
        3..=4 => (CompressionType::Default, FilterType::Sub),
        _ => (CompressionType::Best, FilterType::Adaptive),
    };
    let mut buf = Cursor::new(Vec::new());
    let encoder = PngEncoder::new_with_quality(&mut buf, compression, filter);
    img.write_with_encoder(encoder)
        .map_err(|e| ImageError::Encode(format!("png encode failed: {e}")))?;
    Ok(buf.into_inner())
}
