//! Image optimizer: header validation, metadata, resize/re-encode and thumbnails.
//!
//! Every entry point is synchronous and CPU-bound. Async callers should run
//! them on the blocking pool (see [`ImageOptimizer::optimize_images`]).

use bytes::Bytes;
use image::{DynamicImage, ImageFormat, ImageReader, imageops::FilterType};
use std::{io::Cursor, sync::Arc};
use tracing::{debug, info, warn};

use super::{
    ImageError, ImageMetadata, ImageResult, MetadataCache, OptimizeOptions, OutputFormat,
    encode::encode_image, fingerprint, orientation::auto_orient,
};

/// Largest input accepted for decoding (16383 × 16383).
pub const MAX_INPUT_PIXELS: u64 = 268_402_689;

pub const DEFAULT_THUMBNAIL_SIZE: u32 = 200;
const THUMBNAIL_QUALITY: u8 = 70;
const THUMBNAIL_EFFORT: u8 = 1;

const OPAQUE_EXTENSIONS: [&str; 2] = [".heic", ".heif"];

/// True for filenames whose encoding is passed through untouched (HEIC/HEIF).
pub fn is_opaque_filename(filename: &str) -> bool {
    let lower = filename.to_ascii_lowercase();
    OPAQUE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn is_opaque(filename: Option<&str>) -> bool {
    filename.is_some_and(is_opaque_filename)
}

/// One entry of a batch passed to [`ImageOptimizer::optimize_images`].
#[derive(Debug, Clone)]
pub struct OptimizeRequest {
    pub data: Bytes,
    pub options: OptimizeOptions,
    pub filename: Option<String>,
}

#[derive(Clone)]
pub struct ImageOptimizer {
    cache: Arc<MetadataCache>,
}

impl ImageOptimizer {
    pub fn new(cache: Arc<MetadataCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    /// Never fails: anything that cannot be read as an image with nonzero
    /// dimensions is reported as `false`.
    pub fn validate_image(&self, data: &[u8], filename: Option<&str>) -> bool {
        if is_opaque(filename) {
            return true;
        }
        match self.header(data) {
            Ok(metadata) => metadata.has_geometry(),
            Err(err) => {
                debug!(error = %err, "image validation failed");
                false
            }
        }
    }

    pub fn image_metadata(&self, data: &[u8], filename: Option<&str>) -> ImageResult<ImageMetadata> {
        if is_opaque(filename) {
            return Ok(ImageMetadata::opaque("heic"));
        }
        self.header(data)
    }

    /// Orient, shrink to fit inside the target box and re-encode.
    ///
    /// Opaque formats come back unchanged. Images already inside the box are
    /// re-encoded at their original size, never enlarged.
    pub fn optimize_image(
        &self,
        data: &[u8],
        options: &OptimizeOptions,
        filename: Option<&str>,
    ) -> ImageResult<Vec<u8>> {
        let name = filename.unwrap_or("unknown");
        info!(filename = name, bytes = data.len(), "optimizing image");

        if is_opaque(filename) {
            info!(filename = name, "opaque format, keeping original bytes");
            return Ok(data.to_vec());
        }

        debug!(
            width = options.width,
            height = options.height,
            quality = options.quality,
            format = %options.format,
            effort = options.effort,
            "optimize options"
        );

        let result = self
            .decode(data)
            .map(|img| fit_inside(img, options.width, options.height))
            .and_then(|img| encode_image(&img, options.format, options.quality, options.effort));

        match result {
            Ok(encoded) => {
                info!(
                    filename = name,
                    before = data.len(),
                    after = encoded.len(),
                    "optimization finished"
                );
                Ok(encoded)
            }
            Err(err) => {
                warn!(filename = name, error = %err, "optimization failed");
                Err(err)
            }
        }
    }

    /// Square `size`×`size` WebP preview, cropped to cover.
    pub fn generate_thumbnail(
        &self,
        data: &[u8],
        size: u32,
        filename: Option<&str>,
    ) -> ImageResult<Vec<u8>> {
        if is_opaque(filename) {
            return Ok(data.to_vec());
        }
        let size = size.max(1);
        let img = self.decode(data)?;
        let thumb = img.resize_to_fill(size, size, FilterType::Triangle);
        encode_image(&thumb, OutputFormat::WebP, THUMBNAIL_QUALITY, THUMBNAIL_EFFORT)
    }

    /// Optimize every request concurrently on the blocking pool.
    ///
    /// Results line up with `requests`. A failing item does not cancel or
    /// fail the others; each slot carries its own outcome.
    pub async fn optimize_images(&self, requests: Vec<OptimizeRequest>) -> Vec<ImageResult<Vec<u8>>> {
        let tasks = requests.into_iter().map(|request| {
            let optimizer = self.clone();
            tokio::task::spawn_blocking(move || {
                optimizer.optimize_image(
                    &request.data,
                    &request.options,
                    request.filename.as_deref(),
                )
            })
        });

        futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap_or_else(|err| Err(ImageError::Task(err.to_string()))))
            .collect()
    }

    /// Header metadata, served from the cache while fresh.
    fn header(&self, data: &[u8]) -> ImageResult<ImageMetadata> {
        let key = fingerprint(data);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }
        let metadata = read_header(data)?;
        self.cache.put(key, metadata.clone());
        Ok(metadata)
    }

    fn decode(&self, data: &[u8]) -> ImageResult<DynamicImage> {
        let header = self.header(data)?;
        if header.pixel_count().is_some_and(|pixels| pixels > MAX_INPUT_PIXELS) {
            return Err(ImageError::TooLarge {
                width: header.width.unwrap_or_default(),
                height: header.height.unwrap_or_default(),
            });
        }
        let img = image::load_from_memory(data)?;
        Ok(auto_orient(img, data))
    }
}

fn read_header(data: &[u8]) -> ImageResult<ImageMetadata> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| ImageError::InvalidFormat(e.to_string()))?;
    let format = reader
        .format()
        .ok_or_else(|| ImageError::InvalidFormat("unrecognized image signature".into()))?;
    let (width, height) = reader.into_dimensions()?;
    if width == 0 || height == 0 {
        return Err(ImageError::InvalidFormat(format!(
            "degenerate dimensions {width}x{height}"
        )));
    }
    Ok(ImageMetadata {
        format: format_name(format),
        width: Some(width),
        height: Some(height),
        opaque: false,
    })
}

fn format_name(format: ImageFormat) -> String {
    match format {
        ImageFormat::Jpeg => "jpeg".to_string(),
        other => other
            .extensions_str()
            .first()
            .map(|ext| ext.to_string())
            .unwrap_or_else(|| format!("{other:?}").to_lowercase()),
    }
}

fn fit_inside(img: DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    let (max_width, max_height) = (max_width.max(1), max_height.max(1));
    if img.width() <= max_width && img.height() <= max_height {
        return img;
    }
    img.resize(max_width, max_height, FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage};

    fn optimizer() -> ImageOptimizer {
        ImageOptimizer::new(Arc::new(MetadataCache::default()))
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn dimensions(data: &[u8]) -> (u32, u32) {
        image::load_from_memory(data).unwrap().dimensions()
    }

    fn options(width: u32, height: u32, format: OutputFormat) -> OptimizeOptions {
        OptimizeOptions {
            width,
            height,
            quality: 80,
            format,
            effort: 2,
        }
    }

    #[test]
    fn test_validate_image() {
        let opt = optimizer();
        assert!(opt.validate_image(&png(32, 16), Some("a.png")));
        assert!(opt.validate_image(&png(32, 16), None));
        assert!(!opt.validate_image(b"definitely not an image", Some("a.png")));
        assert!(!opt.validate_image(&[], None));
    }

    #[test]
    fn test_validate_truncated_png() {
        let data = png(32, 16);
        assert!(!optimizer().validate_image(&data[..12], None));
    }

    #[test]
    fn test_opaque_filenames_skip_decoding() {
        let opt = optimizer();
        assert!(opt.validate_image(b"opaque payload", Some("IMG_0001.HEIC")));
        assert!(opt.validate_image(b"opaque payload", Some("photo.heif")));
        assert_eq!(opt.cache().stats().misses, 0);

        let meta = opt.image_metadata(b"opaque payload", Some("a.heic")).unwrap();
        assert_eq!(meta, ImageMetadata::opaque("heic"));
        assert!(!meta.has_geometry());
    }

    #[test]
    fn test_is_opaque_filename() {
        assert!(is_opaque_filename("x.heic"));
        assert!(is_opaque_filename("X.HEIF"));
        assert!(!is_opaque_filename("heic.png"));
        assert!(!is_opaque_filename("photo.jpg"));
    }

    #[test]
    fn test_image_metadata_reports_geometry() {
        let meta = optimizer().image_metadata(&png(120, 45), Some("a.png")).unwrap();
        assert_eq!(meta.format, "png");
        assert_eq!(meta.width, Some(120));
        assert_eq!(meta.height, Some(45));
        assert!(!meta.opaque);
    }

    #[test]
    fn test_image_metadata_invalid() {
        let err = optimizer().image_metadata(b"garbage", None).unwrap_err();
        assert!(matches!(err, ImageError::InvalidFormat(_)));
    }

    #[test]
    fn test_metadata_is_cached_within_ttl() {
        let opt = optimizer();
        let data = png(64, 48);
        let first = opt.image_metadata(&data, None).unwrap();
        let second = opt.image_metadata(&data, None).unwrap();
        assert_eq!(first, second);

        let stats = opt.cache().stats();
        assert_eq!(stats.misses, 1, "decoded more than once");
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_validate_populates_cache_for_metadata() {
        let opt = optimizer();
        let data = png(10, 10);
        assert!(opt.validate_image(&data, None));
        opt.image_metadata(&data, None).unwrap();
        assert_eq!(opt.cache().stats().misses, 1);
    }

    #[test]
    fn test_invalid_buffers_are_not_cached() {
        let opt = optimizer();
        assert!(!opt.validate_image(b"garbage", None));
        assert!(!opt.validate_image(b"garbage", None));
        assert_eq!(opt.cache().stats().entries, 0);
    }

    #[test]
    fn test_optimize_fits_target_box() {
        let data = png(1000, 500);
        let out = optimizer()
            .optimize_image(&data, &options(400, 400, OutputFormat::WebP), Some("a.png"))
            .unwrap();
        let (w, h) = dimensions(&out);
        assert!(w <= 400 && h <= 400);
        assert_eq!((w, h), (400, 200));
    }

    #[test]
    fn test_optimize_never_upscales() {
        let data = png(100, 50);
        for format in [OutputFormat::WebP, OutputFormat::Jpeg, OutputFormat::Png] {
            let out = optimizer()
                .optimize_image(&data, &options(800, 800, format), None)
                .unwrap();
            assert_eq!(dimensions(&out), (100, 50), "{format}");
        }
    }

    #[test]
    fn test_optimize_applies_exif_orientation() {
        let data = crate::imaging::orientation::tests::jpeg_with_orientation(40, 20, 6);
        let out = optimizer()
            .optimize_image(&data, &options(800, 800, OutputFormat::WebP), Some("phone.jpg"))
            .unwrap();
        assert_eq!(dimensions(&out), (20, 40));
    }

    #[test]
    fn test_optimize_output_format() {
        let data = png(50, 50);
        let opt = optimizer();
        let jpeg = opt
            .optimize_image(&data, &options(20, 20, OutputFormat::Jpeg), None)
            .unwrap();
        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);
        let webp = opt
            .optimize_image(&data, &options(20, 20, OutputFormat::WebP), None)
            .unwrap();
        assert_eq!(image::guess_format(&webp).unwrap(), ImageFormat::WebP);
    }

    #[test]
    fn test_optimize_opaque_is_byte_identical() {
        let data = b"\x00\x00\x00\x18ftypheic not decodable".to_vec();
        let opt = optimizer();
        let out = opt
            .optimize_image(&data, &OptimizeOptions::default(), Some("photo.HEIC"))
            .unwrap();
        assert_eq!(out, data);
        let thumb = opt.generate_thumbnail(&data, 200, Some("photo.heic")).unwrap();
        assert_eq!(thumb, data);
    }

    #[test]
    fn test_optimize_corrupt_input_is_invalid_format() {
        let err = optimizer()
            .optimize_image(b"garbage", &OptimizeOptions::default(), Some("a.png"))
            .unwrap_err();
        assert!(matches!(err, ImageError::InvalidFormat(_)));
    }

    #[test]
    fn test_generate_thumbnail_is_square_webp() {
        let out = optimizer()
            .generate_thumbnail(&png(300, 100), 50, Some("wide.png"))
            .unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::WebP);
        assert_eq!(dimensions(&out), (50, 50));
    }

    #[tokio::test]
    async fn test_optimize_images_keeps_order_and_isolates_failures() {
        let requests = vec![
            OptimizeRequest {
                data: Bytes::from(png(100, 100)),
                options: options(50, 50, OutputFormat::Png),
                filename: Some("a.png".into()),
            },
            OptimizeRequest {
                data: Bytes::from_static(b"broken"),
                options: OptimizeOptions::default(),
                filename: Some("b.png".into()),
            },
            OptimizeRequest {
                data: Bytes::from(png(60, 30)),
                options: options(30, 30, OutputFormat::Jpeg),
                filename: Some("c.png".into()),
            },
        ];

        let results = optimizer().optimize_images(requests).await;
        assert_eq!(results.len(), 3);
        assert_eq!(dimensions(results[0].as_ref().unwrap()), (50, 50));
        assert!(matches!(results[1], Err(ImageError::InvalidFormat(_))));
        assert_eq!(dimensions(results[2].as_ref().unwrap()), (30, 15));
    }

    #[tokio::test]
    async fn test_optimize_images_empty_batch() {
        assert!(optimizer().optimize_images(Vec::new()).await.is_empty());
    }
}
