use crate::config::OutputFormat;
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransformError {
    /// The source could not be decoded: corrupt, truncated or unsupported.
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Encode error: {0}")]
    Encode(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransformError {
    pub fn is_decode(&self) -> bool {
        matches!(self, TransformError::Decode(_))
    }
}

/// The pixel pipeline behind the cache.
///
/// Implementations are synchronous and CPU bound; the engine always calls them
/// from the blocking thread pool.
pub trait ImageTransformer: Send + Sync {
    /// Intrinsic `(width, height)` of the source image.
    fn dimensions(&self, source: &Path) -> Result<(u32, u32), TransformError>;

    /// Decodes `source`, resizes it to exactly `width`×`height` and encodes it.
    fn resize(
        &self,
        source: &Path,
        width: u32,
        height: u32,
        format: OutputFormat,
        quality: u8,
    ) -> Result<Vec<u8>, TransformError>;
}

/// [`ImageTransformer`] backed by the `image` crate, with `webp` for lossy WebP.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateTransformer;

impl ImageTransformer for ImageCrateTransformer {
    fn dimensions(&self, source: &Path) -> Result<(u32, u32), TransformError> {
        image::image_dimensions(source).map_err(map_image_error)
    }

    fn resize(
        &self,
        source: &Path,
        width: u32,
        height: u32,
        format: OutputFormat,
        quality: u8,
    ) -> Result<Vec<u8>, TransformError> {
        let bytes = std::fs::read(source)?;
        let img = decode_image(&bytes)?;
        let resized = resize_image(img, width, height);
        encode_image(&resized, format, quality)
    }
}

fn map_image_error(e: image::ImageError) -> TransformError {
    match e {
        image::ImageError::IoError(io) => TransformError::Io(io),
        other => TransformError::Decode(other.to_string()),
    }
}

/// Decodes raw image bytes into memory-resident representation.
///
/// Format is sniffed from magic bytes rather than trusted from the file
/// extension.
///
/// # Errors
/// Returns `TransformError::Decode` if the format cannot be detected or the
/// data is corrupted.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, TransformError> {
    let guessed = image::guess_format(bytes).map_err(|e| TransformError::Decode(e.to_string()))?;
    image::load_from_memory_with_format(bytes, guessed).map_err(|e| TransformError::Decode(e.to_string()))
}

/// Resizes to exact dimensions with Lanczos3 resampling.
///
/// Callers compute `height` from the source aspect ratio, so no distortion is
/// introduced here. Both dimensions are clamped to at least one pixel.
pub fn resize_image(img: DynamicImage, width: u32, height: u32) -> DynamicImage {
    if img.width() == width && img.height() == height {
        return img;
    }
    img.resize_exact(width.max(1), height.max(1), image::imageops::FilterType::Lanczos3)
}

/// Encodes image to specified format with quality control.
///
/// Format-specific encoding strategies:
/// - **JPEG**: RGB color space, DCT-based lossy compression
/// - **PNG**: lossless, quality is ignored
/// - **WebP**: RGBA lossy encoding via libwebp
/// - **AVIF**: RGBA with AV1 compression (slowest, best compression)
///
/// Quality is clamped to `[1, 100]`.
///
/// # Errors
/// Returns `TransformError::Encode` on encoder failures.
pub fn encode_image(img: &DynamicImage, fmt: OutputFormat, quality: u8) -> Result<Vec<u8>, TransformError> {
    let mut out = Vec::new();
    let q = quality.clamp(1, 100);

    match fmt {
        OutputFormat::jpeg => {
            let rgb = img.to_rgb8();
            let (w, h) = rgb.dimensions();
            JpegEncoder::new_with_quality(&mut out, q)
                .write_image(rgb.as_raw(), w, h, ExtendedColorType::Rgb8)
                .map_err(|e| TransformError::Encode(e.to_string()))?;
        }
        OutputFormat::png => {
            let rgba = img.to_rgba8();
            let (w, h) = rgba.dimensions();
            PngEncoder::new(&mut out)
                .write_image(rgba.as_raw(), w, h, ExtendedColorType::Rgba8)
                .map_err(|e| TransformError::Encode(e.to_string()))?;
        }
        OutputFormat::webp => {
            let rgba = img.to_rgba8();
            let (w, h) = rgba.dimensions();
            let encoded = webp::Encoder::from_rgba(rgba.as_raw(), w, h).encode(q as f32);
            out.extend_from_slice(&encoded);
        }
        OutputFormat::avif => {
            let rgba = img.to_rgba8();
            let (w, h) = rgba.dimensions();
            // Speed 4 balances encoding time and compression ratio
            AvifEncoder::new_with_speed_quality(&mut out, 4, q)
                .write_image(rgba.as_raw(), w, h, ExtendedColorType::Rgba8)
                .map_err(|e| TransformError::Encode(e.to_string()))?;
        }
    }

    if out.is_empty() {
        return Err(TransformError::Encode(format!("{} encoder produced no data", fmt)));
    }
    Ok(out)
}
