//! Decode, downsample and encode.

use crate::config::{DiskImageFormat, ImageCacheConfig};
use crate::error::{CacheError, Result};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader, Limits};
use std::io::Cursor;

/// Dimensions that fit `width`x`height` inside the bounds without upscaling.
///
/// `scale = min(max_w / w, max_h / h, 1.0)`, each side rounded and clamped
/// to at least one pixel.
pub fn target_dimensions(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }

    let scale = (max_width as f64 / width as f64)
        .min(max_height as f64 / height as f64)
        .min(1.0);

    let scaled = |side: u32| ((side as f64 * scale).round() as u32).max(1);
    (scaled(width), scaled(height))
}

/// Shrink `image` to fit the bounds, keeping its aspect ratio.
///
/// Images already inside the bounds are returned untouched.
pub fn downsample(image: DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    let (target_width, target_height) = target_dimensions(width, height, max_width, max_height);

    if target_width >= width && target_height >= height {
        return image;
    }

    image.resize_exact(target_width, target_height, FilterType::Triangle)
}

pub(super) fn decode_limits(config: &ImageCacheConfig) -> Limits {
    let mut limits = Limits::default();
    limits.max_image_width = Some(config.max_decode_dimension);
    limits.max_image_height = Some(config.max_decode_dimension);
    limits.max_alloc = Some(config.max_decode_alloc_bytes);
    limits
}

/// Decode with size limits; oversized or malformed input is an error, never a panic.
pub(super) fn decode(bytes: &[u8], limits: &Limits) -> Result<DynamicImage> {
    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| CacheError::Decode(e.to_string()))?;

    if reader.format().is_none() {
        return Err(CacheError::Decode("unrecognized image format".to_string()));
    }

    reader.limits(limits.clone());
    reader
        .decode()
        .map_err(|e| CacheError::Decode(e.to_string()))
}

pub(super) fn encode(image: &DynamicImage, format: DiskImageFormat) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut cursor = Cursor::new(&mut buffer);

    let result = match format {
        DiskImageFormat::Png => image.write_to(&mut cursor, ImageFormat::Png),
        // the JPEG encoder rejects alpha channels
        DiskImageFormat::Jpeg => {
            DynamicImage::ImageRgb8(image.to_rgb8()).write_to(&mut cursor, ImageFormat::Jpeg)
        }
    };

    result.map_err(|e| CacheError::Storage(format!("Failed to encode image: {}", e)))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([255, 0, 0])))
    }

    #[test]
    fn test_target_dimensions() {
        assert_eq!(target_dimensions(1600, 1200, 800, 600), (800, 600));
        assert_eq!(target_dimensions(4000, 1000, 800, 600), (800, 200));
        assert_eq!(target_dimensions(1000, 4000, 800, 600), (150, 600));
        assert_eq!(target_dimensions(100, 100, 800, 600), (100, 100));
        assert_eq!(target_dimensions(10_000, 1, 800, 600), (800, 1));
    }

    #[test]
    fn test_downsample_never_upscales() {
        let small = downsample(solid(100, 100), 800, 600);
        assert_eq!((small.width(), small.height()), (100, 100));
    }

    #[test]
    fn test_downsample_keeps_aspect_ratio() {
        let resized = downsample(solid(1600, 900), 800, 600);
        assert_eq!((resized.width(), resized.height()), (800, 450));
    }

    #[test]
    fn test_png_round_trip_keeps_pixels() {
        let encoded = encode(&solid(4, 3), DiskImageFormat::Png).unwrap();
        let decoded = decode(&encoded, &Limits::default()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
        assert_eq!(decoded.to_rgb8().get_pixel(0, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_jpeg_encoding_drops_alpha() {
        let rgba = DynamicImage::ImageRgba8(image::RgbaImage::new(8, 8));
        let encoded = encode(&rgba, DiskImageFormat::Jpeg).unwrap();
        assert_eq!(image::guess_format(&encoded).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode(b"definitely not an image", &Limits::default()).unwrap_err();
        assert!(matches!(err, CacheError::Decode(_)));
    }

    #[test]
    fn test_decode_enforces_limits() {
        let encoded = encode(&solid(64, 64), DiskImageFormat::Png).unwrap();
        let mut limits = Limits::default();
        limits.max_image_width = Some(32);
        assert!(matches!(decode(&encoded, &limits), Err(CacheError::Decode(_))));
    }
}
