//! Upload checks and re-encoding of listing photos

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbImage};

use crate::error::{AppError, AppResult};

pub const MAX_IMAGE_BYTES: usize = 5_000_000;
const MAX_WIDTH: u32 = 1200;
const JPEG_QUALITY: u8 = 85;

/// Re-encoded image ready for storage
#[derive(Debug)]
pub struct OptimizedImage {
    pub data: Vec<u8>,
    pub content_type: &'static str,
    pub extension: &'static str,
}

/// Reject non-images and oversized files before any work is done
pub fn check_upload(content_type: Option<&str>, size: usize) -> AppResult<()> {
    if !content_type.is_some_and(|ct| ct.starts_with("image/")) {
        return Err(AppError::invalid("File must be an image"));
    }
    if size > MAX_IMAGE_BYTES {
        return Err(AppError::invalid("Image too large (max 5MB)"));
    }
    Ok(())
}

/// Shrink to at most 1200 px wide and pick the output format.
///
/// PNGs with an alpha channel stay PNG, other PNGs become JPEG, WebP stays
/// WebP, and everything else is JPEG with transparency flattened onto white.
/// The WebP encoder is lossless only, so a WebP that needs no shrinking is
/// stored as uploaded.
pub fn optimize(data: &[u8]) -> Result<OptimizedImage, image::ImageError> {
    let format = image::guess_format(data)?;
    let mut img = image::load_from_memory_with_format(data, format)?;

    if format == ImageFormat::WebP && img.width() <= MAX_WIDTH {
        return Ok(OptimizedImage {
            data: data.to_vec(),
            content_type: "image/webp",
            extension: "webp",
        });
    }

    if img.width() > MAX_WIDTH {
        img = img.resize(MAX_WIDTH, u32::MAX, FilterType::Lanczos3);
    }

    match format {
        ImageFormat::Png if img.color().has_alpha() => Ok(OptimizedImage {
            data: encode(&DynamicImage::ImageRgba8(img.to_rgba8()), ImageFormat::Png)?,
            content_type: "image/png",
            extension: "png",
        }),
        ImageFormat::WebP => {
            let img = if img.color().has_alpha() {
                DynamicImage::ImageRgba8(img.to_rgba8())
            } else {
                DynamicImage::ImageRgb8(img.to_rgb8())
            };
            Ok(OptimizedImage {
                data: encode(&img, ImageFormat::WebP)?,
                content_type: "image/webp",
                extension: "webp",
            })
        }
        _ => Ok(OptimizedImage {
            data: encode_jpeg(&flatten(&img))?,
            content_type: "image/jpeg",
            extension: "jpg",
        }),
    }
}

/// [`optimize`] on the blocking pool; undecodable data is a client error
pub async fn optimize_blocking(data: Vec<u8>) -> AppResult<OptimizedImage> {
    tokio::task::spawn_blocking(move || optimize(&data))
        .await
        .map_err(|e| AppError::Internal(format!("image task failed: {}", e)))?
        .map_err(|e| {
            tracing::debug!("Rejected image: {}", e);
            AppError::invalid("Invalid image file")
        })
}

fn encode(img: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, format)?;
    Ok(buf.into_inner())
}

fn encode_jpeg(img: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode_image(img)?;
    Ok(buf)
}

/// Composite onto a white background
fn flatten(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let blend = |c: u8| ((c as u32 * a as u32 + 255 * (255 - a as u32)) / 255) as u8;
        image::Rgb([blend(r), blend(g), blend(b)])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png(width: u32, height: u32, alpha: bool) -> Vec<u8> {
        let img = if alpha {
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 0])))
        } else {
            DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([10, 20, 30])))
        };
        encode(&img, ImageFormat::Png).unwrap()
    }

    #[test]
    fn wide_images_are_shrunk() {
        let optimized = optimize(&png(2400, 600, false)).unwrap();
        let decoded = image::load_from_memory(&optimized.data).unwrap();
        assert_eq!(decoded.width(), 1200);
        assert_eq!(decoded.height(), 300);
    }

    #[test]
    fn small_images_keep_their_size() {
        let optimized = optimize(&png(640, 480, false)).unwrap();
        let decoded = image::load_from_memory(&optimized.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (640, 480));
    }

    #[test]
    fn transparent_png_stays_png() {
        let optimized = optimize(&png(8, 8, true)).unwrap();
        assert_eq!(optimized.content_type, "image/png");
        assert_eq!(optimized.extension, "png");
    }

    #[test]
    fn opaque_png_becomes_jpeg() {
        let optimized = optimize(&png(8, 8, false)).unwrap();
        assert_eq!(optimized.content_type, "image/jpeg");
        assert_eq!(
            image::guess_format(&optimized.data).unwrap(),
            ImageFormat::Jpeg
        );
    }

    #[test]
    fn transparency_is_flattened_onto_white() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 0])));
        assert_eq!(flatten(&img).get_pixel(0, 0).0, [255, 255, 255]);
    }

    #[test]
    fn narrow_webp_is_stored_as_uploaded() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, image::Rgb([1, 2, 3])));
        let webp = encode(&img, ImageFormat::WebP).unwrap();

        let optimized = optimize(&webp).unwrap();
        assert_eq!(optimized.content_type, "image/webp");
        assert_eq!(optimized.data, webp);
    }

    #[test]
    fn wide_webp_is_shrunk_and_stays_webp() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(1600, 40, image::Rgb([1, 2, 3])));
        let webp = encode(&img, ImageFormat::WebP).unwrap();

        let optimized = optimize(&webp).unwrap();
        assert_eq!(optimized.extension, "webp");
        let decoded = image::load_from_memory(&optimized.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1200, 30));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(optimize(b"definitely not an image").is_err());
    }

    #[test]
    fn upload_checks() {
        assert!(check_upload(Some("image/jpeg"), 1024).is_ok());
        assert!(check_upload(Some("application/pdf"), 1024).is_err());
        assert!(check_upload(None, 1024).is_err());
        assert!(check_upload(Some("image/png"), MAX_IMAGE_BYTES + 1).is_err());
    }

    #[tokio::test]
    async fn blocking_wrapper_maps_decode_errors() {
        let err = optimize_blocking(b"nope".to_vec()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
