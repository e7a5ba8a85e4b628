//! Preview images for uploads.
//!
//! Uploads are size-checked by the caller before they get here. Thumbnails
//! keep the upload's format and never upscale.

use image::{DynamicImage, ImageError, ImageFormat, codecs::jpeg::JpegEncoder, imageops::FilterType};
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;

pub const MAX_UPLOAD_BYTES: usize = 1_000_000;
pub const THUMBNAIL_MAX_WIDTH: u32 = 200;
pub const THUMBNAIL_MAX_HEIGHT: u32 = 220;
pub const THUMBNAIL_JPEG_QUALITY: u8 = 85;
pub const ACCEPTED_FORMATS: [ImageFormat; 5] = [
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Bmp,
    ImageFormat::Gif,
    ImageFormat::WebP,
];

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("Unsupported image format")]
    UnsupportedFormat,
    #[error("Image could not be decoded: {0}")]
    Decode(#[source] ImageError),
    #[error("Thumbnail could not be encoded: {0}")]
    Encode(#[source] ImageError),
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct ImageUpload {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    /// Checks the bytes and renames the upload so its extension matches the
    /// detected format. Whatever extension the client sent is dropped.
    pub fn new(name: &str, bytes: Vec<u8>) -> Result<Self, ThumbnailError> {
        let format = detect_format(&bytes)?;
        let stem = match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => name,
        };
        let extension = format.extensions_str().first().copied().unwrap_or("img");

        Ok(Self {
            name: format!("{stem}.{extension}"),
            bytes,
        })
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Thumbnail {
    pub name: String,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

/// Sniffs the format from the bytes, ignoring whatever the client claimed.
pub fn detect_format(bytes: &[u8]) -> Result<ImageFormat, ThumbnailError> {
    image::guess_format(bytes)
        .ok()
        .filter(|format| ACCEPTED_FORMATS.contains(format))
        .ok_or(ThumbnailError::UnsupportedFormat)
}

/// Largest size within the thumbnail box with the same aspect ratio.
#[must_use]
pub fn thumbnail_dimensions(width: u32, height: u32) -> (u32, u32) {
    if width <= THUMBNAIL_MAX_WIDTH && height <= THUMBNAIL_MAX_HEIGHT {
        return (width, height);
    }

    let (width, height) = (u64::from(width), u64::from(height));
    let (max_width, max_height) = (
        u64::from(THUMBNAIL_MAX_WIDTH),
        u64::from(THUMBNAIL_MAX_HEIGHT),
    );

    let (new_width, new_height) = if width * max_height > height * max_width {
        (max_width, (height * max_width + width / 2) / width)
    } else {
        ((width * max_height + height / 2) / height, max_height)
    };

    (
        u32::try_from(new_width.clamp(1, max_width)).unwrap_or(THUMBNAIL_MAX_WIDTH),
        u32::try_from(new_height.clamp(1, max_height)).unwrap_or(THUMBNAIL_MAX_HEIGHT),
    )
}

pub fn make_thumbnail(upload: &ImageUpload) -> Result<Thumbnail, ThumbnailError> {
    let format = detect_format(&upload.bytes)?;
    let original =
        image::load_from_memory_with_format(&upload.bytes, format).map_err(ThumbnailError::Decode)?;

    let (width, height) = thumbnail_dimensions(original.width(), original.height());
    let resized = if (width, height) == (original.width(), original.height()) {
        original
    } else {
        original.resize_exact(width, height, FilterType::Lanczos3)
    };

    let bytes = encode(&resized, format).map_err(ThumbnailError::Encode)?;
    debug!(name = %upload.name, ?format, width, height, "Generated thumbnail");

    Ok(Thumbnail {
        name: format!("thumb_{}", upload.name),
        format,
        width,
        height,
        bytes,
    })
}

fn encode(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, ImageError> {
    let mut bytes = Vec::new();

    if format == ImageFormat::Jpeg {
        let encoder = JpegEncoder::new_with_quality(&mut bytes, THUMBNAIL_JPEG_QUALITY);
        DynamicImage::ImageRgb8(image.to_rgb8()).write_with_encoder(encoder)?;
    } else {
        image.write_to(&mut Cursor::new(&mut bytes), format)?;
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let image = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), format)
            .unwrap();
        bytes
    }

    fn upload(name: &str, bytes: Vec<u8>) -> ImageUpload {
        ImageUpload {
            name: name.to_owned(),
            bytes,
        }
    }

    #[test]
    fn dimensions_fit_box_and_keep_ratio() {
        assert_eq!(thumbnail_dimensions(1000, 500), (200, 100));
        assert_eq!(thumbnail_dimensions(300, 1000), (66, 220));
        assert_eq!(thumbnail_dimensions(400, 440), (200, 220));
        assert_eq!(thumbnail_dimensions(5000, 1), (200, 1));
    }

    #[test]
    fn small_images_are_not_upscaled() {
        assert_eq!(thumbnail_dimensions(100, 50), (100, 50));
        assert_eq!(thumbnail_dimensions(200, 220), (200, 220));
    }

    #[test]
    fn ratio_is_preserved_within_rounding() {
        for (width, height) in [(640, 480), (1920, 1080), (333, 777), (1001, 999)] {
            let (new_width, new_height) = thumbnail_dimensions(width, height);
            assert!(new_width <= THUMBNAIL_MAX_WIDTH && new_height <= THUMBNAIL_MAX_HEIGHT);

            let original = f64::from(width) / f64::from(height);
            let scaled = f64::from(new_width) / f64::from(new_height);
            let tolerance = original / f64::from(new_height.min(new_width));
            assert!(
                (original - scaled).abs() <= tolerance,
                "{width}x{height} -> {new_width}x{new_height}"
            );
        }
    }

    #[test]
    fn png_thumbnail() {
        let thumbnail = make_thumbnail(&upload("cat.png", encoded(800, 600, ImageFormat::Png))).unwrap();

        assert_eq!(thumbnail.name, "thumb_cat.png");
        assert_eq!(thumbnail.format, ImageFormat::Png);
        let decoded = image::load_from_memory(&thumbnail.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (200, 150));
    }

    #[test]
    fn jpeg_stays_jpeg() {
        let thumbnail =
            make_thumbnail(&upload("dog.jpg", encoded(300, 900, ImageFormat::Jpeg))).unwrap();

        assert_eq!(image::guess_format(&thumbnail.bytes).unwrap(), ImageFormat::Jpeg);
        assert_eq!((thumbnail.width, thumbnail.height), (73, 220));
    }

    #[test]
    fn unsupported_format_is_rejected_before_decoding() {
        assert!(matches!(
            make_thumbnail(&upload("notes.txt", b"just some text".to_vec())),
            Err(ThumbnailError::UnsupportedFormat)
        ));
        assert!(matches!(
            detect_format(b"II*\0\x08\0\0\0"),
            Err(ThumbnailError::UnsupportedFormat)
        ));
    }

    #[test]
    fn upload_extension_follows_detected_format() {
        let mut png = encoded(300, 300, ImageFormat::Png);
        png.extend_from_slice(b"<script>alert(document.cookie)</script>");

        let upload = ImageUpload::new("evil.html", png).unwrap();
        assert_eq!(upload.name, "evil.png");
        assert_eq!(make_thumbnail(&upload).unwrap().name, "thumb_evil.png");

        let jpeg = encoded(10, 10, ImageFormat::Jpeg);
        assert_eq!(ImageUpload::new("photo.JPEG", jpeg.clone()).unwrap().name, "photo.jpg");
        assert_eq!(ImageUpload::new("noext", jpeg).unwrap().name, "noext.jpg");
        assert!(matches!(
            ImageUpload::new("notes.png", b"just some text".to_vec()),
            Err(ThumbnailError::UnsupportedFormat)
        ));
    }

    #[test]
    fn corrupt_image_fails_to_decode() {
        let mut bytes = encoded(50, 50, ImageFormat::Png);
        bytes.truncate(40);

        assert!(matches!(
            make_thumbnail(&upload("broken.png", bytes)),
            Err(ThumbnailError::Decode(_))
        ));
    }
}
