//! Artifact image encoder.
//!
//! Every image that enters the store is decoded, re-encoded as JPEG at the
//! configured quality, and resampled into a fixed-size thumbnail.
//!
//! # Design Decisions
//!
//! - **Always decode/encode**: generator output arrives in arbitrary formats
//!   (PNG, JPEG). It is always normalised to JPEG so the on-disk layout has
//!   a single extension.
//!
//! - **Fill, then crop**: thumbnails are exactly the configured size; the
//!   source is scaled to cover the target and the overflow is cropped.
//!
//! - **No alpha**: JPEG has no alpha channel, so images are flattened to RGB.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use std::io::Cursor;

use crate::error::StorageError;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// Default thumbnail edge length in pixels.
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 256;

/// Encoded full-size image and its thumbnail.
#[derive(Debug, Clone)]
pub struct EncodedArtifact {
    pub full: Bytes,
    pub thumbnail: Bytes,
}

// =============================================================================
// Encoder
// =============================================================================

/// Encoder producing the full-size JPEG and the thumbnail for one image.
#[derive(Debug, Clone, Copy)]
pub struct ImageEncoder {
    quality: u8,
    thumbnail_width: u32,
    thumbnail_height: u32,
}

impl ImageEncoder {
    /// Create an encoder; quality is clamped to 1-100 and thumbnail
    /// dimensions to at least 1px.
    pub fn new(quality: u8, thumbnail_width: u32, thumbnail_height: u32) -> Self {
        Self {
            quality: clamp_quality(quality),
            thumbnail_width: thumbnail_width.max(1),
            thumbnail_height: thumbnail_height.max(1),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn thumbnail_size(&self) -> (u32, u32) {
        (self.thumbnail_width, self.thumbnail_height)
    }

    /// Decode `source` (any supported format) and produce both variants.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Decode` if the bytes are not a readable image
    /// and `StorageError::Encode` if JPEG encoding fails.
    pub fn encode(&self, source: &[u8]) -> Result<EncodedArtifact, StorageError> {
        let img = decode(source)?;
        let img = DynamicImage::ImageRgb8(img.to_rgb8());

        let full = encode_jpeg(&img, self.quality)?;

        let thumb = img.resize_to_fill(
            self.thumbnail_width,
            self.thumbnail_height,
            FilterType::Triangle,
        );
        let thumbnail = encode_jpeg(&thumb, self.quality)?;

        Ok(EncodedArtifact { full, thumbnail })
    }

    /// Get image dimensions without fully decoding.
    pub fn dimensions(&self, source: &[u8]) -> Result<(u32, u32), StorageError> {
        let reader = ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(|e| StorageError::Decode {
                message: e.to_string(),
            })?;

        reader.into_dimensions().map_err(|e| StorageError::Decode {
            message: e.to_string(),
        })
    }
}

impl Default for ImageEncoder {
    fn default() -> Self {
        Self::new(
            DEFAULT_JPEG_QUALITY,
            DEFAULT_THUMBNAIL_SIZE,
            DEFAULT_THUMBNAIL_SIZE,
        )
    }
}

fn decode(source: &[u8]) -> Result<DynamicImage, StorageError> {
    let reader = ImageReader::new(Cursor::new(source))
        .with_guessed_format()
        .map_err(|e| StorageError::Decode {
            message: e.to_string(),
        })?;

    reader.decode().map_err(|e| StorageError::Decode {
        message: e.to_string(),
    })
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Bytes, StorageError> {
    let mut output = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut output, quality);

    encoder
        .encode_image(img)
        .map_err(|e| StorageError::Encode {
            message: e.to_string(),
        })?;

    Ok(Bytes::from(output))
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Validate JPEG quality parameter.
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// Tests
// =============================================================================
