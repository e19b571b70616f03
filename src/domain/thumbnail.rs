//! Thumbnail transcoding.
//!
//! Decodes raw bytes, shrinks the raster into the policy's bounding box
//! with a Lanczos filter and re-encodes it as JPEG. Every function here is
//! pure; callers on the async runtime go through
//! [`Transcoder::generate_async`] or run the steps on the blocking pool.

use crate::error::TranscodeError;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use tracing::debug;

/// Bounding box and encoding settings for derivatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailPolicy {
    pub max_width: u32,
    pub max_height: u32,
    /// JPEG quality (1-100)
    pub quality: u8,
}

impl Default for ThumbnailPolicy {
    fn default() -> Self {
        Self {
            max_width: 600,
            max_height: 600,
            quality: 85,
        }
    }
}

/// An encoded derivative.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

/// Fits `width`x`height` into the box, keeping the aspect ratio and never
/// enlarging. Returns `None` for degenerate sources.
pub fn bounded_dimensions(
    width: u32,
    height: u32,
    max_width: u32,
    max_height: u32,
) -> Option<(u32, u32)> {
    if width == 0 || height == 0 || max_width == 0 || max_height == 0 {
        return None;
    }
    if width <= max_width && height <= max_height {
        return Some((width, height));
    }

    let scale = f64::min(
        max_width as f64 / width as f64,
        max_height as f64 / height as f64,
    );
    let new_width = ((width as f64 * scale).round() as u32).clamp(1, max_width);
    let new_height = ((height as f64 * scale).round() as u32).clamp(1, max_height);
    Some((new_width, new_height))
}

#[derive(Debug, Clone, Default)]
pub struct Transcoder {
    policy: ThumbnailPolicy,
}

impl Transcoder {
    pub fn new(policy: ThumbnailPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ThumbnailPolicy {
        &self.policy
    }

    pub fn decode(&self, data: &[u8]) -> Result<DynamicImage, TranscodeError> {
        image::load_from_memory(data).map_err(|e| TranscodeError::Decode(e.to_string()))
    }

    pub fn resize(&self, image: DynamicImage) -> Result<DynamicImage, TranscodeError> {
        let (width, height) = image.dimensions();
        let (new_width, new_height) =
            bounded_dimensions(width, height, self.policy.max_width, self.policy.max_height)
                .ok_or(TranscodeError::Resize { width, height })?;

        if (new_width, new_height) == (width, height) {
            debug!(width, height, "Image already within bounds");
            return Ok(image);
        }

        debug!(
            original_width = width,
            original_height = height,
            width = new_width,
            height = new_height,
            "Resizing image"
        );
        Ok(image.resize_exact(new_width, new_height, FilterType::Lanczos3))
    }

    pub fn encode(&self, image: &DynamicImage) -> Result<Thumbnail, TranscodeError> {
        // JPEG has no alpha channel.
        let rgb = image.to_rgb8();
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, self.policy.quality)
            .encode_image(&rgb)
            .map_err(|e| TranscodeError::Encode(e.to_string()))?;

        Ok(Thumbnail {
            data: Bytes::from(buf),
            width: image.width(),
            height: image.height(),
        })
    }

    /// Decode, resize and encode in one go (blocking).
    pub fn generate(&self, data: &[u8]) -> Result<Thumbnail, TranscodeError> {
        let image = self.decode(data)?;
        let resized = self.resize(image)?;
        self.encode(&resized)
    }

    /// [`generate`](Self::generate) on the blocking thread pool.
    pub async fn generate_async(&self, data: Bytes) -> Result<Thumbnail, TranscodeError> {
        let transcoder = self.clone();
        tokio::task::spawn_blocking(move || transcoder.generate(&data))
            .await
            .map_err(|e| TranscodeError::Join(e.to_string()))?
    }
}
