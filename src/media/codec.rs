//! Local image encoding. Nothing here touches the network.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::future::try_join_all;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

use super::{check_size, reject, MediaFile, MAX_UPLOAD_BYTES};
use crate::error::{MediaError, MediaResult};

/// Default cap on images processed in one batch.
pub const DEFAULT_MAX_IMAGES: usize = 3;

/// Encoded results above this size (in MB) are logged as a warning.
pub const LARGE_OUTPUT_MB: f64 = 2.0;

const OUTPUT_MIME: &str = "image/jpeg";

/// Bounds and quality for [`compress_and_encode`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompressOptions {
    pub max_width: u32,
    pub max_height: u32,
    /// Lossy quality in `0.0..=1.0`.
    pub quality: f32,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            max_width: 1920,
            max_height: 1080,
            quality: 0.8,
        }
    }
}

impl CompressOptions {
    pub fn thumbnail() -> Self {
        Self {
            max_width: 200,
            max_height: 200,
            quality: 0.7,
        }
    }

    fn jpeg_quality(&self) -> u8 {
        (self.quality * 100.0).round().clamp(1.0, 100.0) as u8
    }
}

fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Encode the raw bytes as a data URL, unchanged.
pub fn to_base64(file: &MediaFile) -> MediaResult<String> {
    check_size(file, MAX_UPLOAD_BYTES)?;
    if !file.is_image() {
        return Err(reject(MediaError::NotAnImage));
    }
    Ok(data_url(&file.mime_type, &file.bytes))
}

/// Largest size with the same aspect ratio that fits inside the bounds.
/// Images already inside the bounds are returned unchanged.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let (w, h) = (u64::from(width), u64::from(height));
    let (mw, mh) = (u64::from(max_width), u64::from(max_height));
    // Compare mw/w against mh/h without floats.
    if mw * h <= mh * w {
        (max_width, (h * mw / w).max(1) as u32)
    } else {
        ((w * mh / h).max(1) as u32, max_height)
    }
}

/// Decode, downscale into the bounds, re-encode as JPEG and return a data URL.
pub fn compress_and_encode(file: &MediaFile, options: &CompressOptions) -> MediaResult<String> {
    if !file.is_image() {
        return Err(reject(MediaError::NotAnImage));
    }

    let img = image::load_from_memory(&file.bytes)
        .map_err(|e| reject(MediaError::Decode(e.to_string())))?;

    let (width, height) = fit_within(img.width(), img.height(), options.max_width, options.max_height);
    let img = if (width, height) == (img.width(), img.height()) {
        img
    } else {
        img.resize_exact(width, height, FilterType::Triangle)
    };

    let mut encoded = Vec::new();
    img.to_rgb8()
        .write_with_encoder(JpegEncoder::new_with_quality(&mut encoded, options.jpeg_quality()))
        .map_err(|e| reject(MediaError::Encode(e.to_string())))?;

    let url = data_url(OUTPUT_MIME, &encoded);
    let size_mb = base64_size_mb(&url);
    if size_mb > LARGE_OUTPUT_MB {
        tracing::warn!(
            file = %file.name,
            size_mb,
            "compressed image is still large"
        );
    }
    tracing::debug!(file = %file.name, width, height, bytes = encoded.len(), "image compressed");
    Ok(url)
}

/// 200×200 preview at quality 0.7.
pub fn generate_thumbnail(file: &MediaFile) -> MediaResult<String> {
    compress_and_encode(file, &CompressOptions::thumbnail())
}

/// Compress every file on the blocking pool. Results keep input order.
///
/// More than `max_count` files fails before any decoding starts.
pub async fn process_many(
    files: Vec<MediaFile>,
    max_count: usize,
    options: CompressOptions,
) -> MediaResult<Vec<String>> {
    if files.len() > max_count {
        return Err(reject(MediaError::TooManyImages {
            max: max_count,
            got: files.len(),
        }));
    }

    let tasks = files.into_iter().map(|file| async move {
        tokio::task::spawn_blocking(move || compress_and_encode(&file, &options))
            .await
            .map_err(|e| reject(MediaError::Encode(e.to_string())))?
    });
    try_join_all(tasks).await
}

/// Decoded size in MB estimated from the encoded length.
pub fn base64_size_mb(encoded: &str) -> f64 {
    let bytes = encoded.len() as f64 * 3.0 / 4.0;
    bytes / (1024.0 * 1024.0)
}

/// Human-readable size: whole KB below 0.1 MB, otherwise MB with two decimals.
pub fn estimate_size(encoded: &str) -> String {
    let mb = base64_size_mb(encoded);
    if mb < 0.1 {
        format!("{:.0} KB", mb * 1024.0)
    } else {
        format!("{mb:.2} MB")
    }
}
