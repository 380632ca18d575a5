//! Image media: uploads to object storage and local image encoding.
//!
//! Both halves validate files the same way before doing any work:
//! at most [`MAX_UPLOAD_BYTES`] and an accepted image MIME type.

mod codec;
mod storage;

pub use codec::{
    base64_size_mb, compress_and_encode, estimate_size, fit_within, generate_thumbnail,
    process_many, to_base64, CompressOptions, DEFAULT_MAX_IMAGES, LARGE_OUTPUT_MB,
};
pub use storage::{
    is_valid_media_url, object_name, object_path, question_main_path, question_options_path,
    sanitize_file_name, MediaStore,
};

use crate::error::{MediaError, MediaResult};

/// Bucket used when none is configured.
pub const DEFAULT_BUCKET: &str = "quiz-images";

/// Largest accepted file: 5 MiB.
pub const MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

/// MIME types accepted for upload.
pub const ALLOWED_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/gif", "image/webp"];

/// A file picked for upload or encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaFile {
    /// Original file name, used to build the stored object name.
    pub name: String,
    pub bytes: Vec<u8>,
    pub mime_type: String,
    /// Size reported by the picker; checked before the bytes are touched.
    pub declared_size: u64,
}

impl MediaFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        let declared_size = bytes.len() as u64;
        Self {
            name: name.into(),
            bytes,
            mime_type: mime_type.into(),
            declared_size,
        }
    }

    pub fn with_declared_size(mut self, size: u64) -> Self {
        self.declared_size = size;
        self
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// Upload limits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaLimits {
    pub max_upload_bytes: u64,
    pub allowed_types: Vec<String>,
}

impl Default for MediaLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: MAX_UPLOAD_BYTES,
            allowed_types: ALLOWED_TYPES.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl MediaLimits {
    /// Check size and type, logging the rejection.
    pub fn validate(&self, file: &MediaFile) -> MediaResult<()> {
        if !self.allowed_types.iter().any(|t| *t == file.mime_type) {
            return Err(reject(MediaError::UnsupportedType(file.mime_type.clone())));
        }
        check_size(file, self.max_upload_bytes)
    }
}

/// Log a media error where it is detected and hand it back for returning.
pub(crate) fn reject(err: MediaError) -> MediaError {
    tracing::error!(error = %err, "media operation rejected");
    err
}

fn check_size(file: &MediaFile, limit: u64) -> MediaResult<()> {
    if file.declared_size > limit {
        return Err(reject(MediaError::FileTooLarge {
            size: file.declared_size,
            limit,
        }));
    }
    Ok(())
}

/// Same checks `upload` runs before touching the network.
pub fn validate_image(file: &MediaFile) -> MediaResult<()> {
    MediaLimits::default().validate(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_allowed_types() {
        for mime in ALLOWED_TYPES {
            assert!(validate_image(&MediaFile::new("a", vec![0; 10], mime)).is_ok());
        }
    }

    #[test]
    fn test_validate_rejects_pdf() {
        let file = MediaFile::new("doc.pdf", vec![0; 10], "application/pdf");
        assert!(matches!(
            validate_image(&file),
            Err(MediaError::UnsupportedType(t)) if t == "application/pdf"
        ));
    }

    #[test]
    fn test_validate_uses_declared_size() {
        let file = MediaFile::new("big.png", vec![0; 10], "image/png")
            .with_declared_size(6 * 1024 * 1024);
        assert!(matches!(
            validate_image(&file),
            Err(MediaError::FileTooLarge { .. })
        ));

        let at_limit = MediaFile::new("ok.png", vec![], "image/png")
            .with_declared_size(MAX_UPLOAD_BYTES);
        assert!(validate_image(&at_limit).is_ok());
    }
}
