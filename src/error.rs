//! Error types for the quiz store.

use crate::types::Table;
use thiserror::Error;

/// Main error type for record and backend operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Row not found in {table}: {key}")]
    NotFound { table: Table, key: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rejected by store ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl StoreError {
    /// True when the service refused the write because the key is taken.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            StoreError::Deserialization(e.to_string())
        } else {
            StoreError::Serialization(e.to_string())
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            StoreError::Deserialization(e.to_string())
        } else {
            StoreError::Connection(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for StoreError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        StoreError::Connection(e.to_string())
    }
}

/// Result type for record and backend operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the media store and the image codec.
///
/// The display string of every variant is meant to be shown to the person
/// who picked the file.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("The file is too large ({size} bytes). Please choose an image of {limit} bytes or less.")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Unsupported image format ({0}). Only JPEG, PNG, GIF and WebP are accepted.")]
    UnsupportedType(String),

    #[error("Please choose an image file.")]
    NotAnImage,

    #[error("Invalid image URL: {0}")]
    InvalidUrl(String),

    #[error("An image already exists at {0}. Please try the upload again.")]
    Collision(String),

    #[error("Failed to upload the image: {0}")]
    Upload(String),

    #[error("Failed to delete the image: {0}")]
    Delete(String),

    #[error("At most {max} images can be attached (got {got}).")]
    TooManyImages { max: usize, got: usize },

    #[error("Failed to read the image: {0}")]
    Decode(String),

    #[error("Failed to convert the image: {0}")]
    Encode(String),

    #[error("Failed to look up the image bucket: {0}")]
    Bucket(String),
}

/// Result type for media operations.
pub type MediaResult<T> = std::result::Result<T, MediaError>;
