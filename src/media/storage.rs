//! Upload and delete images in the storage bucket.

use chrono::Utc;
use futures::future::try_join_all;
use percent_encoding::percent_decode_str;
use reqwest::Url;
use std::sync::Arc;
use uuid::Uuid;

use super::{reject, MediaFile, MediaLimits, DEFAULT_BUCKET};
use crate::backend::BlobBackend;
use crate::error::{MediaError, MediaResult, StoreError};

/// Storage path for a question's main images.
pub fn question_main_path(question_id: &str) -> String {
    format!("questions/{question_id}/main")
}

/// Storage path for a question's option images.
pub fn question_options_path(question_id: &str) -> String {
    format!("questions/{question_id}/options")
}

/// Replace every character other than ASCII letters, digits, `.` and `-`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Object name: millisecond timestamp, a random tag, then the sanitized
/// original name.
pub fn object_name(timestamp_ms: i64, tag: &str, original: &str) -> String {
    format!("{timestamp_ms}-{tag}-{}", sanitize_file_name(original))
}

/// Eight hex characters of a fresh v4 UUID.
fn random_tag() -> String {
    let mut tag = Uuid::new_v4().simple().to_string();
    tag.truncate(8);
    tag
}

/// Path of an object inside `bucket`, taken from its public URL.
///
/// The URL carries the path percent-encoded; the returned path is decoded.
pub fn object_path(url: &str, bucket: &str) -> MediaResult<String> {
    let parsed = Url::parse(url).map_err(|e| reject(MediaError::InvalidUrl(format!("{url}: {e}"))))?;
    let marker = format!("/{bucket}/");
    let path = parsed
        .path()
        .split_once(&marker)
        .map(|(_, rest)| rest)
        .ok_or_else(|| reject(MediaError::InvalidUrl(url.to_string())))?;
    if path.is_empty() {
        return Err(reject(MediaError::InvalidUrl(url.to_string())));
    }
    percent_decode_str(path)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| reject(MediaError::InvalidUrl(format!("{url}: {e}"))))
}

/// True iff `url` parses and its path contains the bucket segment.
pub fn is_valid_media_url(url: &str, bucket: &str) -> bool {
    Url::parse(url)
        .map(|u| u.path().contains(&format!("/{bucket}/")))
        .unwrap_or(false)
}

/// Image uploads into one bucket.
#[derive(Clone)]
pub struct MediaStore {
    blobs: Arc<dyn BlobBackend>,
    bucket: String,
    limits: MediaLimits,
}

impl MediaStore {
    pub fn new(blobs: Arc<dyn BlobBackend>) -> Self {
        Self::with_bucket(blobs, DEFAULT_BUCKET)
    }

    pub fn with_bucket(blobs: Arc<dyn BlobBackend>, bucket: impl Into<String>) -> Self {
        Self {
            blobs,
            bucket: bucket.into(),
            limits: MediaLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: MediaLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload one image under `destination` and return its public URL.
    ///
    /// Size and type are checked before any network call. An existing object
    /// at the generated path is never overwritten.
    pub async fn upload(&self, file: &MediaFile, destination: &str) -> MediaResult<String> {
        self.limits.validate(file)?;

        let name = object_name(Utc::now().timestamp_millis(), &random_tag(), &file.name);
        let path = format!("{}/{name}", destination.trim_end_matches('/'));

        let stored = self
            .blobs
            .upload(&self.bucket, &path, file.bytes.clone(), &file.mime_type, false)
            .await
            .map_err(|e| {
                reject(match e {
                    StoreError::Conflict(_) => MediaError::Collision(path.clone()),
                    other => MediaError::Upload(other.to_string()),
                })
            })?;

        tracing::info!(bucket = %self.bucket, path = %stored, bytes = file.bytes.len(), "image uploaded");
        Ok(self.blobs.public_url(&self.bucket, &stored))
    }

    /// Upload all files concurrently; fails if any one fails.
    pub async fn upload_many(&self, files: &[MediaFile], destination: &str) -> MediaResult<Vec<String>> {
        try_join_all(files.iter().map(|file| self.upload(file, destination))).await
    }

    /// Delete the object behind a public URL.
    pub async fn delete(&self, url: &str) -> MediaResult<()> {
        let path = object_path(url, &self.bucket)?;
        self.blobs
            .remove(&self.bucket, std::slice::from_ref(&path))
            .await
            .map_err(|e| reject(MediaError::Delete(e.to_string())))?;
        tracing::info!(bucket = %self.bucket, path = %path, "image deleted");
        Ok(())
    }

    /// Delete all URLs concurrently; fails if any one fails.
    pub async fn delete_many(&self, urls: &[String]) -> MediaResult<()> {
        try_join_all(urls.iter().map(|url| self.delete(url))).await?;
        Ok(())
    }

    pub fn is_valid_url(&self, url: &str) -> bool {
        is_valid_media_url(url, &self.bucket)
    }

    /// Setup check. Lookup failures are logged and reported as `false`.
    pub async fn bucket_exists(&self) -> bool {
        match self.blobs.bucket_exists(&self.bucket).await {
            Ok(exists) => exists,
            Err(e) => {
                let err = reject(MediaError::Bucket(e.to_string()));
                tracing::debug!(bucket = %self.bucket, error = %err, "treating bucket as missing");
                false
            }
        }
    }
}
