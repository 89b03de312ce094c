//! # Local media store
//!
//! Filesystem implementation of `ObjectStorage`.
//! Features: content-addressable storage, directory sharding, and thumbnailing.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use domains::errors::StorageError;
use domains::ports::ObjectStorage;
use sha2::{Digest, Sha256};
use tokio::fs;

/// Longest edge of generated thumbnails, in pixels.
const THUMBNAIL_EDGE: u32 = 250;

/// The two directory levels for a media id, or `None` for anything other
/// than a lowercase SHA-256 hex digest.
fn shards(media_id: &str) -> Option<(&str, &str)> {
    let is_digest = media_id.len() == 64 && media_id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    is_digest.then(|| (&media_id[0..2], &media_id[2..4]))
}

pub struct LocalMediaStore {
    /// Root directory for all uploads (e.g., "./data/uploads")
    root_path: PathBuf,
    /// Public URL prefix (e.g., "/static/uploads")
    url_prefix: String,
    max_bytes: usize,
}

impl LocalMediaStore {
    pub fn new(root: PathBuf, url_prefix: impl Into<String>, max_bytes: usize) -> Self {
        Self {
            root_path: root,
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
            max_bytes,
        }
    }

    /// Generates a sharded path: "ab/cd/abcd...hash"
    fn sharded_path(&self, hash: &str) -> Option<PathBuf> {
        let (first, second) = shards(hash)?;
        let mut path = self.root_path.clone();
        path.push(first);
        path.push(second);
        path.push(hash);
        Some(path)
    }

    /// Public URL of a stored upload; `None` unless `media_id` is a SHA-256
    /// hex digest.
    pub fn url_for(&self, media_id: &str) -> Option<String> {
        let (first, second) = shards(media_id)?;
        Some(format!("{}/{first}/{second}/{media_id}", self.url_prefix))
    }

    pub fn thumbnail_url_for(&self, media_id: &str) -> Option<String> {
        let (first, second) = shards(media_id)?;
        Some(format!("{}/{first}/{second}/thumb_{media_id}.webp", self.url_prefix))
    }

    /// Decodes the upload and writes a WebP thumbnail beside the original.
    async fn generate_thumbnail(&self, data: Bytes, target: &Path, hash: &str) -> Result<(), StorageError> {
        let parent = target
            .parent()
            .ok_or_else(|| StorageError::Io("upload path has no parent".into()))?;
        let thumb_path = parent.join(format!("thumb_{hash}.webp"));

        tokio::task::spawn_blocking(move || {
            let img = image::ImageReader::new(Cursor::new(data))
                .with_guessed_format()
                .map_err(|e| StorageError::Io(e.to_string()))?
                .decode()
                .map_err(|e| StorageError::UnsupportedType(format!("undecodable image: {e}")))?;

            let thumb = image::DynamicImage::ImageRgba8(img.thumbnail(THUMBNAIL_EDGE, THUMBNAIL_EDGE).to_rgba8());
            thumb
                .save_with_format(&thumb_path, image::ImageFormat::WebP)
                .map_err(|e| StorageError::Io(e.to_string()))
        })
        .await
        .map_err(|e| StorageError::Io(e.to_string()))?
    }
}

#[async_trait]
impl ObjectStorage for LocalMediaStore {
    /// Saves an upload using its SHA-256 hash as the filename.
    /// Identical uploads are stored once.
    async fn upload(&self, data: Bytes, content_type: &mime::Mime) -> Result<String, StorageError> {
        if content_type.type_() != mime::IMAGE {
            return Err(StorageError::UnsupportedType(content_type.to_string()));
        }
        if data.len() > self.max_bytes {
            return Err(StorageError::TooLarge {
                size: data.len(),
                max: self.max_bytes,
            });
        }

        let hash = hex::encode(Sha256::digest(&data));
        let (Some(target_path), Some(url)) = (self.sharded_path(&hash), self.url_for(&hash)) else {
            return Err(StorageError::Io(format!("unusable media id {hash}")));
        };

        if fs::try_exists(&target_path).await.unwrap_or(false) {
            tracing::debug!(media_id = %hash, "upload deduplicated");
            return Ok(url);
        }

        // Thumbnail first: an undecodable image never reaches the store.
        if let Some(parent) = target_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }
        self.generate_thumbnail(data.clone(), &target_path, &hash).await?;
        fs::write(&target_path, &data)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;

        tracing::info!(media_id = %hash, bytes = data.len(), "stored upload");
        Ok(url)
    }
}
