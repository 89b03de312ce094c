//! # In-memory object storage
//!
//! Keeps uploads in a map keyed by content hash. Used by tests and by the
//! demo binary when no media directory is configured.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use domains::errors::StorageError;
use domains::ports::ObjectStorage;
use sha2::{Digest, Sha256};

const URL_SCHEME: &str = "memory://media/";

pub struct InMemoryObjectStorage {
    objects: DashMap<String, (mime::Mime, Bytes)>,
    max_bytes: usize,
}

impl InMemoryObjectStorage {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            objects: DashMap::new(),
            max_bytes,
        }
    }

    /// Content and type previously uploaded at `url`.
    pub fn fetch(&self, url: &str) -> Option<(mime::Mime, Bytes)> {
        let key = url.strip_prefix(URL_SCHEME)?;
        self.objects.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStorage for InMemoryObjectStorage {
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
        let key = hex::encode(Sha256::digest(&data));
        self.objects.insert(key.clone(), (content_type.clone(), data));
        Ok(format!("{URL_SCHEME}{key}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_fetch_by_url() {
        let storage = InMemoryObjectStorage::new(1024);
        let url = storage
            .upload(Bytes::from_static(b"\x89PNG fake"), &mime::IMAGE_PNG)
            .await
            .unwrap();
        let (kind, data) = storage.fetch(&url).unwrap();
        assert_eq!(kind, mime::IMAGE_PNG);
        assert_eq!(&data[..], b"\x89PNG fake");
        assert!(storage.fetch("memory://media/missing").is_none());
    }
}
