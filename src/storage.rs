//! Byte storage for uploaded medical records.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object {0} not found")]
    NotFound(Uuid),
    #[error("storage io error: {0}")]
    Io(#[from] io::Error),
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(_) => ApiError::not_found("file"),
            StorageError::Io(e) => ApiError::Internal(format!("storage error: {e}")),
        }
    }
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn put(&self, key: Uuid, bytes: &[u8]) -> Result<(), StorageError>;
    async fn get(&self, key: Uuid) -> Result<Vec<u8>, StorageError>;
    /// Deleting a missing object is not an error.
    async fn delete(&self, key: Uuid) -> Result<(), StorageError>;
}

/// One file per record under a root directory, named by record id.
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub async fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path_for(&self, key: Uuid) -> PathBuf {
        self.root.join(key.simple().to_string())
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn put(&self, key: Uuid, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("part");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn get(&self, key: Uuid) -> Result<Vec<u8>, StorageError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StorageError::NotFound(key)),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: Uuid) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Decodes an upload payload, with or without a `data:<type>;base64,` prefix.
pub fn decode_upload(file_data: &str, max_bytes: usize) -> Result<Vec<u8>, ApiError> {
    let payload = match file_data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => file_data,
    };

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|_| ApiError::validation("file_data must be base64"))?;

    if bytes.is_empty() {
        return Err(ApiError::validation("file is empty"));
    }
    if bytes.len() > max_bytes {
        return Err(ApiError::PayloadTooLarge(
            "PAYLOAD_TOO_LARGE",
            format!("file exceeds {max_bytes} bytes"),
        ));
    }
    Ok(bytes)
}
