use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::XrayResult;

/// Source of an image to classify: an HTTP upload or a file on disk.
#[async_trait]
pub trait UploadSource: Send + Sync {
    fn filename(&self) -> &str;
    async fn read(&self) -> XrayResult<Bytes>;
}

/// Upload whose bytes are already in memory.
#[derive(Debug, Clone)]
pub struct MemoryUpload {
    filename: String,
    bytes: Bytes,
}

impl MemoryUpload {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }
}

#[async_trait]
impl UploadSource for MemoryUpload {
    fn filename(&self) -> &str {
        &self.filename
    }

    async fn read(&self) -> XrayResult<Bytes> {
        Ok(self.bytes.clone())
    }
}

/// Image file on disk, read lazily.
#[derive(Debug, Clone)]
pub struct FileUpload {
    path: PathBuf,
    filename: String,
}

impl FileUpload {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, filename }
    }
}

#[async_trait]
impl UploadSource for FileUpload {
    fn filename(&self) -> &str {
        &self.filename
    }

    async fn read(&self) -> XrayResult<Bytes> {
        Ok(Bytes::from(tokio::fs::read(&self.path).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_upload_returns_bytes() {
        let upload = MemoryUpload::new("scan.png", vec![1u8, 2, 3]);
        assert_eq!(upload.filename(), "scan.png");
        assert_eq!(upload.read().await.unwrap().as_ref(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_file_upload_uses_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("person1_virus_6.jpeg");
        std::fs::write(&path, b"abc").unwrap();

        let upload = FileUpload::new(&path);
        assert_eq!(upload.filename(), "person1_virus_6.jpeg");
        assert_eq!(upload.read().await.unwrap().as_ref(), b"abc");
    }

    #[tokio::test]
    async fn test_file_upload_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let upload = FileUpload::new(dir.path().join("gone.jpeg"));
        assert!(matches!(upload.read().await, Err(crate::error::XrayError::Io(_))));
    }
}
