// src/capture/video_file.rs
use std::path::{Path, PathBuf};

use super::error::DeviceError;

/// A recorded video for the batch workflow. Nothing is decoded locally;
/// the bytes are read on demand and shipped to the backend as-is.
#[derive(Debug, Clone)]
pub struct VideoFile {
    path: PathBuf,
    file_name: String,
    size_bytes: u64,
}

impl VideoFile {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DeviceError> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DeviceError::NotFound(path.display().to_string()),
            std::io::ErrorKind::PermissionDenied => DeviceError::PermissionDenied,
            _ => DeviceError::Unavailable(e.to_string()),
        })?;
        if !metadata.is_file() {
            return Err(DeviceError::Unavailable(format!("{} is not a file", path.display())));
        }

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload.mp4")
            .to_string();

        Ok(Self {
            path,
            file_name,
            size_bytes: metadata.len(),
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn mime_type(&self) -> &'static str {
        let extension = self
            .path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("webm") => "video/webm",
            Some("mov") => "video/quicktime",
            Some("avi") => "video/x-msvideo",
            Some("mkv") => "video/x-matroska",
            _ => "video/mp4",
        }
    }

    pub async fn read_bytes(&self) -> Result<Vec<u8>, DeviceError> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|e| DeviceError::Unavailable(e.to_string()))
    }
}
