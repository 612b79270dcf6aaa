//! Local filesystem storage for generated images

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::config::StorageConfig;
use crate::error::{AppError, Result};
use crate::provider::media::{self, ImageFormat};
use crate::storage::{ImageStorage, StoredImage};

/// Writes images under a base directory and serves them from a URL prefix
pub struct FileStorage {
    base_path: PathBuf,
    url_prefix: String,
}

impl FileStorage {
    pub fn new(base_path: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.base_path, &config.url_prefix)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Create the storage directory if needed
    pub async fn ensure_storage_dir(&self) -> Result<()> {
        if fs::metadata(&self.base_path).await.is_err() {
            fs::create_dir_all(&self.base_path).await?;
            debug!(path = ?self.base_path, "Created storage directory");
        }
        Ok(())
    }

    fn file_name(task_id: &str, index: usize, data: &[u8]) -> String {
        let extension = ImageFormat::detect(data)
            .map(|format| format.extension())
            .unwrap_or("png");
        format!("{}_{}.{}", task_id, index, extension)
    }
}

#[async_trait]
impl ImageStorage for FileStorage {
    async fn save(&self, task_id: &str, index: usize, data: &[u8]) -> Result<StoredImage> {
        if data.is_empty() {
            return Err(AppError::Persistence(format!(
                "image {} of task {} is empty",
                index, task_id
            )));
        }

        self.ensure_storage_dir()
            .await
            .map_err(|e| AppError::Persistence(e.to_string()))?;

        let file_name = Self::file_name(task_id, index, data);
        let file_path = self.base_path.join(&file_name);

        fs::write(&file_path, data).await.map_err(|e| {
            AppError::Persistence(format!("failed to write {}: {}", file_path.display(), e))
        })?;

        let (width, height) = media::image_dimensions(data).unzip();
        debug!(task_id = %task_id, path = ?file_path, size = data.len(), "Saved image file");

        Ok(StoredImage {
            path: file_path.to_string_lossy().to_string(),
            url: format!("{}/{}", self.url_prefix, file_name),
            width,
            height,
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path, "Deleted image file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Persistence(format!("failed to delete {}: {}", path, e))),
        }
    }
}
