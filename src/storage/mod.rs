//! Image storage collaborator

pub mod file;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use file::FileStorage;

/// Addressable handle for a stored image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredImage {
    pub path: String,
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Persists generated image bytes
///
/// A failure is scoped to the single image being saved.
#[async_trait]
pub trait ImageStorage: Send + Sync {
    /// Store the `index`-th image of a task
    async fn save(&self, task_id: &str, index: usize, data: &[u8]) -> Result<StoredImage>;

    /// Remove a stored image. Missing files are not an error.
    async fn delete(&self, path: &str) -> Result<()>;
}
