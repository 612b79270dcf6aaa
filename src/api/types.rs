//! Request and response bodies for the HTTP API

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::queue::PoolStats;
use crate::task::params::{
    AspectRatio, GenerationParams, ReferenceImage, ResolutionTier, MAX_IMAGES_PER_TASK,
};

/// Body of `POST /v1/tasks`
///
/// Accepts the historical spellings of each field; they are normalized into
/// [`GenerationParams`] here and nowhere else.
#[derive(Debug, Default, Deserialize)]
pub struct SubmitTaskRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(
        default,
        alias = "modelHint",
        alias = "model_hint",
        alias = "model_id",
        alias = "modelId"
    )]
    pub model: Option<String>,
    #[serde(default)]
    pub count: Option<i64>,
    #[serde(default, alias = "aspectRatio", alias = "aspect")]
    pub aspect_ratio: Option<String>,
    #[serde(
        default,
        alias = "resolutionTier",
        alias = "resolution_tier",
        alias = "resolution_level",
        alias = "imageSize",
        alias = "image_size"
    )]
    pub resolution: Option<String>,
    #[serde(default, alias = "referenceImages")]
    pub reference_images: Vec<String>,
}

/// Normalized submission: parameters, provider name and model hint
#[derive(Debug)]
pub struct Submission {
    pub params: GenerationParams,
    pub provider: String,
    pub model_hint: Option<String>,
}

impl SubmitTaskRequest {
    /// Turn the raw body into typed parameters
    ///
    /// Reference images beyond `max_reference_images` are rejected before
    /// any of them is decoded.
    pub fn into_submission(self, max_reference_images: usize) -> Result<Submission> {
        let provider = self
            .provider
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::validation("provider", "must not be empty"))?;

        let count = match self.count {
            None => 1,
            Some(count) if (1..=MAX_IMAGES_PER_TASK as i64).contains(&count) => count as u32,
            Some(count) => {
                return Err(AppError::validation(
                    "count",
                    format!("must be between 1 and {}, got {}", MAX_IMAGES_PER_TASK, count),
                ))
            }
        };

        let aspect_ratio = match self.aspect_ratio.as_deref().map(str::trim) {
            None | Some("") => AspectRatio::default(),
            Some(value) => value.parse()?,
        };

        let resolution = match self.resolution.as_deref().map(str::trim) {
            None | Some("") => ResolutionTier::default(),
            Some(value) => value.parse()?,
        };

        if self.reference_images.len() > max_reference_images {
            return Err(AppError::validation(
                "reference_images",
                format!(
                    "at most {} reference images are allowed, got {}",
                    max_reference_images,
                    self.reference_images.len()
                ),
            ));
        }

        let mut params = GenerationParams::new(self.prompt)
            .with_count(count)
            .with_aspect_ratio(aspect_ratio)
            .with_resolution(resolution);
        for encoded in &self.reference_images {
            params = params.with_reference_image(ReferenceImage::from_base64(encoded)?);
        }

        let model_hint = self
            .model
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());

        Ok(Submission {
            params,
            provider,
            model_hint,
        })
    }
}

/// Body of `GET /health`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub pool: PoolStats,
    pub providers: Vec<String>,
}
