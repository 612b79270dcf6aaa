//! Typed generation parameters
//!
//! Raw request fields (with their historical spellings) are normalized into
//! [`GenerationParams`] once, at the submission boundary. Everything
//! downstream only sees these types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::LimitsConfig;
use crate::error::{AppError, Result};
use crate::provider::media;

/// Upper bound on images produced by a single task
pub const MAX_IMAGES_PER_TASK: u32 = 10;

/// Supported output aspect ratios
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "2:3")]
    Portrait2x3,
    #[serde(rename = "3:2")]
    Landscape3x2,
    #[serde(rename = "3:4")]
    Portrait3x4,
    #[serde(rename = "4:3")]
    Landscape4x3,
    #[serde(rename = "4:5")]
    Portrait4x5,
    #[serde(rename = "5:4")]
    Landscape5x4,
    #[serde(rename = "9:16")]
    Portrait9x16,
    #[serde(rename = "16:9")]
    Landscape16x9,
    #[serde(rename = "21:9")]
    Ultrawide21x9,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 10] = [
        AspectRatio::Square,
        AspectRatio::Portrait2x3,
        AspectRatio::Landscape3x2,
        AspectRatio::Portrait3x4,
        AspectRatio::Landscape4x3,
        AspectRatio::Portrait4x5,
        AspectRatio::Landscape5x4,
        AspectRatio::Portrait9x16,
        AspectRatio::Landscape16x9,
        AspectRatio::Ultrawide21x9,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait2x3 => "2:3",
            AspectRatio::Landscape3x2 => "3:2",
            AspectRatio::Portrait3x4 => "3:4",
            AspectRatio::Landscape4x3 => "4:3",
            AspectRatio::Portrait4x5 => "4:5",
            AspectRatio::Landscape5x4 => "5:4",
            AspectRatio::Portrait9x16 => "9:16",
            AspectRatio::Landscape16x9 => "16:9",
            AspectRatio::Ultrawide21x9 => "21:9",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let value = s.trim();
        AspectRatio::ALL
            .iter()
            .copied()
            .find(|ratio| ratio.as_str() == value)
            .ok_or_else(|| {
                let supported: Vec<&str> = AspectRatio::ALL.iter().map(|r| r.as_str()).collect();
                AppError::validation(
                    "aspect_ratio",
                    format!("unsupported value '{}', expected one of {}", value, supported.join(", ")),
                )
            })
    }
}

/// Output resolution tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionTier {
    #[default]
    #[serde(alias = "1K", alias = "1k")]
    Low,
    #[serde(alias = "2K", alias = "2k")]
    Mid,
    #[serde(alias = "4K", alias = "4k")]
    High,
}

impl ResolutionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionTier::Low => "low",
            ResolutionTier::Mid => "mid",
            ResolutionTier::High => "high",
        }
    }

    /// Vendor image size label
    pub fn image_size(&self) -> &'static str {
        match self {
            ResolutionTier::Low => "1K",
            ResolutionTier::Mid => "2K",
            ResolutionTier::High => "4K",
        }
    }
}

impl fmt::Display for ResolutionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionTier {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" | "1k" => Ok(ResolutionTier::Low),
            "mid" | "2k" => Ok(ResolutionTier::Mid),
            "high" | "4k" => Ok(ResolutionTier::High),
            other => Err(AppError::validation(
                "resolution",
                format!("unsupported value '{}', expected low, mid or high (1K, 2K, 4K)", other),
            )),
        }
    }
}

/// Decoded reference image used to steer image-to-image generation
#[derive(Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl ReferenceImage {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let mime_type = media::detect_mime_type(&data).to_string();
        Self { data, mime_type }
    }

    /// Decode base64 text, with or without a `data:<mime>;base64,` prefix
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let data = media::decode_base64(encoded).map_err(|e| {
            AppError::validation("reference_images", format!("invalid base64 data: {}", e))
        })?;
        Ok(Self::from_bytes(data))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for ReferenceImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceImage")
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Text-to-image or image-to-image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationMode {
    TextToImage,
    ImageToImage,
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationMode::TextToImage => f.write_str("text-to-image"),
            GenerationMode::ImageToImage => f.write_str("image-to-image"),
        }
    }
}

/// Normalized parameters for one generation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationParams {
    pub prompt: String,
    pub count: u32,
    pub aspect_ratio: AspectRatio,
    pub resolution: ResolutionTier,
    pub reference_images: Vec<ReferenceImage>,
}

impl GenerationParams {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            count: 1,
            aspect_ratio: AspectRatio::default(),
            resolution: ResolutionTier::default(),
            reference_images: Vec::new(),
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    pub fn with_resolution(mut self, resolution: ResolutionTier) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_reference_image(mut self, image: ReferenceImage) -> Self {
        self.reference_images.push(image);
        self
    }

    pub fn mode(&self) -> GenerationMode {
        if self.reference_images.is_empty() {
            GenerationMode::TextToImage
        } else {
            GenerationMode::ImageToImage
        }
    }

    /// Check request-level limits. Vendor-specific checks live in the adapters.
    pub fn validate(&self, limits: &LimitsConfig) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(AppError::validation("prompt", "must not be empty"));
        }

        if self.count == 0 || self.count > MAX_IMAGES_PER_TASK {
            return Err(AppError::validation(
                "count",
                format!("must be between 1 and {}, got {}", MAX_IMAGES_PER_TASK, self.count),
            ));
        }

        if self.reference_images.len() > limits.max_reference_images {
            return Err(AppError::validation(
                "reference_images",
                format!(
                    "at most {} reference images are allowed, got {}",
                    limits.max_reference_images,
                    self.reference_images.len()
                ),
            ));
        }

        for (index, image) in self.reference_images.iter().enumerate() {
            if image.is_empty() {
                return Err(AppError::validation(
                    "reference_images",
                    format!("reference image {} is empty", index),
                ));
            }
            if image.len() > limits.max_reference_image_bytes {
                return Err(AppError::validation(
                    "reference_images",
                    format!(
                        "reference image {} is {} bytes, limit is {}",
                        index,
                        image.len(),
                        limits.max_reference_image_bytes
                    ),
                ));
            }
        }

        Ok(())
    }
}
