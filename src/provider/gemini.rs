//! Gemini `generateContent` image adapter

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::error::{AppError, Result};
use crate::provider::media;
use crate::provider::{
    build_http_client, status_error, transport_error, GenerationMetadata, GenerationRequest,
    ImageProvider, ProviderOutput,
};
use crate::task::params::{GenerationParams, MAX_IMAGES_PER_TASK};

/// Public Generative Language endpoint
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const API_VERSION: &str = "v1beta";

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Gemini image generation adapter
pub struct GeminiProvider {
    config: ProviderConfig,
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, alias = "inline_data", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(alias = "mime_type", default)]
    mime_type: String,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
    candidate_count: u32,
    image_config: ImageConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: String,
    image_size: String,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    safety_ratings: Vec<SafetyRating>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
    #[serde(default)]
    safety_ratings: Vec<SafetyRating>,
}

#[derive(Debug, Default, Deserialize)]
struct SafetyRating {
    #[serde(default)]
    category: String,
    #[serde(default)]
    probability: Option<String>,
}

impl SafetyRating {
    fn is_notable(&self) -> bool {
        match self.probability.as_deref() {
            None | Some("") | Some("NEGLIGIBLE") => false,
            Some(_) => true,
        }
    }
}

impl GeminiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = build_http_client(&config)?;
        let base_url = config
            .api_base
            .as_deref()
            .map(str::trim)
            .filter(|base| !base.is_empty())
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        debug!(
            provider = %config.name,
            base_url = %base_url,
            keep_alive = !config.disable_keep_alive,
            "Initialized Gemini provider"
        );

        Ok(Self {
            config,
            client,
            base_url,
        })
    }

    /// Registry factory
    pub fn factory(config: &ProviderConfig) -> Result<Arc<dyn ImageProvider>> {
        Ok(Arc::new(Self::new(config.clone())?))
    }

    /// `generateContent` URL, reusing a version segment already in the base
    fn generate_url(&self, model: &str) -> String {
        let has_version = self
            .base_url
            .rsplit('/')
            .next()
            .map(|segment| {
                let mut chars = segment.chars();
                chars.next() == Some('v') && chars.next().is_some_and(|c| c.is_ascii_digit())
            })
            .unwrap_or(false);

        if has_version {
            format!("{}/models/{}:generateContent", self.base_url, model)
        } else {
            format!(
                "{}/{}/models/{}:generateContent",
                self.base_url, API_VERSION, model
            )
        }
    }

    fn build_request(&self, params: &GenerationParams) -> GenerateContentRequest {
        // Reference images go first, then the prompt
        let mut parts: Vec<Part> = params
            .reference_images
            .iter()
            .map(|image| Part {
                text: None,
                inline_data: Some(InlineData {
                    mime_type: image.mime_type.clone(),
                    data: media::encode_base64(&image.data),
                }),
            })
            .collect();

        parts.push(Part {
            text: Some(media::sanitize_prompt(&params.prompt)),
            inline_data: None,
        });

        let safety_settings = HARM_CATEGORIES
            .iter()
            .map(|&category| SafetySetting {
                category,
                threshold: self.config.safety_threshold.clone(),
            })
            .collect();

        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["TEXT", "IMAGE"],
                candidate_count: params.count,
                image_config: ImageConfig {
                    aspect_ratio: params.aspect_ratio.as_str().to_string(),
                    image_size: params.resolution.image_size().to_string(),
                },
            },
            safety_settings,
        }
    }
}

/// Images in response order plus the explanation for an empty result
fn collect_output(response: GenerateContentResponse) -> Result<ProviderOutput> {
    let mut images = Vec::new();
    let mut texts = Vec::new();
    let mut finish_reasons = Vec::new();
    let mut undecodable = Vec::new();

    for candidate in &response.candidates {
        if let Some(reason) = candidate.finish_reason.as_deref().filter(|r| !r.is_empty()) {
            finish_reasons.push(reason.to_string());
        }

        let parts = candidate.content.as_ref().map(|c| c.parts.as_slice()).unwrap_or(&[]);
        for part in parts {
            if let Some(inline) = part.inline_data.as_ref().filter(|d| !d.data.is_empty()) {
                match media::decode_base64(&inline.data) {
                    Ok(bytes) => images.push(bytes),
                    Err(e) => {
                        warn!(error = %e, "Skipping undecodable inline image");
                        undecodable.push(e.to_string());
                    }
                }
            }
            if let Some(text) = part.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
                texts.push(text.to_string());
            }
        }
    }

    if images.is_empty() && !undecodable.is_empty() {
        return Err(AppError::ProviderProtocol(format!(
            "gemini returned {} undecodable image(s): {}",
            undecodable.len(),
            undecodable.join("; ")
        )));
    }

    if images.is_empty() {
        return Err(AppError::ProviderContent(empty_result_diagnostic(&response)));
    }

    Ok(ProviderOutput {
        images,
        metadata: GenerationMetadata {
            model: response.model_version,
            finish_reasons,
            text: (!texts.is_empty()).then(|| texts.join("\n")),
        },
    })
}

fn empty_result_diagnostic(response: &GenerateContentResponse) -> String {
    let reasons: Vec<&str> = response
        .candidates
        .iter()
        .filter_map(|c| c.finish_reason.as_deref())
        .filter(|r| !r.is_empty())
        .collect();
    let reasons = if reasons.is_empty() {
        "UNKNOWN".to_string()
    } else {
        reasons.join(", ")
    };

    let mut message = format!("no image data in response (finish reason: {})", reasons);

    for candidate in &response.candidates {
        let parts = candidate.content.as_ref().map(|c| c.parts.as_slice()).unwrap_or(&[]);
        for text in parts.iter().filter_map(|p| p.text.as_deref()) {
            if !text.trim().is_empty() {
                message.push_str(&format!(" | text: {}", text.trim()));
            }
        }
        for rating in candidate.safety_ratings.iter().filter(|r| r.is_notable()) {
            message.push_str(&format!(
                " | safety: {}({})",
                rating.category,
                rating.probability.as_deref().unwrap_or_default()
            ));
        }
    }

    if let Some(feedback) = &response.prompt_feedback {
        if let Some(reason) = feedback.block_reason.as_deref().filter(|r| !r.is_empty()) {
            message.push_str(&format!(" | prompt blocked: {}", reason));
        }
        for rating in feedback.safety_ratings.iter().filter(|r| r.is_notable()) {
            message.push_str(&format!(
                " | prompt safety: {}({})",
                rating.category,
                rating.probability.as_deref().unwrap_or_default()
            ));
        }
    }

    message
}

#[async_trait]
impl ImageProvider for GeminiProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn validate_params(&self, params: &GenerationParams) -> Result<()> {
        if media::sanitize_prompt(&params.prompt).trim().is_empty() {
            return Err(AppError::validation(
                "prompt",
                "prompt is empty once inline images are removed",
            ));
        }
        if params.count == 0 || params.count > MAX_IMAGES_PER_TASK {
            return Err(AppError::validation(
                "count",
                format!("must be between 1 and {}", MAX_IMAGES_PER_TASK),
            ));
        }
        Ok(())
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<ProviderOutput> {
        let params = &request.params;
        let url = self.generate_url(&request.model);
        let body = self.build_request(params);

        debug!(
            task_id = %request.task_id,
            provider = %self.config.name,
            model = %request.model,
            mode = %params.mode(),
            aspect_ratio = %params.aspect_ratio,
            image_size = params.resolution.image_size(),
            reference_images = params.reference_images.len(),
            "Sending generateContent request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&self.config.name, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                task_id = %request.task_id,
                provider = %self.config.name,
                status = %status,
                "Gemini returned an error status"
            );
            return Err(status_error(&self.config.name, status, &body));
        }

        let payload: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| transport_error(&self.config.name, e))?;

        let mut output = collect_output(payload)?;
        if output.metadata.model.is_none() {
            output.metadata.model = Some(request.model.clone());
        }

        debug!(
            task_id = %request.task_id,
            provider = %self.config.name,
            images = output.images.len(),
            finish_reasons = ?output.metadata.finish_reasons,
            "Gemini generation finished"
        );

        Ok(output)
    }
}
