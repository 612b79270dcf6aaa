//! OpenAI-compatible chat completions image adapter

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::error::{AppError, Result};
use crate::provider::media;
use crate::provider::{
    build_http_client, status_error, transport_error, truncate, GenerationMetadata,
    GenerationRequest, ImageProvider, ProviderOutput,
};
use crate::task::params::GenerationParams;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

static DATA_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"data:image/[^;]+;base64,[A-Za-z0-9+/=]+").expect("valid data url pattern")
});

/// Adapter for chat completion endpoints that return images
pub struct OpenAiProvider {
    config: ProviderConfig,
    client: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    n: Option<u32>,
    modalities: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: RequestContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestContent {
    Text(String),
    Parts(Vec<RequestPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize, Deserialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    data: Vec<ImageData>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ImageData {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResponseContent {
    Text(String),
    Parts(Vec<ResponsePart>),
    Part(ResponsePart),
}

#[derive(Debug, Default, Deserialize)]
struct ResponsePart {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    image_url: Option<ImageUrl>,
}

/// Trim, drop a trailing `/chat/completions` and make sure the base ends in `/v1`
pub fn normalize_base_url(api_base: Option<&str>) -> String {
    let base = api_base.map(str::trim).unwrap_or_default();
    if base.is_empty() {
        return DEFAULT_BASE_URL.to_string();
    }

    let mut base = base.trim_end_matches('/');
    if let Some((head, _)) = base.split_once("/chat/completions") {
        base = head.trim_end_matches('/');
    }
    if let Some((head, _)) = base.split_once("/v1/") {
        return format!("{}/v1", head);
    }
    if base.ends_with("/v1") {
        return base.to_string();
    }
    format!("{}/v1", base)
}

/// Base64 payloads of every `data:image/...` URL embedded in text
fn images_in_text(text: &str) -> Vec<Vec<u8>> {
    DATA_URL
        .find_iter(text)
        .filter_map(|m| media::decode_base64(m.as_str()).ok())
        .collect()
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = build_http_client(&config)?;
        let base_url = normalize_base_url(config.api_base.as_deref());

        debug!(
            provider = %config.name,
            base_url = %base_url,
            keep_alive = !config.disable_keep_alive,
            "Initialized OpenAI-compatible provider"
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

    fn build_request(&self, model: &str, params: &GenerationParams) -> ChatCompletionRequest {
        let prompt = format!(
            "{}\n\nAspect ratio: {}, resolution: {}",
            media::sanitize_prompt(&params.prompt),
            params.aspect_ratio,
            params.resolution.image_size()
        );

        let content = if params.reference_images.is_empty() {
            RequestContent::Text(prompt)
        } else {
            let mut parts: Vec<RequestPart> = params
                .reference_images
                .iter()
                .map(|image| RequestPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!(
                            "data:{};base64,{}",
                            image.mime_type,
                            media::encode_base64(&image.data)
                        ),
                    },
                })
                .collect();
            parts.push(RequestPart::Text { text: prompt });
            RequestContent::Parts(parts)
        };

        ChatCompletionRequest {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user",
                content,
            }],
            n: (params.count > 1).then_some(params.count),
            modalities: vec!["text", "image"],
        }
    }

    /// Download an image, refusing bodies above `max_download_bytes`
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        let limit = self.config.max_download_bytes;
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(&self.config.name, e))?;

        if !response.status().is_success() {
            return Err(AppError::ProviderProtocol(format!(
                "downloading {} failed with {}",
                url,
                response.status()
            )));
        }

        if let Some(length) = response.content_length() {
            if length > limit as u64 {
                return Err(AppError::ProviderProtocol(format!(
                    "image at {} is {} bytes, limit is {}",
                    url, length, limit
                )));
            }
        }

        let mut data = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| transport_error(&self.config.name, e))?
        {
            if data.len() + chunk.len() > limit {
                return Err(AppError::ProviderProtocol(format!(
                    "image at {} exceeds the {} byte limit",
                    url, limit
                )));
            }
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }

    async fn decode_image_url(&self, url: &str) -> Result<Vec<u8>> {
        if url.starts_with("data:image/") {
            media::decode_base64(url).map_err(|e| {
                AppError::ProviderProtocol(format!("undecodable image data url: {}", e))
            })
        } else {
            self.fetch_image(url).await
        }
    }

    async fn collect_output(&self, response: ChatCompletionResponse) -> Result<ProviderOutput> {
        let mut images = Vec::new();

        for item in &response.data {
            let decoded = match (item.b64_json.as_deref(), item.url.as_deref()) {
                (Some(b64), _) if !b64.is_empty() => media::decode_base64(b64).map_err(|e| {
                    AppError::ProviderProtocol(format!("undecodable b64_json payload: {}", e))
                }),
                (_, Some(url)) if !url.is_empty() => self.fetch_image(url).await,
                _ => continue,
            };
            match decoded {
                Ok(bytes) => images.push(bytes),
                Err(e) => warn!(provider = %self.config.name, error = %e, "Skipping image entry"),
            }
        }

        let finish_reasons: Vec<String> = response
            .choices
            .iter()
            .filter_map(|c| c.finish_reason.clone())
            .collect();

        if !images.is_empty() {
            return Ok(ProviderOutput {
                images,
                metadata: GenerationMetadata {
                    model: response.model,
                    finish_reasons,
                    text: None,
                },
            });
        }

        if response.choices.is_empty() {
            return Err(AppError::ProviderProtocol(format!(
                "{} response contained neither data nor choices",
                self.config.name
            )));
        }

        let mut texts = Vec::new();
        for choice in &response.choices {
            let Some(content) = choice.message.as_ref().and_then(|m| m.content.as_ref()) else {
                continue;
            };
            let parts: Vec<&ResponsePart> = match content {
                ResponseContent::Text(text) => {
                    images.extend(images_in_text(text));
                    if !text.trim().is_empty() {
                        texts.push(text.trim().to_string());
                    }
                    continue;
                }
                ResponseContent::Parts(parts) => parts.iter().collect(),
                ResponseContent::Part(part) => vec![part],
            };

            for part in parts {
                match part.kind.as_str() {
                    "text" => {
                        if let Some(text) = part.text.as_deref().filter(|t| !t.trim().is_empty()) {
                            texts.push(text.trim().to_string());
                        }
                    }
                    "image_url" => {
                        let Some(url) = part.image_url.as_ref().map(|u| u.url.as_str()) else {
                            continue;
                        };
                        match self.decode_image_url(url).await {
                            Ok(bytes) => images.push(bytes),
                            Err(e) => {
                                warn!(provider = %self.config.name, error = %e, "Skipping image part")
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        if images.is_empty() {
            // Data URLs inside the text would blow up the error message
            let snippets: Vec<String> = texts
                .iter()
                .map(|t| truncate(&DATA_URL.replace_all(t, "<image>"), 300))
                .collect();
            let mut message = "no image data in response".to_string();
            if !finish_reasons.is_empty() {
                message.push_str(&format!(" (finish reason: {})", finish_reasons.join(", ")));
            }
            if !snippets.is_empty() {
                message.push_str(&format!(": {}", snippets.join(" | ")));
            }
            return Err(AppError::ProviderContent(message));
        }

        Ok(ProviderOutput {
            images,
            metadata: GenerationMetadata {
                model: response.model,
                finish_reasons,
                text: (!texts.is_empty()).then(|| texts.join("\n")),
            },
        })
    }
}

#[async_trait]
impl ImageProvider for OpenAiProvider {
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
        Ok(())
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<ProviderOutput> {
        let params = &request.params;
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request(&request.model, params);

        debug!(
            task_id = %request.task_id,
            provider = %self.config.name,
            model = %request.model,
            mode = %params.mode(),
            reference_images = params.reference_images.len(),
            "Sending chat completions request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
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
                "Chat completions returned an error status"
            );
            return Err(status_error(&self.config.name, status, &body));
        }

        let payload: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| transport_error(&self.config.name, e))?;

        let mut output = self.collect_output(payload).await?;
        if output.metadata.model.is_none() {
            output.metadata.model = Some(request.model.clone());
        }
        Ok(output)
    }
}
