use anyhow::{Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::attachments::OutgoingMessage;
use crate::config::Settings;
use crate::transcript::{GeneratedImage, SourceLink};

macro_rules! debug_println {
    ($($arg:tt)*) => {
        if std::env::var("GEMBAR_DEBUG").is_ok() {
            eprintln!($($arg)*);
        }
    };
}

// Chat requests with attached images get upgraded to the vision-capable
// model; reasoning and image generation always use fixed models.
const VISION_MODEL: &str = "gemini-2.5-flash";
const REASONING_MODEL: &str = "gemini-2.5-pro";
const IMAGE_MODEL: &str = "gemini-2.0-flash-preview-image-generation";

pub const IMAGE_FAILURE_TEXT: &str =
    "No image came back for that prompt. Try rephrasing it and sending again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Chat,
    Search,
    Image,
    Reasoning,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Chat, Mode::Search, Mode::Image, Mode::Reasoning];

    pub fn label(&self) -> &'static str {
        match self {
            Mode::Chat => "Chat",
            Mode::Search => "Search",
            Mode::Image => "Image",
            Mode::Reasoning => "Reasoning",
        }
    }
}

// Invalid/expired credential marker; callers downcast on it.
#[derive(Debug)]
pub struct InvalidApiKey;

impl std::fmt::Display for InvalidApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "API key is invalid or expired")
    }
}

impl std::error::Error for InvalidApiKey {}

pub fn is_invalid_key(err: &anyhow::Error) -> bool {
    err.downcast_ref::<InvalidApiKey>().is_some()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct Tool {
    google_search: GoogleSearch,
}

#[derive(Debug, Serialize)]
struct GoogleSearch {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    web: Option<WebSource>,
}

#[derive(Debug, Deserialize)]
struct WebSource {
    uri: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub image: Option<GeneratedImage>,
    pub sources: Vec<SourceLink>,
}

pub struct GeminiClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        GeminiClient {
            base_url,
            api_key,
            http: reqwest::Client::new(),
        }
    }

    pub async fn send(
        &self,
        mode: Mode,
        message: OutgoingMessage,
        settings: &Settings,
    ) -> Result<Reply> {
        let has_images = !message.images.is_empty();
        match mode {
            Mode::Chat => {
                self.text_reply(
                    chat_model(settings, has_images),
                    &message,
                    Some(&settings.system_prompt),
                    false,
                )
                .await
            }
            Mode::Search => {
                self.text_reply(
                    chat_model(settings, has_images),
                    &message,
                    Some(&settings.system_prompt),
                    true,
                )
                .await
            }
            Mode::Image => self.image_reply(&message).await,
            Mode::Reasoning => self.text_reply(REASONING_MODEL, &message, None, false).await,
        }
    }

    async fn text_reply(
        &self,
        model: &str,
        message: &OutgoingMessage,
        system: Option<&str>,
        search: bool,
    ) -> Result<Reply> {
        let request = GenerateContentRequest {
            contents: vec![user_content(message)],
            system_instruction: system
                .filter(|s| !s.trim().is_empty())
                .map(|s| Content {
                    role: None,
                    parts: vec![Part {
                        text: Some(s.to_string()),
                        inline_data: None,
                    }],
                }),
            tools: search.then(|| {
                vec![Tool {
                    google_search: GoogleSearch {},
                }]
            }),
            generation_config: None,
        };

        let response = self.generate(model, &request).await?;
        let candidate = response
            .candidates
            .into_iter()
            .next()
            .context("The model returned no candidates")?;

        let text = candidate
            .content
            .as_ref()
            .map(candidate_text)
            .unwrap_or_default();
        let sources = candidate
            .grounding_metadata
            .map(extract_sources)
            .unwrap_or_default();

        Ok(Reply {
            text,
            image: None,
            sources,
        })
    }

    async fn image_reply(&self, message: &OutgoingMessage) -> Result<Reply> {
        let request = GenerateContentRequest {
            contents: vec![user_content(message)],
            system_instruction: None,
            tools: None,
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["IMAGE"],
            }),
        };

        let response = self.generate(IMAGE_MODEL, &request).await?;
        image_reply_from(response)
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);
        debug_println!("[gemini] POST {}", url);

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .context("Failed to reach the Gemini API")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug_println!("[gemini] error {}: {}", status, body);
            if invalid_key_response(status.as_u16(), &body) {
                return Err(anyhow::Error::new(InvalidApiKey));
            }
            return Err(anyhow::anyhow!("Gemini API error {}: {}", status, body));
        }

        response
            .json()
            .await
            .context("Failed to parse the Gemini API response")
    }
}

// First inline image part wins; no image at all is the fixed failure
// message, not an error.
fn image_reply_from(response: GenerateContentResponse) -> Result<Reply> {
    let parts = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .unwrap_or_default();

    for part in parts {
        if let Some(inline) = part.inline_data {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(&inline.data)
                .context("The model returned undecodable image data")?;
            return Ok(Reply {
                text: part.text.unwrap_or_default(),
                image: Some(GeneratedImage {
                    mime: inline.mime_type,
                    bytes,
                }),
                sources: Vec::new(),
            });
        }
    }

    Ok(Reply {
        text: IMAGE_FAILURE_TEXT.to_string(),
        image: None,
        sources: Vec::new(),
    })
}

fn chat_model<'a>(settings: &'a Settings, has_images: bool) -> &'a str {
    if has_images {
        VISION_MODEL
    } else {
        settings.text_model.id()
    }
}

fn user_content(message: &OutgoingMessage) -> Content {
    let mut parts = vec![Part {
        text: Some(message.text.clone()),
        inline_data: None,
    }];
    for img in &message.images {
        parts.push(Part {
            text: None,
            inline_data: Some(InlineData {
                mime_type: img.mime.clone(),
                data: img.data_b64.clone(),
            }),
        });
    }
    Content {
        role: Some("user".to_string()),
        parts,
    }
}

fn candidate_text(content: &Content) -> String {
    content
        .parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join("")
}

// Chunks without a usable web citation are dropped.
fn extract_sources(metadata: GroundingMetadata) -> Vec<SourceLink> {
    metadata
        .grounding_chunks
        .into_iter()
        .filter_map(|chunk| chunk.web)
        .filter_map(|web| {
            let uri = web.uri?;
            Some(SourceLink {
                title: web.title.unwrap_or_else(|| uri.clone()),
                uri,
            })
        })
        .collect()
}

fn invalid_key_response(status: u16, body: &str) -> bool {
    if !matches!(status, 400 | 401 | 403) {
        return false;
    }
    if let Ok(parsed) = serde_json::from_str::<ApiErrorResponse>(body) {
        return parsed.error.status == "UNAUTHENTICATED"
            || parsed.error.status == "PERMISSION_DENIED"
            || parsed.error.message.contains("API key");
    }
    body.contains("API_KEY_INVALID")
}
