//! Gemini language-model and embedding adapters.
//!
//! Both adapters speak the Generative Language REST API with an API key
//! header. The language-model adapter supports structured output through a
//! response schema and strips fenced code wrappers from model text.

use super::{strip_code_fence, CallArgs, Embedding, LanguageModel, LlmReply, StreamPacket};
use crate::error::PluginError;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// The Generative Language API base URL.
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Language-model adapter for Gemini.
pub struct GeminiLlm {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiLlm {
    /// Create a new adapter with the default base URL.
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(api_key, model, GEMINI_BASE_URL.to_string())
    }

    /// Create a new adapter with a custom base URL (for testing).
    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model,
        }
    }

    fn request_body(
        &self,
        prompt: &str,
        structured_schema: Option<&serde_json::Value>,
    ) -> GenerateRequest {
        let generation_config = match structured_schema {
            Some(schema) => GenerationConfig {
                temperature: 1.0,
                top_p: 0.95,
                top_k: 40,
                max_output_tokens: 8192,
                response_mime_type: "application/json",
                response_schema: Some(schema.clone()),
            },
            None => GenerationConfig {
                temperature: 1.0,
                top_p: 0.95,
                top_k: 40,
                max_output_tokens: 8192,
                response_mime_type: "text/plain",
                response_schema: None,
            },
        };

        GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config,
        }
    }

    fn model_for(&self, args: &CallArgs) -> String {
        args.model.clone().unwrap_or_else(|| self.model.clone())
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, PluginError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        Err(PluginError::Api { status, message })
    }
}

#[async_trait::async_trait]
impl LanguageModel for GeminiLlm {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn submit(
        &self,
        prompt: &str,
        structured_schema: Option<&serde_json::Value>,
        args: &CallArgs,
    ) -> Result<LlmReply, PluginError> {
        let model = self.model_for(args);
        tracing::debug!(provider = "gemini", model = %model, chars = prompt.len(), "LLM request");

        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(prompt, structured_schema))
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| PluginError::Parse(format!("failed to parse Gemini response: {e}")))?;

        let text = body
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .ok_or_else(|| PluginError::Parse("Gemini response has no candidates".to_string()))?;

        Ok(LlmReply {
            text: strip_code_fence(&text).to_string(),
        })
    }

    async fn submit_streaming(
        &self,
        prompt: &str,
        args: &CallArgs,
        sink: mpsc::Sender<StreamPacket>,
    ) -> Result<LlmReply, PluginError> {
        let model = self.model_for(args);
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, model
        );
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(prompt, None))
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let mut full_response = String::new();
        let mut finish_reason = String::new();
        let mut buffer = String::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);

                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                let Ok(event) = serde_json::from_str::<GenerateResponse>(data) else {
                    continue;
                };
                for candidate in event.candidates {
                    if let Some(reason) = candidate.finish_reason {
                        finish_reason = reason;
                    }
                    for part in candidate.content.parts {
                        full_response.push_str(&part.text);
                        let _ = sink
                            .send(StreamPacket {
                                packet: part.text,
                                finish: false,
                                finish_reason: String::new(),
                            })
                            .await;
                    }
                }
            }
        }

        let _ = sink
            .send(StreamPacket {
                packet: String::new(),
                finish: true,
                finish_reason,
            })
            .await;

        Ok(LlmReply {
            text: full_response,
        })
    }
}

/// Embedding adapter for Gemini.
pub struct GeminiEmbedding {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl GeminiEmbedding {
    /// Create a new adapter with the default base URL.
    pub fn new(api_key: String, model: String, dimensions: usize) -> Self {
        Self::with_base_url(api_key, model, dimensions, GEMINI_BASE_URL.to_string())
    }

    /// Create a new adapter with a custom base URL (for testing).
    pub fn with_base_url(
        api_key: String,
        model: String,
        dimensions: usize,
        base_url: String,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model,
            dimensions,
        }
    }
}

#[async_trait::async_trait]
impl Embedding for GeminiEmbedding {
    fn name(&self) -> &str {
        "gemini"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn generate(
        &self,
        strings: &[String],
        args: &CallArgs,
    ) -> Result<Vec<Vec<f32>>, PluginError> {
        let model = args.model.clone().unwrap_or_else(|| self.model.clone());
        tracing::debug!(provider = "gemini", model = %model, batch = strings.len(), "Embedding request");

        let request = BatchEmbedRequest {
            requests: strings
                .iter()
                .map(|text| EmbedRequest {
                    model: format!("models/{model}"),
                    content: Content {
                        role: "user",
                        parts: vec![Part { text: text.clone() }],
                    },
                    task_type: "RETRIEVAL_QUERY",
                })
                .collect(),
        };

        let url = format!("{}/models/{}:batchEmbedContents", self.base_url, model);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;
        let response = GeminiLlm::check_status(response).await?;

        let body: BatchEmbedResponse = response
            .json()
            .await
            .map_err(|e| PluginError::Parse(format!("failed to parse embed response: {e}")))?;

        if body.embeddings.len() != strings.len() {
            return Err(PluginError::Parse(format!(
                "embedding count mismatch: {} returned for {} inputs",
                body.embeddings.len(),
                strings.len()
            )));
        }

        Ok(body.embeddings.into_iter().map(|e| e.values).collect())
    }
}

// --- Internal Serde types ---

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "topK")]
    top_k: u32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'static str,
    #[serde(rename = "responseSchema", skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
struct BatchEmbedRequest {
    requests: Vec<EmbedRequest>,
}

#[derive(Serialize)]
struct EmbedRequest {
    model: String,
    content: Content,
    #[serde(rename = "taskType")]
    task_type: &'static str,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbedValues>,
}

#[derive(Deserialize)]
struct EmbedValues {
    #[serde(default)]
    values: Vec<f32>,
}
