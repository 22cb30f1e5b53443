//! OpenAI-compatible HTTP client for chat completions, query routing,
//! and embeddings.
//!
//! Blocking `reqwest` client; callers in async context go through
//! `tokio::task::spawn_blocking`.

use std::io::{BufRead, BufReader};
use std::sync::mpsc::Sender;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::types::{EmbeddingModel, LlmGenerate, LlmMessage, RouterModel};
use super::RagError;

const SERVICE: &str = "openai";

pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    chat_model: String,
    router_model: String,
    embedding_model: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OpenAiClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        chat_model: &str,
        router_model: &str,
        embedding_model: &str,
        timeout_secs: u64,
    ) -> Result<Self, RagError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RagError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            chat_model: chat_model.to_string(),
            router_model: router_model.to_string(),
            embedding_model: embedding_model.to_string(),
            client,
            timeout_secs,
        })
    }

    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// POST a JSON body and return the successful response.
    fn post<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::blocking::Response, RagError> {
        let response = self
            .client
            .post(self.endpoint(path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .map_err(|e| RagError::from_send(SERVICE, self.timeout_secs, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            tracing::warn!(status = status.as_u16(), path, "OpenAI request failed");
            return Err(RagError::from_status(SERVICE, status.as_u16(), body));
        }
        Ok(response)
    }

    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, RagError> {
        let parsed: CompletionResponse = self
            .post("chat/completions", request)?
            .json()
            .map_err(|e| RagError::ResponseParsing(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RagError::ResponseParsing("completion has no choices".into()))
    }
}

// ═══════════════════════════════════════════
// Wire types
// ═══════════════════════════════════════════

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [LlmMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// One parsed line of a `text/event-stream` completion.
#[derive(Debug, PartialEq)]
pub(crate) enum SseEvent {
    Token(String),
    Done,
    Skip,
}

/// Parse an SSE line from a streaming completion.
pub(crate) fn parse_sse_line(line: &str) -> Result<SseEvent, RagError> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(SseEvent::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }
    if data.is_empty() {
        return Ok(SseEvent::Skip);
    }
    let chunk: StreamChunk =
        serde_json::from_str(data).map_err(|e| RagError::StreamingError(e.to_string()))?;
    match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
        Some(token) if !token.is_empty() => Ok(SseEvent::Token(token)),
        _ => Ok(SseEvent::Skip),
    }
}

// ═══════════════════════════════════════════
// Trait implementations
// ═══════════════════════════════════════════

impl LlmGenerate for OpenAiClient {
    fn generate(&self, messages: &[LlmMessage]) -> Result<String, RagError> {
        self.complete(&CompletionRequest {
            model: &self.chat_model,
            messages,
            temperature: 0.0,
            stream: false,
            response_format: None,
        })
    }

    fn generate_streaming(
        &self,
        messages: &[LlmMessage],
        token_tx: Sender<String>,
    ) -> Result<String, RagError> {
        let response = self.post(
            "chat/completions",
            &CompletionRequest {
                model: &self.chat_model,
                messages,
                temperature: 0.0,
                stream: true,
                response_format: None,
            },
        )?;

        let mut full = String::new();
        for line in BufReader::new(response).lines() {
            let line = line.map_err(|e| RagError::StreamingError(e.to_string()))?;
            match parse_sse_line(&line)? {
                SseEvent::Token(token) => {
                    full.push_str(&token);
                    if token_tx.send(token).is_err() {
                        tracing::debug!("Token receiver dropped, stopping stream");
                        break;
                    }
                }
                SseEvent::Done => break,
                SseEvent::Skip => {}
            }
        }
        Ok(full)
    }
}

impl RouterModel for OpenAiClient {
    fn classify(&self, system: &str, query: &str) -> Result<String, RagError> {
        let messages = [LlmMessage::system(system), LlmMessage::user(query)];
        self.complete(&CompletionRequest {
            model: &self.router_model,
            messages: &messages,
            temperature: 0.0,
            stream: false,
            response_format: Some(ResponseFormat {
                kind: "json_object",
            }),
        })
    }
}

impl EmbeddingModel for OpenAiClient {
    fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let parsed: EmbeddingResponse = self
            .post(
                "embeddings",
                &EmbeddingRequest {
                    model: &self.embedding_model,
                    input: text,
                },
            )?
            .json()
            .map_err(|e| RagError::ResponseParsing(e.to_string()))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| RagError::EmbeddingFailed("no embedding returned".into()))
    }
}
