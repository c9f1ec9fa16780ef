//! Google Gemini adapter (Generative Language API).

use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, RequestBuilderExt};
use serde::{Deserialize, Serialize};

use super::{
    approx_request_tokens, approx_tokens, BackendDescriptor, BackendError, ChatRole, ChunkStream,
    FinishReason, GenerateRequest, Generation, ModelBackend, Pricing, StreamChunk, TokenUsage,
};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_MODEL: &str = "gemini-2.5-pro";

/// Adapter for Google's Generative Language API.
pub struct GeminiBackend {
    client: Client,
    api_key: Option<String>,
    descriptor: BackendDescriptor,
}

impl GeminiBackend {
    /// Build from the process environment (`GEMINI_API_KEY`, `GEMINI_MODEL`).
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("GEMINI_API_KEY").ok(),
            std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        )
    }

    pub fn new(api_key: Option<String>, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            descriptor: BackendDescriptor {
                id: "gemini",
                display_name: "Gemini",
                model,
                vendor: "Google",
                // $1.25 / 1M input, $10 / 1M output
                pricing: Pricing::per_1k(0.00125, 0.01),
            },
        }
    }

    fn api_key(&self) -> Result<&str, BackendError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| BackendError::unconfigured(self.descriptor.id))
    }

    fn endpoint(&self, stream: bool) -> String {
        if stream {
            format!(
                "{}/{}:streamGenerateContent?alt=sse",
                BASE_URL, self.descriptor.model
            )
        } else {
            format!("{}/{}:generateContent", BASE_URL, self.descriptor.model)
        }
    }

    fn build_body(&self, request: &GenerateRequest) -> GenerateContentRequest {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut contents: Vec<Content> = Vec::new();

        for message in &request.messages {
            match message.role {
                ChatRole::System => system_parts.push(&message.content),
                ChatRole::User | ChatRole::Assistant => {
                    let role = if message.role == ChatRole::User {
                        "user"
                    } else {
                        "model"
                    };
                    // the API expects alternating user/model turns
                    match contents.last_mut() {
                        Some(last) if last.role == Some(role) => last.parts.push(Part {
                            text: message.content.clone(),
                        }),
                        _ => contents.push(Content {
                            role: Some(role),
                            parts: vec![Part {
                                text: message.content.clone(),
                            }],
                        }),
                    }
                }
            }
        }

        let system_text = match &request.options.system_override {
            Some(system) => Some(system.clone()),
            None if system_parts.is_empty() => None,
            None => Some(system_parts.join("\n\n")),
        };

        let generation_config = GenerationConfig {
            temperature: request.options.temperature,
            max_output_tokens: request.options.max_tokens,
            thinking_config: request
                .options
                .reasoning_budget
                .map(|thinking_budget| ThinkingConfig { thinking_budget }),
        };

        GenerateContentRequest {
            contents,
            system_instruction: system_text.map(|text| Content {
                role: None,
                parts: vec![Part { text }],
            }),
            generation_config: Some(generation_config),
        }
    }
}

#[async_trait::async_trait]
impl ModelBackend for GeminiBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<Generation, BackendError> {
        let key = self.api_key()?;
        let body = self.build_body(request);
        let id = self.descriptor.id;
        let cancel = request.options.cancel.clone();

        let call = async {
            let response = self
                .client
                .post(self.endpoint(false))
                .header("x-goog-api-key", key)
                .json(&body)
                .send()
                .await
                .map_err(|e| BackendError::upstream(id, None, format!("request failed: {}", e)))?;

            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(BackendError::upstream(id, Some(status.as_u16()), text));
            }

            let parsed: GenerateContentResponse = serde_json::from_str(&text).map_err(|e| {
                BackendError::upstream(id, None, format!("failed to parse response: {}", e))
            })?;

            let candidate = parsed
                .candidates
                .into_iter()
                .next()
                .ok_or_else(|| BackendError::upstream(id, None, "no candidates in response"))?;

            let mut output = String::new();
            let mut reasoning = String::new();
            if let Some(content) = candidate.content {
                for part in content.parts {
                    let Some(text) = part.text else { continue };
                    if part.thought.unwrap_or(false) {
                        reasoning.push_str(&text);
                    } else {
                        output.push_str(&text);
                    }
                }
            }

            let usage = match parsed.usage_metadata {
                Some(meta) => TokenUsage::new(meta.prompt_token_count, meta.candidates_token_count),
                None => TokenUsage::new(approx_request_tokens(request), approx_tokens(&output)),
            };
            let finish = match candidate.finish_reason.as_deref() {
                Some("MAX_TOKENS") => FinishReason::Truncated,
                _ => FinishReason::Complete,
            };

            Ok(Generation {
                reasoning: (!reasoning.is_empty()).then_some(reasoning),
                usage,
                finish,
                text: output,
            })
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
            result = call => result,
        }
    }

    async fn stream(&self, request: &GenerateRequest) -> Result<ChunkStream, BackendError> {
        let key = self.api_key()?;
        let body = self.build_body(request);
        let id = self.descriptor.id;
        let cancel = request.options.cancel.clone();
        let request_tokens = approx_request_tokens(request);

        let mut source = self
            .client
            .post(self.endpoint(true))
            .header("x-goog-api-key", key)
            .json(&body)
            .eventsource()
            .map_err(|e| BackendError::upstream(id, None, format!("{}", e)))?;

        let stream = async_stream::stream! {
            let mut usage: Option<TokenUsage> = None;
            let mut streamed = String::new();
            let mut finish = FinishReason::Complete;

            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => None,
                    event = source.next() => Some(event),
                };
                let Some(event) = event else {
                    yield StreamChunk::Error("call cancelled".to_string());
                    break;
                };

                match event {
                    Some(Ok(Event::Open)) => {}
                    Some(Ok(Event::Message(message))) => {
                        let Ok(chunk) =
                            serde_json::from_str::<GenerateContentResponse>(&message.data)
                        else {
                            continue;
                        };
                        if let Some(meta) = chunk.usage_metadata {
                            usage = Some(TokenUsage::new(
                                meta.prompt_token_count,
                                meta.candidates_token_count,
                            ));
                        }
                        for candidate in chunk.candidates {
                            if candidate.finish_reason.as_deref() == Some("MAX_TOKENS") {
                                finish = FinishReason::Truncated;
                            }
                            let Some(content) = candidate.content else {
                                continue;
                            };
                            for part in content.parts {
                                let Some(text) = part.text else { continue };
                                if text.is_empty() {
                                    continue;
                                }
                                if part.thought.unwrap_or(false) {
                                    yield StreamChunk::Reasoning(text);
                                } else {
                                    streamed.push_str(&text);
                                    yield StreamChunk::Text(text);
                                }
                            }
                        }
                    }
                    // the API ends the stream without an explicit stop event
                    Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => {
                        let usage = usage.unwrap_or_else(|| {
                            TokenUsage::new(request_tokens, approx_tokens(&streamed))
                        });
                        yield StreamChunk::Done { usage, finish };
                        break;
                    }
                    Some(Err(err)) => {
                        yield StreamChunk::Error(super::describe_sse_error(err).await);
                        break;
                    }
                }
            }
            source.close();
        };

        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(rename = "thinkingConfig", skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Debug, Serialize)]
struct ThinkingConfig {
    #[serde(rename = "thinkingBudget")]
    thinking_budget: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u64,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u64,
}
