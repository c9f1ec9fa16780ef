//! OpenAI Chat Completions adapter.

use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, RequestBuilderExt};
use serde::{Deserialize, Serialize};

use super::{
    approx_request_tokens, approx_tokens, BackendDescriptor, BackendError, ChatRole, ChunkStream,
    FinishReason, GenerateRequest, Generation, ModelBackend, Pricing, StreamChunk, TokenUsage,
};

const CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o";

/// Adapter for OpenAI's Chat Completions API.
pub struct OpenAiBackend {
    client: Client,
    api_key: Option<String>,
    descriptor: BackendDescriptor,
}

impl OpenAiBackend {
    /// Build from the process environment (`OPENAI_API_KEY`, `OPENAI_MODEL`).
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("OPENAI_API_KEY").ok(),
            std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        )
    }

    pub fn new(api_key: Option<String>, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            descriptor: BackendDescriptor {
                id: "openai",
                display_name: "GPT",
                model,
                vendor: "OpenAI",
                // $2.50 / 1M input, $10 / 1M output
                pricing: Pricing::per_1k(0.0025, 0.01),
            },
        }
    }

    fn api_key(&self) -> Result<&str, BackendError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| BackendError::unconfigured(self.descriptor.id))
    }

    fn build_body(&self, request: &GenerateRequest, stream: bool) -> ChatRequest {
        let mut messages: Vec<WireMessage> = Vec::new();

        if let Some(system) = &request.options.system_override {
            messages.push(WireMessage {
                role: "system",
                content: system.clone(),
            });
        }
        for message in &request.messages {
            let role = match message.role {
                ChatRole::System => {
                    if request.options.system_override.is_some() {
                        continue;
                    }
                    "system"
                }
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            };
            messages.push(WireMessage {
                role,
                content: message.content.clone(),
            });
        }

        ChatRequest {
            model: self.descriptor.model.clone(),
            messages,
            temperature: request.options.temperature,
            max_tokens: request.options.max_tokens,
            stream: stream.then_some(true),
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }
}

#[async_trait::async_trait]
impl ModelBackend for OpenAiBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<Generation, BackendError> {
        let key = self.api_key()?;
        let body = self.build_body(request, false);
        let id = self.descriptor.id;
        let cancel = request.options.cancel.clone();

        let call = async {
            let response = self
                .client
                .post(CHAT_URL)
                .bearer_auth(key)
                .json(&body)
                .send()
                .await
                .map_err(|e| BackendError::upstream(id, None, format!("request failed: {}", e)))?;

            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(BackendError::upstream(id, Some(status.as_u16()), text));
            }

            let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
                BackendError::upstream(id, None, format!("failed to parse response: {}", e))
            })?;

            let choice = parsed
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| BackendError::upstream(id, None, "no choices in response"))?;

            let output = choice.message.content.unwrap_or_default();
            let usage = match parsed.usage {
                Some(usage) => TokenUsage::new(usage.prompt_tokens, usage.completion_tokens),
                None => TokenUsage::new(approx_request_tokens(request), approx_tokens(&output)),
            };
            let finish = match choice.finish_reason.as_deref() {
                Some("length") => FinishReason::Truncated,
                _ => FinishReason::Complete,
            };

            Ok(Generation {
                text: output,
                reasoning: None,
                usage,
                finish,
            })
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
            result = call => result,
        }
    }

    async fn stream(&self, request: &GenerateRequest) -> Result<ChunkStream, BackendError> {
        let key = self.api_key()?;
        let body = self.build_body(request, true);
        let id = self.descriptor.id;
        let cancel = request.options.cancel.clone();
        let request_tokens = approx_request_tokens(request);

        let mut source = self
            .client
            .post(CHAT_URL)
            .bearer_auth(key)
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
                        if message.data == "[DONE]" {
                            let usage = usage.unwrap_or_else(|| {
                                TokenUsage::new(request_tokens, approx_tokens(&streamed))
                            });
                            yield StreamChunk::Done { usage, finish };
                            break;
                        }
                        let Ok(chunk) = serde_json::from_str::<StreamResponse>(&message.data)
                        else {
                            continue;
                        };
                        if let Some(wire) = chunk.usage {
                            usage = Some(TokenUsage::new(
                                wire.prompt_tokens,
                                wire.completion_tokens,
                            ));
                        }
                        for choice in chunk.choices {
                            if choice.finish_reason.as_deref() == Some("length") {
                                finish = FinishReason::Truncated;
                            }
                            if let Some(content) = choice.delta.content {
                                if !content.is_empty() {
                                    streamed.push_str(&content);
                                    yield StreamChunk::Text(content);
                                }
                            }
                        }
                    }
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
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
