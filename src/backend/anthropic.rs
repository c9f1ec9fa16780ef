//! Anthropic Messages API adapter.

use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, RequestBuilderExt};
use serde::{Deserialize, Serialize};

use super::{
    approx_request_tokens, approx_tokens, BackendDescriptor, BackendError, ChatRole, ChunkStream,
    FinishReason, GenerateRequest, Generation, ModelBackend, Pricing, StreamChunk, TokenUsage,
};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Adapter for Anthropic's Messages API.
pub struct AnthropicBackend {
    client: Client,
    api_key: Option<String>,
    descriptor: BackendDescriptor,
}

impl AnthropicBackend {
    /// Build from the process environment (`ANTHROPIC_API_KEY`,
    /// `ANTHROPIC_MODEL`). A missing key leaves the backend unavailable.
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("ANTHROPIC_API_KEY").ok(),
            std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        )
    }

    pub fn new(api_key: Option<String>, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            descriptor: BackendDescriptor {
                id: "anthropic",
                display_name: "Claude",
                model,
                vendor: "Anthropic",
                // $3 / 1M input, $15 / 1M output
                pricing: Pricing::per_1k(0.003, 0.015),
            },
        }
    }

    fn api_key(&self) -> Result<&str, BackendError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| BackendError::unconfigured(self.descriptor.id))
    }

    fn build_body(&self, request: &GenerateRequest, stream: bool) -> MessagesRequest {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut messages: Vec<WireMessage> = Vec::new();

        for message in &request.messages {
            match message.role {
                ChatRole::System => system_parts.push(&message.content),
                ChatRole::User | ChatRole::Assistant => {
                    let role = if message.role == ChatRole::User {
                        "user"
                    } else {
                        "assistant"
                    };
                    // the Messages API rejects consecutive same-role turns
                    match messages.last_mut() {
                        Some(last) if last.role == role => {
                            last.content.push_str("\n\n");
                            last.content.push_str(&message.content);
                        }
                        _ => messages.push(WireMessage {
                            role,
                            content: message.content.clone(),
                        }),
                    }
                }
            }
        }

        let system = match &request.options.system_override {
            Some(system) => Some(system.clone()),
            None if system_parts.is_empty() => None,
            None => Some(system_parts.join("\n\n")),
        };

        MessagesRequest {
            model: self.descriptor.model.clone(),
            max_tokens: request.options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages,
            system,
            temperature: request.options.temperature,
            thinking: request.options.reasoning_budget.map(|budget_tokens| Thinking {
                kind: "enabled",
                budget_tokens,
            }),
            stream,
        }
    }
}

#[async_trait::async_trait]
impl ModelBackend for AnthropicBackend {
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
                .post(MESSAGES_URL)
                .header("x-api-key", key)
                .header("anthropic-version", API_VERSION)
                .json(&body)
                .send()
                .await
                .map_err(|e| BackendError::upstream(id, None, format!("request failed: {}", e)))?;

            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(BackendError::upstream(id, Some(status.as_u16()), text));
            }

            let parsed: MessagesResponse = serde_json::from_str(&text).map_err(|e| {
                BackendError::upstream(id, None, format!("failed to parse response: {}", e))
            })?;

            let mut output = String::new();
            let mut reasoning = String::new();
            for block in parsed.content {
                match block {
                    ContentBlock::Text { text } => output.push_str(&text),
                    ContentBlock::Thinking { thinking } => reasoning.push_str(&thinking),
                    ContentBlock::Other => {}
                }
            }

            let finish = match parsed.stop_reason.as_deref() {
                Some("max_tokens") => FinishReason::Truncated,
                _ => FinishReason::Complete,
            };

            Ok(Generation {
                reasoning: (!reasoning.is_empty()).then_some(reasoning),
                usage: TokenUsage::new(parsed.usage.input_tokens, parsed.usage.output_tokens),
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
        let body = self.build_body(request, true);
        let id = self.descriptor.id;
        let cancel = request.options.cancel.clone();
        let request_tokens = approx_request_tokens(request);

        let mut source = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .eventsource()
            .map_err(|e| BackendError::upstream(id, None, format!("{}", e)))?;

        let stream = async_stream::stream! {
            let mut input_tokens = 0u64;
            let mut output_tokens = 0u64;
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
                    Some(Ok(Event::Message(message))) => match message.event.as_str() {
                        "message_start" => {
                            if let Ok(start) =
                                serde_json::from_str::<StreamMessageStart>(&message.data)
                            {
                                input_tokens = start.message.usage.input_tokens;
                            }
                        }
                        "content_block_delta" => {
                            match serde_json::from_str::<StreamContentDelta>(&message.data) {
                                Ok(StreamContentDelta {
                                    delta: DeltaBody::Text { text },
                                }) => {
                                    streamed.push_str(&text);
                                    yield StreamChunk::Text(text);
                                }
                                Ok(StreamContentDelta {
                                    delta: DeltaBody::Thinking { thinking },
                                }) => yield StreamChunk::Reasoning(thinking),
                                _ => {}
                            }
                        }
                        "message_delta" => {
                            if let Ok(delta) =
                                serde_json::from_str::<StreamMessageDelta>(&message.data)
                            {
                                if delta.delta.stop_reason.as_deref() == Some("max_tokens") {
                                    finish = FinishReason::Truncated;
                                }
                                if let Some(usage) = delta.usage {
                                    output_tokens = usage.output_tokens;
                                }
                            }
                        }
                        "message_stop" => {
                            yield StreamChunk::Done {
                                usage: TokenUsage::new(input_tokens, output_tokens),
                                finish,
                            };
                            break;
                        }
                        "error" => {
                            yield StreamChunk::Error(message.data.clone());
                            break;
                        }
                        _ => {}
                    },
                    Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => {
                        // transport closed without an explicit stop event; fall
                        // back to conservative estimates for missing counts
                        if input_tokens == 0 {
                            input_tokens = request_tokens;
                        }
                        if output_tokens == 0 {
                            output_tokens = approx_tokens(&streamed);
                        }
                        yield StreamChunk::Done {
                            usage: TokenUsage::new(input_tokens, output_tokens),
                            finish,
                        };
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
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<Thinking>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct Thinking {
    #[serde(rename = "type")]
    kind: &'static str,
    budget_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: ResponseUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "thinking")]
    Thinking { thinking: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct StreamMessageStart {
    message: StreamStartMessage,
}

#[derive(Debug, Deserialize)]
struct StreamStartMessage {
    usage: ResponseUsage,
}

#[derive(Debug, Deserialize)]
struct StreamContentDelta {
    delta: DeltaBody,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum DeltaBody {
    #[serde(rename = "text_delta")]
    Text { text: String },
    #[serde(rename = "thinking_delta")]
    Thinking { thinking: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StreamMessageDelta {
    #[serde(default)]
    delta: MessageDeltaBody,
    #[serde(default)]
    usage: Option<MessageDeltaUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaUsage {
    #[serde(default)]
    output_tokens: u64,
}
