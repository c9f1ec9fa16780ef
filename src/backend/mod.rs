//! Model backend abstraction.
//!
//! This module provides a trait-based abstraction over vendor model APIs so
//! the debate orchestrator can treat heterogeneous backends interchangeably.
//! Each adapter implements the same generate/stream/cost contract; the
//! registry hands them out behind the trait, never the concrete type.

pub mod anthropic;
pub mod error;
pub mod gemini;
pub mod openai;
pub mod registry;

#[cfg(test)]
pub mod mock;

pub use anthropic::AnthropicBackend;
pub use error::{classify_http_status, BackendError, UpstreamKind};
pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;
pub use registry::BackendRegistry;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

/// Optional parameters for a generation call.
///
/// Constructed fresh per turn; never shared between calls.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Maximum output tokens to generate
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0 = deterministic)
    pub temperature: Option<f64>,
    /// Replaces any system message in the request when set
    pub system_override: Option<String>,
    /// Token budget for internal reasoning, on backends that support it
    pub reasoning_budget: Option<u32>,
    /// Cooperative cancellation signal observed by the in-flight call
    pub cancel: CancellationToken,
}

/// A full generation request: ordered messages plus options.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub messages: Vec<ChatMessage>,
    pub options: GenerateOptions,
}

/// Token usage reported by (or estimated for) a single call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Create a usage object ensuring `total_tokens` is consistent.
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens.saturating_add(output_tokens),
        }
    }
}

/// Why a generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    Complete,
    Truncated,
    Error,
}

/// Result of a non-streaming generation call.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    /// Internal reasoning trace, when the model exposes one
    pub reasoning: Option<String>,
    pub usage: TokenUsage,
    pub finish: FinishReason,
}

/// Incremental output from a streaming call.
///
/// A stream yields any number of `Text`/`Reasoning` chunks and terminates in
/// exactly one `Done` or `Error` chunk. Chunk boundaries carry no semantic
/// meaning; consumers must not assume they align with words or sentences.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Text(String),
    Reasoning(String),
    Error(String),
    Done {
        usage: TokenUsage,
        finish: FinishReason,
    },
}

impl StreamChunk {
    /// Whether this chunk ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamChunk::Done { .. } | StreamChunk::Error(_))
    }
}

/// Lazy, finite, non-restartable sequence of stream chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// Per-token pricing in nanodollars (1 USD = 1_000_000_000 nanodollars).
/// Integer math sidesteps floating-point drift in aggregate sums.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pricing {
    pub input_nano_per_token: u64,
    pub output_nano_per_token: u64,
}

impl Pricing {
    /// Build from USD rates per 1,000 tokens.
    ///
    /// $0.003 per 1k input = 3_000 nanodollars per token.
    pub fn per_1k(input_usd: f64, output_usd: f64) -> Self {
        Self {
            input_nano_per_token: (input_usd * 1_000_000.0).round() as u64,
            output_nano_per_token: (output_usd * 1_000_000.0).round() as u64,
        }
    }

    /// Cost in USD for the given token counts, rounded to 4 decimal places.
    pub fn estimate(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let nano = input_tokens
            .saturating_mul(self.input_nano_per_token)
            .saturating_add(output_tokens.saturating_mul(self.output_nano_per_token));
        // round to 1e-4 USD: 1 unit = 100_000 nanodollars
        ((nano + 50_000) / 100_000) as f64 / 10_000.0
    }
}

/// Static description of a backend: identity, model, and pricing.
#[derive(Debug, Clone)]
pub struct BackendDescriptor {
    pub id: &'static str,
    pub display_name: &'static str,
    pub model: String,
    pub vendor: &'static str,
    pub pricing: Pricing,
}

/// Uniform capability surface over a vendor model API.
///
/// Adapters hold no per-call mutable state and are safe to share across
/// concurrent sessions. Credentials are resolved from the process environment
/// at construction; their absence makes `is_available` false rather than
/// failing the call site.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn descriptor(&self) -> &BackendDescriptor;

    /// True iff the backend's credentials are present.
    fn is_available(&self) -> bool;

    /// Full, synchronous-style completion.
    async fn generate(&self, request: &GenerateRequest) -> Result<Generation, BackendError>;

    /// Incremental completion. The returned stream terminates in exactly one
    /// `Done` chunk (carrying the token counts `generate` would have
    /// returned) or one `Error` chunk - never both, never neither.
    async fn stream(&self, request: &GenerateRequest) -> Result<ChunkStream, BackendError>;

    /// Pure pricing math; deterministic and monotonic in token counts.
    fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        self.descriptor().pricing.estimate(input_tokens, output_tokens)
    }

    fn id(&self) -> &str {
        self.descriptor().id
    }
}

/// Render an SSE transport error, pulling the response body out of HTTP
/// failures so upstream status codes stay diagnosable.
pub(crate) async fn describe_sse_error(err: reqwest_eventsource::Error) -> String {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(code, response) => {
            let body = response.text().await.unwrap_or_default();
            format!("HTTP {}: {}", code.as_u16(), body)
        }
        other => other.to_string(),
    }
}

/// Conservative token estimate for when a vendor response omits usage.
pub(crate) fn approx_tokens(text: &str) -> u64 {
    (text.len() as u64 / 4).max(1)
}

/// Total conservative token estimate for a request's messages.
pub(crate) fn approx_request_tokens(request: &GenerateRequest) -> u64 {
    request
        .messages
        .iter()
        .map(|m| approx_tokens(&m.content))
        .sum()
}
