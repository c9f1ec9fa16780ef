//! Scripted in-process backend for orchestrator and cost tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use futures::stream;

use super::{
    BackendDescriptor, BackendError, ChunkStream, FinishReason, GenerateRequest, Generation,
    ModelBackend, Pricing, StreamChunk, TokenUsage,
};

/// One scripted reaction to a generate/stream call.
pub enum Script {
    /// Succeed with this text (and fixed usage unless overridden), after an
    /// optional delay.
    Reply {
        text: String,
        usage: TokenUsage,
        delay: Option<std::time::Duration>,
    },
    /// Fail at call time, before any chunk is produced.
    CallError(BackendError),
    /// Stream some text, then terminate with an error chunk.
    MidStreamError { prefix: String, message: String },
    /// Never produce a chunk (for cancellation tests).
    Hang,
}

/// Backend whose replies are scripted up front, consumed in order.
pub struct ScriptedBackend {
    descriptor: BackendDescriptor,
    available: bool,
    scripts: Mutex<VecDeque<Script>>,
}

impl ScriptedBackend {
    pub fn new(id: &'static str) -> Self {
        Self {
            descriptor: BackendDescriptor {
                id,
                display_name: id,
                model: format!("{}-test", id),
                vendor: "test",
                // $3 / 1M input, $15 / 1M output
                pricing: Pricing::per_1k(0.003, 0.015),
            },
            available: true,
            scripts: Mutex::new(VecDeque::new()),
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn reply(self, text: &str) -> Self {
        self.reply_with_usage(text, 100, 50)
    }

    pub fn reply_with_usage(self, text: &str, input_tokens: u64, output_tokens: u64) -> Self {
        self.push(Script::Reply {
            text: text.to_string(),
            usage: TokenUsage::new(input_tokens, output_tokens),
            delay: None,
        })
    }

    pub fn reply_after(self, text: &str, delay: std::time::Duration) -> Self {
        self.push(Script::Reply {
            text: text.to_string(),
            usage: TokenUsage::new(100, 50),
            delay: Some(delay),
        })
    }

    pub fn fail(self, message: &str) -> Self {
        let id = self.descriptor.id;
        self.push(Script::CallError(BackendError::upstream(
            id,
            Some(500),
            message,
        )))
    }

    pub fn fail_permanent(self, message: &str) -> Self {
        let id = self.descriptor.id;
        self.push(Script::CallError(BackendError::upstream(
            id,
            Some(401),
            message,
        )))
    }

    pub fn fail_mid_stream(self, prefix: &str, message: &str) -> Self {
        self.push(Script::MidStreamError {
            prefix: prefix.to_string(),
            message: message.to_string(),
        })
    }

    pub fn hang(self) -> Self {
        self.push(Script::Hang)
    }

    fn push(self, script: Script) -> Self {
        self.scripts.lock().unwrap().push_back(script);
        self
    }

    fn next_script(&self) -> Script {
        self.scripts.lock().unwrap().pop_front().unwrap_or(Script::Reply {
            text: "out of scripted replies".to_string(),
            usage: TokenUsage::new(10, 5),
            delay: None,
        })
    }
}

#[async_trait::async_trait]
impl ModelBackend for ScriptedBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn generate(&self, _request: &GenerateRequest) -> Result<Generation, BackendError> {
        if !self.available {
            return Err(BackendError::unconfigured(self.descriptor.id));
        }
        match self.next_script() {
            Script::Reply { text, usage, delay } => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(Generation {
                    text,
                    reasoning: None,
                    usage,
                    finish: FinishReason::Complete,
                })
            }
            Script::CallError(err) => Err(err),
            Script::MidStreamError { message, .. } => {
                Err(BackendError::upstream(self.descriptor.id, None, message))
            }
            Script::Hang => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn stream(&self, _request: &GenerateRequest) -> Result<ChunkStream, BackendError> {
        if !self.available {
            return Err(BackendError::unconfigured(self.descriptor.id));
        }
        match self.next_script() {
            Script::Reply { text, usage, delay } => {
                let stream = async_stream::stream! {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    yield StreamChunk::Text(text);
                    yield StreamChunk::Done {
                        usage,
                        finish: FinishReason::Complete,
                    };
                };
                Ok(Box::pin(stream))
            }
            Script::CallError(err) => Err(err),
            Script::MidStreamError { prefix, message } => {
                let chunks = vec![StreamChunk::Text(prefix), StreamChunk::Error(message)];
                Ok(Box::pin(stream::iter(chunks)))
            }
            Script::Hang => Ok(Box::pin(stream::pending())),
        }
    }
}
