//! Configuration management for the debate engine.
//!
//! Configuration can be set via environment variables:
//! - `ANTHROPIC_API_KEY` - Optional. Enables the Anthropic backend.
//! - `OPENAI_API_KEY` - Optional. Enables the OpenAI backend.
//! - `GEMINI_API_KEY` - Optional. Enables the Gemini backend.
//! - `DEBATE_ROSTER` - Optional. Comma-separated backend ids for the default
//!   roster. Defaults to `anthropic,openai`.
//! - `DEBATE_MAX_TURNS` - Optional. Maximum participant turns before forced
//!   synthesis. Defaults to `12`.
//! - `DEBATE_TURN_RETRY_MS` - Optional. Fixed delay before the single per-turn
//!   retry. Defaults to `500`.
//! - `DEBATE_SYNTHESIS_BACKEND` - Optional. Backend id used for consensus
//!   synthesis. Defaults to the first roster entry.
//!
//! A missing API key never fails configuration; it only makes that backend
//! unavailable to the registry.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend ids making up the default debate roster, in speaking order
    pub roster: Vec<String>,

    /// Maximum participant turns before the debate is forced into synthesis
    pub max_turns: u32,

    /// Fixed delay before retrying a failed turn
    pub turn_retry_delay: Duration,

    /// Backend id used for consensus synthesis (first roster entry if unset)
    pub synthesis_backend: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            roster: vec!["anthropic".to_string(), "openai".to_string()],
            max_turns: 12,
            turn_retry_delay: Duration::from_millis(500),
            synthesis_backend: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a numeric variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let roster = match std::env::var("DEBATE_ROSTER") {
            Ok(raw) => {
                let ids: Vec<String> = raw
                    .split(',')
                    .map(|id| id.trim().to_string())
                    .filter(|id| !id.is_empty())
                    .collect();
                if ids.is_empty() {
                    return Err(ConfigError::InvalidValue(
                        "DEBATE_ROSTER".to_string(),
                        "no backend ids".to_string(),
                    ));
                }
                ids
            }
            Err(_) => defaults.roster,
        };

        let max_turns = std::env::var("DEBATE_MAX_TURNS")
            .unwrap_or_else(|_| defaults.max_turns.to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("DEBATE_MAX_TURNS".to_string(), format!("{}", e)))?;

        let turn_retry_delay = std::env::var("DEBATE_TURN_RETRY_MS")
            .unwrap_or_else(|_| "500".to_string())
            .parse()
            .map(Duration::from_millis)
            .map_err(|e| {
                ConfigError::InvalidValue("DEBATE_TURN_RETRY_MS".to_string(), format!("{}", e))
            })?;

        let synthesis_backend = std::env::var("DEBATE_SYNTHESIS_BACKEND").ok();

        Ok(Self {
            roster,
            max_turns,
            turn_retry_delay,
            synthesis_backend,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.roster, vec!["anthropic", "openai"]);
        assert_eq!(config.max_turns, 12);
        assert_eq!(config.turn_retry_delay, Duration::from_millis(500));
        assert!(config.synthesis_backend.is_none());
    }
}
