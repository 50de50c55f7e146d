//! Configuration schema for careloop.toml.

use crate::agent::AgentOptions;
use crate::types::{GroundingMode, GroundingPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CareloopConfig {
    /// OpenAI-compatible model gateway base URL.
    pub gateway_url: String,

    /// API key sent as a bearer token to the gateway.
    pub gateway_api_key: String,

    /// Model identifier passed to the gateway.
    pub model: String,

    /// Maximum tokens per model call.
    pub max_tokens: u32,

    /// Sampling temperature.
    pub temperature: f64,

    /// Default iteration budget per run.
    pub max_iterations: u32,

    /// Observations longer than this are truncated before entering the transcript.
    pub observation_max_chars: usize,

    /// Upper bound on the rendered transcript inside each prompt.
    pub transcript_max_chars: usize,

    /// Per model call timeout.
    pub model_timeout_secs: u64,

    /// Per tool call timeout.
    pub tool_timeout_secs: u64,

    /// Overall budget for one run. Zero disables the deadline.
    pub run_timeout_secs: u64,

    /// Default grounding verification mode.
    pub grounding_mode: GroundingMode,

    /// What to do with answers that carry ungrounded claims.
    pub grounding_policy: GroundingPolicy,

    /// Capacity of the fallback metrics ring buffer.
    pub metrics_capacity: usize,

    /// Bounded channel size between the run task and the SSE encoder.
    pub stream_buffer: usize,

    /// Address the `serve` command binds to.
    pub listen_addr: String,

    /// Optional remote drug label service for the medication lookup tool.
    pub label_service_url: String,

    /// Per strategy timeout inside fallback chains.
    pub strategy_timeout_secs: u64,

    /// Log level (debug, info, warn, error).
    pub log_level: String,
}

impl Default for CareloopConfig {
    fn default() -> Self {
        Self {
            gateway_url: "https://api.openai.com".into(),
            gateway_api_key: String::new(),
            model: "gpt-4o-mini".into(),
            max_tokens: 1024,
            temperature: 0.2,
            max_iterations: 5,
            observation_max_chars: 4_000,
            transcript_max_chars: 20_000,
            model_timeout_secs: 60,
            tool_timeout_secs: 20,
            run_timeout_secs: 180,
            grounding_mode: GroundingMode::Quick,
            grounding_policy: GroundingPolicy::Annotate,
            metrics_capacity: crate::fallback::DEFAULT_METRICS_CAPACITY,
            stream_buffer: 32,
            listen_addr: "127.0.0.1:8787".into(),
            label_service_url: String::new(),
            strategy_timeout_secs: 5,
            log_level: "info".into(),
        }
    }
}

impl CareloopConfig {
    /// Runtime options for the controller derived from this config.
    pub fn agent_options(&self) -> AgentOptions {
        AgentOptions {
            model_timeout: Duration::from_secs(self.model_timeout_secs.max(1)),
            tool_timeout: Duration::from_secs(self.tool_timeout_secs.max(1)),
            run_timeout: (self.run_timeout_secs > 0)
                .then(|| Duration::from_secs(self.run_timeout_secs)),
            observation_max_chars: self.observation_max_chars,
            transcript_max_chars: self.transcript_max_chars,
            grounding_policy: self.grounding_policy,
        }
    }

    /// Remote label service URL, if one is configured.
    pub fn label_service(&self) -> Option<&str> {
        let url = self.label_service_url.trim();
        (!url.is_empty()).then_some(url)
    }

    pub fn strategy_timeout(&self) -> Duration {
        Duration::from_secs(self.strategy_timeout_secs.max(1))
    }
}
