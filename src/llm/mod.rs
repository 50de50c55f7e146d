//! Language model gateway seam.
//!
//! The controller only ever sees [`LanguageModel`]: one prompt in, one
//! completion out. Vendor specifics live behind implementations.

pub mod http;
pub mod scripted;

pub use http::HttpGateway;
pub use scripted::ScriptedModel;

use crate::error::GatewayError;
use crate::types::TokenUsage;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Per-call options passed alongside the prompt.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub system_prompt: String,
    /// Free-form tags forwarded to the gateway (run id, iteration, ...).
    pub metadata: BTreeMap<String, String>,
}

impl GenerateOptions {
    pub fn with_system(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn tag(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// A single completion returned by the gateway.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

impl Generation {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
        }
    }
}

/// Single-shot text generation.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<Generation, GatewayError>;
}
