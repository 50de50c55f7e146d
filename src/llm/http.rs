//! OpenAI-compatible chat completions gateway.

use super::{GenerateOptions, Generation, LanguageModel};
use crate::error::GatewayError;
use crate::types::TokenUsage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Gateway speaking the `/v1/chat/completions` dialect.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    timeout: Duration,
    http: reqwest::Client,
}

// -- Request/response payloads ----------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<MessagePayload<'a>>,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct MessagePayload<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<UsagePayload>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsagePayload {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl HttpGateway {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_tokens: 1024,
            temperature: 0.2,
            timeout: Duration::from_secs(60),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Map a non-success HTTP status and body onto a gateway error.
fn classify_status(status: u16, body: String) -> GatewayError {
    if status == 429 {
        if body.contains("insufficient_quota") {
            GatewayError::QuotaExceeded(body)
        } else {
            GatewayError::RateLimited(body)
        }
    } else if status == 402 || body.contains("insufficient_quota") {
        GatewayError::QuotaExceeded(body)
    } else if status == 408 || status == 504 {
        GatewayError::Timeout(Duration::ZERO)
    } else {
        GatewayError::Http { status, body }
    }
}

#[async_trait]
impl LanguageModel for HttpGateway {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<Generation, GatewayError> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut messages = Vec::with_capacity(2);
        if !options.system_prompt.is_empty() {
            messages.push(MessagePayload {
                role: "system",
                content: &options.system_prompt,
            });
        }
        messages.push(MessagePayload {
            role: "user",
            content: prompt,
        });

        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            user: options.metadata.get("run_id").map(String::as_str),
        };

        debug!("Gateway request to model: {}", self.model);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(self.timeout)
                } else {
                    GatewayError::Network(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), body));
        }

        let body: ChatResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let usage = body.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(Generation { content, usage })
    }
}
