//! Careloop: a bounded ReAct tool-use runtime.
//!
//! A controller alternates model calls and tool calls until the model
//! produces a final answer or the iteration budget runs out. Tools fetch
//! data through fallback chains, progress can be streamed as server-sent
//! events, and fallback outcomes are collected for inspection.

pub mod agent;
pub mod config;
pub mod error;
pub mod fallback;
pub mod llm;
pub mod stream;
pub mod tools;
pub mod types;

pub use agent::{AgentOptions, ReActController, RunRequest};
pub use error::{GatewayError, RunError};
pub use fallback::{execute_with_fallback, FallbackChain, MetricsCollector, Strategy};
pub use llm::LanguageModel;
pub use tools::{ToolDescriptor, ToolSet};
pub use types::{ReActResult, RunStatus, StreamEvent};
