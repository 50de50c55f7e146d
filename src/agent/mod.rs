//! The ReAct controller and its helpers.

pub mod context;
pub mod grounding;
pub mod injection_defense;
pub mod loop_;
pub mod parser;
pub mod system_prompt;
pub mod trace;

pub use loop_::ReActController;
pub use parser::{parse_model_turn, ModelTurn};
pub use trace::{NoopTraceSink, TraceSink, TracingSink};

use crate::tools::ToolSet;
use crate::types::{GroundingMode, GroundingPolicy};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// Controller-wide runtime limits.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Bound on each model call.
    pub model_timeout: Duration,
    /// Bound on each tool call.
    pub tool_timeout: Duration,
    /// Overall budget for one run.
    pub run_timeout: Option<Duration>,
    pub observation_max_chars: usize,
    pub transcript_max_chars: usize,
    pub grounding_policy: GroundingPolicy,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            model_timeout: Duration::from_secs(60),
            tool_timeout: Duration::from_secs(20),
            run_timeout: None,
            observation_max_chars: 4_000,
            transcript_max_chars: 20_000,
            grounding_policy: GroundingPolicy::Annotate,
        }
    }
}

/// Inputs for one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub user_message: String,
    pub system_prompt: String,
    pub tools: Arc<ToolSet>,
    pub max_iterations: u32,
    pub grounding_mode: GroundingMode,
}

impl RunRequest {
    pub fn new(user_message: impl Into<String>, tools: Arc<ToolSet>) -> Self {
        Self {
            user_message: user_message.into(),
            system_prompt: system_prompt::DEFAULT_SYSTEM_PROMPT.to_string(),
            tools,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            grounding_mode: GroundingMode::Quick,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_grounding_mode(mut self, mode: GroundingMode) -> Self {
        self.grounding_mode = mode;
        self
    }
}
