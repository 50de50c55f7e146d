//! Shared types used across the careloop runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Run lifecycle
// ---------------------------------------------------------------------------

/// Phases the ReAct controller moves through during one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Request accepted, nothing sent to the model yet.
    Init,
    /// Waiting on the model gateway.
    Thinking,
    /// Dispatching a tool call.
    Acting,
    /// Recording the tool's observation.
    Observing,
    /// Terminated with a final answer.
    Done,
    /// Terminated because the iteration budget ran out.
    MaxIterations,
    /// Terminated by a gateway failure or cancellation.
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Thinking => write!(f, "thinking"),
            Self::Acting => write!(f, "acting"),
            Self::Observing => write!(f, "observing"),
            Self::Done => write!(f, "done"),
            Self::MaxIterations => write!(f, "max_iterations"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Terminal status of a run. Every run ends in exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    MaxIterations,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => write!(f, "done"),
            Self::MaxIterations => write!(f, "max_iterations"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl From<RunStatus> for RunPhase {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Done => Self::Done,
            RunStatus::MaxIterations => Self::MaxIterations,
            RunStatus::Failed => Self::Failed,
        }
    }
}

// ---------------------------------------------------------------------------
// Grounding
// ---------------------------------------------------------------------------

/// How the final answer is checked against collected observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundingMode {
    /// No verification.
    Off,
    /// Pattern-based scan for numeric claims, no model call.
    #[default]
    Quick,
}

impl fmt::Display for GroundingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Quick => write!(f, "quick"),
        }
    }
}

/// What happens to an answer that carries ungrounded claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundingPolicy {
    /// Record the flagged claims in metadata, leave the answer alone.
    #[default]
    Annotate,
    /// Record the flagged claims and prefix the answer with a caution notice.
    /// Never triggers a regeneration.
    Reject,
}

/// Outcome of a grounding scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundingReport {
    pub mode: GroundingMode,
    /// Number of quantitative claims found in the answer.
    pub claims_checked: usize,
    /// Claims not traceable to any observation, in order of appearance.
    pub ungrounded: Vec<String>,
    /// Set when `GroundingPolicy::Reject` altered the answer.
    #[serde(default)]
    pub rejected: bool,
}

impl GroundingReport {
    pub fn is_grounded(&self) -> bool {
        self.ungrounded.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Steps and results
// ---------------------------------------------------------------------------

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub args: serde_json::Value,
}

/// Record of one loop iteration. Never mutated after it is appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReActStep {
    pub iteration: u32,
    pub thought: Option<String>,
    pub action: Option<ToolInvocation>,
    pub observation: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Broad failure categories surfaced to callers of a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    RateLimited,
    TimedOut,
    QuotaExceeded,
    Unavailable,
    Cancelled,
    DeadlineExceeded,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => write!(f, "rate_limited"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::QuotaExceeded => write!(f, "quota_exceeded"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::DeadlineExceeded => write!(f, "deadline_exceeded"),
        }
    }
}

/// Why a run ended in `RunStatus::Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub category: FailureCategory,
    /// Technical detail, for logs.
    pub message: String,
}

/// Bookkeeping attached to every result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub model_calls: u32,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grounding: Option<GroundingReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureInfo>,
}

/// Final outcome of a run, produced exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReActResult {
    pub answer: String,
    pub iterations: u32,
    /// Distinct registered tools invoked, in first-use order.
    pub tools_used: Vec<String>,
    pub reasoning_trace: Vec<String>,
    pub steps: Vec<ReActStep>,
    pub status: RunStatus,
    pub metadata: RunMetadata,
}

impl ReActResult {
    /// Flagged claims from the grounding scan, if one ran.
    pub fn ungrounded_claims(&self) -> &[String] {
        self.metadata
            .grounding
            .as_ref()
            .map(|g| g.ungrounded.as_slice())
            .unwrap_or(&[])
    }
}

// ---------------------------------------------------------------------------
// Stream events
// ---------------------------------------------------------------------------

/// Wire-level progress unit. Emitted while a run progresses, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Thought {
        iteration: u32,
        content: String,
        timestamp: DateTime<Utc>,
    },
    Action {
        iteration: u32,
        tool: String,
        args: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    Observation {
        iteration: u32,
        tool: String,
        content: String,
        is_error: bool,
        timestamp: DateTime<Utc>,
    },
    Final {
        iteration: u32,
        answer: String,
        status: RunStatus,
        tools_used: Vec<String>,
        #[serde(default)]
        ungrounded: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    Error {
        iteration: u32,
        category: FailureCategory,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl StreamEvent {
    pub fn iteration(&self) -> u32 {
        match self {
            Self::Thought { iteration, .. }
            | Self::Action { iteration, .. }
            | Self::Observation { iteration, .. }
            | Self::Final { iteration, .. }
            | Self::Error { iteration, .. } => *iteration,
        }
    }

    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Thought { .. } => "thought",
            Self::Action { .. } => "action",
            Self::Observation { .. } => "observation",
            Self::Final { .. } => "final",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Final { .. } | Self::Error { .. })
    }
}

// ---------------------------------------------------------------------------
// Inference
// ---------------------------------------------------------------------------

/// Token usage from a model call, when the gateway reports it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}
