//! Observability sink around runs and tool calls.
//!
//! The controller works the same with or without a sink; [`NoopTraceSink`]
//! is the default.

use crate::types::{ReActResult, ReActStep};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

pub trait TraceSink: Send + Sync {
    fn begin_run(&self, _run_id: &str, _user_message: &str) {}

    fn update_run(&self, _run_id: &str, _step: &ReActStep) {}

    fn end_run(&self, _run_id: &str, _result: &ReActResult) {}

    fn begin_tool(&self, _run_id: &str, _iteration: u32, _tool: &str, _args: &Value) {}

    fn end_tool(
        &self,
        _run_id: &str,
        _iteration: u32,
        _tool: &str,
        _success: bool,
        _elapsed: Duration,
    ) {
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTraceSink;

impl TraceSink for NoopTraceSink {}

/// Forwards spans to `tracing` at info/debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn begin_run(&self, run_id: &str, user_message: &str) {
        info!(run_id, "run started ({} chars)", user_message.len());
    }

    fn update_run(&self, run_id: &str, step: &ReActStep) {
        debug!(
            run_id,
            iteration = step.iteration,
            tool = step.action.as_ref().map(|a| a.tool.as_str()).unwrap_or("-"),
            "step recorded"
        );
    }

    fn end_run(&self, run_id: &str, result: &ReActResult) {
        info!(
            run_id,
            status = %result.status,
            iterations = result.iterations,
            model_calls = result.metadata.model_calls,
            elapsed_ms = result.metadata.elapsed_ms,
            "run finished"
        );
    }

    fn begin_tool(&self, run_id: &str, iteration: u32, tool: &str, _args: &Value) {
        debug!(run_id, iteration, tool, "tool started");
    }

    fn end_tool(&self, run_id: &str, iteration: u32, tool: &str, success: bool, elapsed: Duration) {
        info!(
            run_id,
            iteration,
            tool,
            success,
            elapsed_ms = elapsed.as_millis() as u64,
            "tool finished"
        );
    }
}
