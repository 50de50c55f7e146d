//! Shared fixtures for integration tests

#![allow(dead_code)]

use careloop::agent::{AgentOptions, ReActController};
use careloop::fallback::MetricsCollector;
use careloop::llm::ScriptedModel;
use careloop::stream::DONE_FRAME;
use careloop::tools::{medication, ToolDescriptor, ToolSet};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const LOOKUP_LISINOPRIL: &str = "Thought: I should look up lisinopril.\n\
Action: lookup_medication_instructions\n\
Action Input: {\"medicationName\": \"lisinopril\"}";

pub const FINAL_LISINOPRIL: &str = "Thought: I have the instructions.\n\
Final Answer: Lisinopril lowers blood pressure. It may cause a dry cough, and you should rise slowly to avoid dizziness.";

/// Medication tools backed only by the built-in formulary.
pub fn medication_toolset(metrics: Arc<MetricsCollector>) -> Arc<ToolSet> {
    Arc::new(
        ToolSet::new(medication::medication_tools(
            metrics,
            None,
            Duration::from_secs(2),
        ))
        .expect("medication tools register"),
    )
}

/// A tool that counts its invocations.
pub fn counting_tool(name: &str, calls: Arc<AtomicUsize>) -> ToolDescriptor {
    ToolDescriptor::from_fn(
        name,
        "Counts how often it runs",
        json!({"type": "object"}),
        move |_args: Value| {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(format!("call number {}", n))
            }
        },
    )
}

pub fn controller(model: Arc<ScriptedModel>) -> Arc<ReActController> {
    Arc::new(ReActController::new(model, AgentOptions::default()))
}

pub fn controller_with(model: Arc<ScriptedModel>, options: AgentOptions) -> Arc<ReActController> {
    Arc::new(ReActController::new(model, options))
}

/// Parse the JSON payload of a non-terminator frame.
pub fn frame_json(frame: &str) -> Value {
    let payload = frame
        .strip_prefix("data: ")
        .and_then(|rest| rest.strip_suffix("\n\n"))
        .expect("well-formed SSE frame");
    serde_json::from_str(payload).expect("frame payload is JSON")
}

/// Assert the frame sequence ends with exactly one terminator.
pub fn assert_single_trailing_done(frames: &[String]) {
    assert_eq!(
        frames.iter().filter(|f| f.as_str() == DONE_FRAME).count(),
        1,
        "expected exactly one [DONE] frame in {:?}",
        frames
    );
    assert_eq!(frames.last().map(String::as_str), Some(DONE_FRAME));
}
