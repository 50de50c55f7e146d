//! Per-iteration prompt builder.
//!
//! Renders the user request plus the transcript of earlier
//! Thought/Action/Observation triples. The transcript is bounded: when it
//! grows past the limit, the oldest iterations are dropped.

use crate::types::ReActStep;
use tracing::debug;

const TRUNCATION_MARKER: &str = "[Earlier iterations truncated]\n\n";

/// Render one step the way the model is asked to write it.
pub fn render_step(step: &ReActStep) -> String {
    let mut out = String::new();
    match &step.thought {
        Some(thought) => out.push_str(&format!("Thought: {}\n", thought)),
        None => out.push_str("Thought: (no usable response)\n"),
    }
    if let Some(action) = &step.action {
        out.push_str(&format!("Action: {}\n", action.tool));
        out.push_str(&format!("Action Input: {}\n", action.args));
    }
    if let Some(observation) = &step.observation {
        out.push_str(&format!("Observation: {}\n", observation));
    }
    out.push('\n');
    out
}

/// Render the transcript, keeping only the most recent steps that fit.
pub fn render_transcript(steps: &[ReActStep], max_chars: usize) -> String {
    let mut blocks: Vec<String> = Vec::new();
    let mut used = 0;

    for step in steps.iter().rev() {
        let block = render_step(step);
        if used + block.len() > max_chars && !blocks.is_empty() {
            break;
        }
        used += block.len();
        blocks.push(block);
    }

    let truncated = blocks.len() < steps.len();
    blocks.reverse();

    let mut out = String::with_capacity(used + TRUNCATION_MARKER.len());
    if truncated {
        debug!(
            "Transcript truncated: kept {} of {} steps",
            blocks.len(),
            steps.len()
        );
        out.push_str(TRUNCATION_MARKER);
    }
    for block in blocks {
        out.push_str(&block);
    }
    out
}

/// Build the prompt for one model call.
pub fn build_prompt(
    user_message: &str,
    steps: &[ReActStep],
    max_transcript_chars: usize,
) -> String {
    let mut prompt = format!("Question: {}\n\n", user_message.trim());
    if !steps.is_empty() {
        prompt.push_str(&render_transcript(steps, max_transcript_chars));
    }
    prompt.push_str("Respond with your next Thought followed by an Action or a Final Answer.");
    prompt
}

/// Cut `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_observation(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{}... [truncated]", kept)
}
