//! Turns free-form model output into a [`ModelTurn`].
//!
//! Expected shapes:
//!
//! ```text
//! Thought: <reasoning>
//! Action: <tool name>
//! Action Input: <JSON object>
//! ```
//!
//! or
//!
//! ```text
//! Thought: <reasoning>
//! Final Answer: <answer>
//! ```
//!
//! When both an action and a final answer appear, whichever comes first
//! wins; anything the model writes after its first directive is treated as
//! hallucinated continuation.

use crate::types::ToolInvocation;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// One parsed model response.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelTurn {
    /// Reasoning only, no directive.
    Thought(String),
    Action {
        thought: Option<String>,
        invocation: ToolInvocation,
    },
    FinalAnswer {
        thought: Option<String>,
        answer: String,
    },
    /// Nothing recognizable. Carries the raw text for logging.
    Unparseable(String),
}

fn thought_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^[\s*]*thought\s*\d*\s*:\s*").unwrap())
}

fn action_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^[\s*]*action\s*\d*\s*:[ \t]*(.*)$").unwrap())
}

fn action_input_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^[\s*]*action[ \t]+input\s*\d*\s*:\s*").unwrap())
}

fn final_answer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^[\s*]*final[ \t]+answer\s*:\s*").unwrap())
}

fn observation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^[\s*]*observation\s*\d*\s*:").unwrap())
}

fn tool_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*").unwrap())
}

/// Parse one model response.
pub fn parse_model_turn(text: &str) -> ModelTurn {
    let text = text.trim();
    if text.is_empty() {
        return ModelTurn::Unparseable(String::new());
    }

    let action = action_re().captures(text);
    let final_answer = final_answer_re().find(text);

    let action_start = action.as_ref().and_then(|c| c.get(0)).map(|m| m.start());
    let final_start = final_answer.map(|m| m.start());

    let action_first = match (action_start, final_start) {
        (Some(a), Some(f)) => a < f,
        (Some(_), None) => true,
        _ => false,
    };

    if action_first {
        if let Some(caps) = action {
            let (Some(whole), Some(line)) = (caps.get(0), caps.get(1)) else {
                return ModelTurn::Unparseable(text.to_string());
            };
            let thought = extract_thought(&text[..whole.start()]);
            return match parse_invocation(line.as_str(), &text[whole.end()..]) {
                Some(invocation) => ModelTurn::Action {
                    thought,
                    invocation,
                },
                None => ModelTurn::Unparseable(text.to_string()),
            };
        }
    }

    if let Some(m) = final_answer {
        let answer = cut_at_observation(&text[m.end()..]).trim().to_string();
        let thought = extract_thought(&text[..m.start()]);
        if answer.is_empty() {
            return match thought {
                Some(t) => ModelTurn::Thought(t),
                None => ModelTurn::Unparseable(text.to_string()),
            };
        }
        return ModelTurn::FinalAnswer { thought, answer };
    }

    match thought_re().find(text) {
        Some(m) => {
            let thought = text[m.end()..].trim();
            if thought.is_empty() {
                ModelTurn::Unparseable(text.to_string())
            } else {
                ModelTurn::Thought(thought.to_string())
            }
        }
        None => ModelTurn::Unparseable(text.to_string()),
    }
}

/// Reasoning text before a directive, with any `Thought:` label removed.
fn extract_thought(prefix: &str) -> Option<String> {
    let body = match thought_re().find(prefix) {
        Some(m) => &prefix[m.end()..],
        None => prefix,
    };
    let body = body.trim();
    (!body.is_empty()).then(|| body.to_string())
}

/// Drop anything from a hallucinated `Observation:` line onward.
fn cut_at_observation(text: &str) -> &str {
    match observation_re().find(text) {
        Some(m) => &text[..m.start()],
        None => text,
    }
}

/// Parse the tool name on the `Action:` line plus the arguments that follow.
///
/// Arguments come from an `Action Input:` block or, failing that, from a
/// parenthesized call on the action line (`tool({"a": 1})`). Input that is
/// not valid JSON is kept as a string so schema validation can report it.
fn parse_invocation(action_line: &str, rest: &str) -> Option<ToolInvocation> {
    let line = action_line
        .trim()
        .trim_matches(|c| c == '`' || c == '"' || c == '\'' || c == '*');
    let name = tool_name_re().find(line)?.as_str().to_string();
    let trailing = line[name.len()..].trim();

    let rest = cut_at_observation(rest);
    let raw_input = match action_input_re().find(rest) {
        Some(m) => Some(rest[m.end()..].trim()),
        None => trailing
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .map(str::trim),
    };

    let args = match raw_input {
        Some(raw) if !raw.is_empty() => parse_arguments(raw),
        _ => Value::Object(Default::default()),
    };

    Some(ToolInvocation { tool: name, args })
}

fn parse_arguments(raw: &str) -> Value {
    let cleaned = strip_code_fence(raw);
    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        return value;
    }
    // Tolerate trailing prose after the JSON object.
    if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&cleaned[start..=end]) {
                return value;
            }
        }
    }
    Value::String(cleaned.to_string())
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    // Skip a language tag such as `json`.
    match inner.find('\n') {
        Some(pos) if !inner[..pos].trim_start().starts_with('{') => inner[pos + 1..].trim(),
        _ => inner.trim(),
    }
}
