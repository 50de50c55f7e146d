//! Layered system prompt builder.
//!
//! Layers (in order):
//! 1. Caller-supplied persona / domain prompt
//! 2. ReAct response format rules
//! 3. Tool catalog

use crate::tools::ToolSet;

/// Used when the caller does not supply a system prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a careful assistant. Use the available tools to look up facts before answering, \
     and never state figures you did not retrieve.";

/// Response format the parser understands.
const FORMAT_RULES: &str = r#"
# Response Format

Answer with exactly one of the following blocks and nothing else.

To use a tool:
Thought: <your reasoning about what to do next>
Action: <tool name, exactly as listed>
Action Input: <a JSON object matching the tool's arguments schema>

When you can answer:
Thought: <your reasoning>
Final Answer: <the answer for the user>

Never write an Observation yourself; it is provided after each Action.
"#;

/// Build the complete system prompt for a model call.
pub fn build_system_prompt(base: &str, tools: &ToolSet) -> String {
    let base = if base.trim().is_empty() {
        DEFAULT_SYSTEM_PROMPT
    } else {
        base.trim()
    };

    let mut prompt = String::with_capacity(base.len() + FORMAT_RULES.len() + 1024);
    prompt.push_str(base);
    prompt.push('\n');
    prompt.push_str(FORMAT_RULES);
    prompt.push_str("\n# Tools\n\n");
    prompt.push_str(&tools.catalog());
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolDescriptor;
    use serde_json::{json, Value};

    #[test]
    fn layers_appear_in_order() {
        let tools = ToolSet::new(vec![ToolDescriptor::from_fn(
            "echo",
            "Echo text",
            json!({"type": "object"}),
            |_args: Value| async { Ok(String::new()) },
        )])
        .unwrap();

        let prompt = build_system_prompt("You help clinicians.", &tools);
        let persona = prompt.find("You help clinicians.").unwrap();
        let rules = prompt.find("# Response Format").unwrap();
        let catalog = prompt.find("- echo: Echo text").unwrap();
        assert!(persona < rules && rules < catalog);
    }

    #[test]
    fn blank_base_uses_default() {
        let prompt = build_system_prompt("  ", &ToolSet::default());
        assert!(prompt.starts_with(DEFAULT_SYSTEM_PROMPT));
        assert!(prompt.contains("(no tools available)"));
    }
}
