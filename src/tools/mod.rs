pub mod medication;
pub mod traits;

pub use traits::{FnExecutor, ToolDefinition, ToolDescriptor, ToolExecutor};

use anyhow::{bail, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of dispatching one tool call, ready to become an observation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub output: String,
    pub success: bool,
    /// False when the named tool does not exist or its arguments were rejected.
    pub invoked: bool,
}

impl ToolOutcome {
    fn rejected(output: String) -> Self {
        Self {
            output,
            success: false,
            invoked: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tool set
// ---------------------------------------------------------------------------

/// The tools registered for one run. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolSet {
    /// Build a tool set. Tool names must be unique.
    pub fn new(tools: Vec<ToolDescriptor>) -> Result<Self> {
        let mut index = HashMap::with_capacity(tools.len());
        for (i, tool) in tools.iter().enumerate() {
            if tool.name().trim().is_empty() {
                bail!("Tool at position {} has an empty name", i);
            }
            if index.insert(tool.name().to_string(), i).is_some() {
                bail!("Duplicate tool name: {}", tool.name());
            }
        }
        Ok(Self { tools, index })
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn definitions(&self) -> Vec<&ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Render the catalog block shown to the model.
    pub fn catalog(&self) -> String {
        if self.tools.is_empty() {
            return "(no tools available)\n".to_string();
        }

        let mut out = String::new();
        for tool in &self.tools {
            out.push_str(&format!(
                "- {}: {}\n  Arguments schema: {}\n",
                tool.name(),
                tool.description(),
                tool.parameters()
            ));
        }
        out
    }

    /// Resolve, validate and execute a tool call.
    ///
    /// Never fails: unknown tools, invalid arguments, executor errors and
    /// timeouts all come back as unsuccessful outcomes.
    pub async fn dispatch(&self, name: &str, args: &Value, timeout: Duration) -> ToolOutcome {
        let Some(tool) = self.get(name) else {
            warn!("Model requested unknown tool: {}", name);
            let available = if self.is_empty() {
                "(none)".to_string()
            } else {
                self.names().join(", ")
            };
            return ToolOutcome::rejected(format!(
                "unknown tool: {}. Available tools: {}",
                name, available
            ));
        };

        if let Err(problems) = tool.validate_args(args) {
            warn!("Rejected arguments for {}: {:?}", name, problems);
            let body = json!({
                "error": "invalid_arguments",
                "tool": name,
                "problems": problems,
            });
            return ToolOutcome::rejected(body.to_string());
        }

        debug!("Executing tool {}", name);
        match tokio::time::timeout(timeout, tool.execute(args.clone())).await {
            Ok(Ok(output)) => ToolOutcome {
                output: if output.trim().is_empty() {
                    "(tool returned no output)".to_string()
                } else {
                    output
                },
                success: true,
                invoked: true,
            },
            Ok(Err(e)) => ToolOutcome {
                output: format!("Error: {}", e),
                success: false,
                invoked: true,
            },
            Err(_) => ToolOutcome {
                output: format!("Error: tool '{}' timed out after {:?}", name, timeout),
                success: false,
                invoked: true,
            },
        }
    }
}
