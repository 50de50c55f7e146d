//! Tool descriptor and executor trait.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Definition of a tool as shown to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// The code behind a tool.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run the tool. Errors become failure observations, never run failures.
    async fn execute(&self, args: Value) -> Result<String>;
}

/// Adapter turning an async closure into a [`ToolExecutor`].
pub struct FnExecutor<F>(F);

#[async_trait]
impl<F, Fut> ToolExecutor for FnExecutor<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String>> + Send,
{
    async fn execute(&self, args: Value) -> Result<String> {
        (self.0)(args).await
    }
}

/// A named, described, schema-checked capability. Cheap to clone.
#[derive(Clone)]
pub struct ToolDescriptor {
    definition: ToolDefinition,
    executor: Arc<dyn ToolExecutor>,
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.definition.name)
            .finish_non_exhaustive()
    }
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        executor: impl ToolExecutor + 'static,
    ) -> Self {
        Self {
            definition: ToolDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
            executor: Arc::new(executor),
        }
    }

    /// Build a descriptor from an async closure.
    pub fn from_fn<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        f: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        Self::new(name, description, parameters, FnExecutor(f))
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn description(&self) -> &str {
        &self.definition.description
    }

    pub fn parameters(&self) -> &Value {
        &self.definition.parameters
    }

    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    /// Check `args` against the parameter schema.
    ///
    /// Only the top-level shape is enforced: the value must be an object when
    /// the schema says so, every `required` field must be present and
    /// non-null, and declared primitive types must match.
    pub fn validate_args(&self, args: &Value) -> Result<(), Vec<String>> {
        let schema = &self.definition.parameters;
        let mut problems = Vec::new();

        let wants_object = schema.get("type").and_then(Value::as_str) == Some("object")
            || schema.get("properties").is_some();

        let Some(object) = args.as_object() else {
            if wants_object {
                problems.push(format!(
                    "arguments must be a JSON object, got {}",
                    json_type_name(args)
                ));
                return Err(problems);
            }
            return Ok(());
        };

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for field in required.iter().filter_map(Value::as_str) {
                match object.get(field) {
                    None | Some(Value::Null) => {
                        problems.push(format!("missing required field '{}'", field))
                    }
                    Some(_) => {}
                }
            }
        }

        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (field, value) in object {
                let Some(expected) = properties
                    .get(field)
                    .and_then(|p| p.get("type"))
                    .and_then(Value::as_str)
                else {
                    continue;
                };
                if !value.is_null() && !matches_type(value, expected) {
                    problems.push(format!(
                        "field '{}' must be {}, got {}",
                        field,
                        expected,
                        json_type_name(value)
                    ));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }

    pub async fn execute(&self, args: Value) -> Result<String> {
        self.executor.execute(args).await
    }
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn medication_tool() -> ToolDescriptor {
        ToolDescriptor::from_fn(
            "lookup_medication_instructions",
            "Look up instructions",
            json!({
                "type": "object",
                "properties": {
                    "medicationName": { "type": "string" },
                    "limit": { "type": "integer" }
                },
                "required": ["medicationName"]
            }),
            |args: Value| async move { Ok(format!("looked up {}", args["medicationName"])) },
        )
    }

    #[test]
    fn valid_arguments_pass() {
        let tool = medication_tool();
        assert!(tool
            .validate_args(&json!({"medicationName": "lisinopril", "limit": 2}))
            .is_ok());
    }

    #[test]
    fn missing_required_field_is_reported() {
        let tool = medication_tool();
        let problems = tool.validate_args(&json!({"limit": 2})).unwrap_err();
        assert_eq!(problems, vec!["missing required field 'medicationName'"]);

        let problems = tool.validate_args(&json!({"medicationName": null})).unwrap_err();
        assert_eq!(problems.len(), 1);
    }

    #[test]
    fn wrong_shapes_are_reported() {
        let tool = medication_tool();
        let problems = tool.validate_args(&json!("lisinopril")).unwrap_err();
        assert!(problems[0].contains("must be a JSON object"));

        let problems = tool
            .validate_args(&json!({"medicationName": 5, "limit": "two"}))
            .unwrap_err();
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let tool = medication_tool();
        assert!(tool
            .validate_args(&json!({"medicationName": "x", "extra": true}))
            .is_ok());
    }

    #[tokio::test]
    async fn closure_executor_runs() {
        let tool = medication_tool();
        let out = tool
            .execute(json!({"medicationName": "metformin"}))
            .await
            .unwrap();
        assert_eq!(out, "looked up \"metformin\"");
    }
}
