//! Medication instruction lookup tools.
//!
//! Both tools resolve names through the same fallback chain: the built-in
//! formulary first, then an optional remote label service, then a generic
//! "nothing on file" answer.

use super::ToolDescriptor;
use crate::fallback::{FallbackChain, MetricsCollector, Strategy, Tagged};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const LOOKUP_TOOL: &str = "lookup_medication_instructions";
pub const COMPARE_TOOL: &str = "compare_medications";

/// Upper bound on names accepted by the compare tool.
const MAX_COMPARE: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationInstructions {
    pub purpose: String,
    pub warnings: Vec<String>,
}

impl MedicationInstructions {
    fn not_on_file() -> Self {
        Self {
            purpose: "No instructions on file for this medication.".into(),
            warnings: vec!["Confirm dosing and interactions with a pharmacist.".into()],
        }
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Static in-process table.
pub struct LocalFormulary {
    entries: HashMap<String, MedicationInstructions>,
}

impl LocalFormulary {
    pub fn new(entries: HashMap<String, MedicationInstructions>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(name, info)| (normalize(&name), info))
                .collect(),
        }
    }

    /// Small demo table.
    pub fn builtin() -> Self {
        let entry = |purpose: &str, warnings: &[&str]| MedicationInstructions {
            purpose: purpose.to_string(),
            warnings: warnings.iter().map(|w| w.to_string()).collect(),
        };

        let mut entries = HashMap::new();
        entries.insert(
            "lisinopril".to_string(),
            entry(
                "Lowers blood pressure.",
                &[
                    "May cause a dry cough.",
                    "Rise slowly from sitting to avoid dizziness.",
                ],
            ),
        );
        entries.insert(
            "metformin".to_string(),
            entry(
                "Helps control blood sugar.",
                &["Take with meals to reduce stomach upset."],
            ),
        );
        entries.insert(
            "atorvastatin".to_string(),
            entry(
                "Lowers cholesterol.",
                &["Report unexplained muscle pain."],
            ),
        );
        Self::new(entries)
    }
}

#[async_trait]
impl Strategy<str, MedicationInstructions> for LocalFormulary {
    fn name(&self) -> &str {
        "local_formulary"
    }

    async fn attempt(&self, medication: &str) -> Result<Option<MedicationInstructions>> {
        Ok(self.entries.get(&normalize(medication)).cloned())
    }
}

/// Remote JSON label service: `GET {base}/labels/{name}`.
pub struct RemoteLabel {
    base_url: String,
    http: reqwest::Client,
}

impl RemoteLabel {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Strategy<str, MedicationInstructions> for RemoteLabel {
    fn name(&self) -> &str {
        "remote_label"
    }

    async fn attempt(&self, medication: &str) -> Result<Option<MedicationInstructions>> {
        let url = format!("{}/labels/{}", self.base_url, normalize(medication));
        debug!("Fetching label from {}", url);

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("Label request failed")?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            bail!("Label service returned {}", status);
        }

        let info: MedicationInstructions = resp
            .json()
            .await
            .context("Failed to parse label response")?;
        Ok(Some(info))
    }
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

type MedicationChain = FallbackChain<str, MedicationInstructions>;

fn build_chain(
    tool_name: &str,
    label_service: Option<&str>,
    strategy_timeout: Duration,
) -> MedicationChain {
    let mut chain = FallbackChain::new(tool_name)
        .with(LocalFormulary::builtin())
        .with_attempt_timeout(strategy_timeout);
    if let Some(url) = label_service {
        chain = chain.with(RemoteLabel::new(url));
    }
    chain
}

fn render(medication: &str, tagged: Tagged<MedicationInstructions>) -> Value {
    json!({
        "medication": medication,
        "purpose": tagged.value.purpose,
        "warnings": tagged.value.warnings,
        "source": tagged.source.as_str(),
    })
}

fn string_arg<'a>(args: &'a Value, field: &str) -> Result<&'a str> {
    let value = args[field]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Missing '{}' argument", field))?;
    Ok(value)
}

/// Build the medication tools sharing `metrics`.
pub fn medication_tools(
    metrics: Arc<MetricsCollector>,
    label_service: Option<&str>,
    strategy_timeout: Duration,
) -> Vec<ToolDescriptor> {
    vec![
        lookup_tool(metrics.clone(), label_service, strategy_timeout),
        compare_tool(metrics, label_service, strategy_timeout),
    ]
}

pub fn lookup_tool(
    metrics: Arc<MetricsCollector>,
    label_service: Option<&str>,
    strategy_timeout: Duration,
) -> ToolDescriptor {
    let chain = Arc::new(build_chain(LOOKUP_TOOL, label_service, strategy_timeout));

    ToolDescriptor::from_fn(
        LOOKUP_TOOL,
        "Look up the purpose and key warnings for a single medication by name.",
        json!({
            "type": "object",
            "properties": {
                "medicationName": {
                    "type": "string",
                    "description": "Generic or brand name of the medication"
                }
            },
            "required": ["medicationName"]
        }),
        move |args: Value| {
            let chain = chain.clone();
            let metrics = metrics.clone();
            async move {
                let name = string_arg(&args, "medicationName")?.to_string();
                let tagged = chain
                    .execute(name.as_str(), MedicationInstructions::not_on_file(), &metrics)
                    .await;
                Ok(render(&name, tagged).to_string())
            }
        },
    )
}

pub fn compare_tool(
    metrics: Arc<MetricsCollector>,
    label_service: Option<&str>,
    strategy_timeout: Duration,
) -> ToolDescriptor {
    let chain = Arc::new(build_chain(COMPARE_TOOL, label_service, strategy_timeout));

    ToolDescriptor::from_fn(
        COMPARE_TOOL,
        "Look up several medications at once and return their purposes and warnings side by side.",
        json!({
            "type": "object",
            "properties": {
                "medicationNames": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Two to five medication names"
                }
            },
            "required": ["medicationNames"]
        }),
        move |args: Value| {
            let chain = chain.clone();
            let metrics = metrics.clone();
            async move {
                let names: Vec<String> = args["medicationNames"]
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect()
                    })
                    .unwrap_or_default();

                if names.is_empty() {
                    bail!("'medicationNames' must contain at least one name");
                }
                if names.len() > MAX_COMPARE {
                    bail!("At most {} medications can be compared at once", MAX_COMPARE);
                }

                // All lookups are joined before the observation is produced.
                let lookups = names.iter().map(|name| {
                    chain.execute(
                        name.as_str(),
                        MedicationInstructions::not_on_file(),
                        &metrics,
                    )
                });
                let results = join_all(lookups).await;

                let rendered: Vec<Value> = names
                    .iter()
                    .zip(results)
                    .map(|(name, tagged)| render(name, tagged))
                    .collect();
                Ok(Value::Array(rendered).to_string())
            }
        },
    )
}
