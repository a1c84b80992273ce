//! The tool registry contract (spec.md §6). Non-goal: "tool registry
//! implementations are an external collaborator" — this crate owns only
//! the trait and a couple of illustrative tools for demonstration/tests.
//!
//! Grounded on `skynet-agent::tools::mod.rs` (`Tool` trait, `ToolResult`,
//! `to_definitions`), pruned to the couple of reference tools this repo
//! actually ships rather than the teacher's full built-in catalog.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::ToolDefinition;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> serde_json::Value;
    async fn execute(&self, input: serde_json::Value) -> ToolResult;
}

/// The set of tools bound to an entity, keyed by name for O(1) dispatch
/// when the pipeline receives a `ToolCallStarted` event.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// The subset named by `ids`, in the order given. Unknown ids are
    /// skipped rather than erroring — config validation (`snapshot.rs`)
    /// already guarantees every bound tool id refers to a real tool.
    pub fn subset(&self, ids: &[String]) -> Vec<Arc<dyn Tool>> {
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    pub fn to_definitions(tools: &[Arc<dyn Tool>]) -> Vec<ToolDefinition> {
        tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }
}

/// Echoes its `text` input back. Useful for exercising the tool-call
/// interception path in tests without any external effect.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the given text back unchanged"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"],
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        match input.get("text").and_then(|v| v.as_str()) {
            Some(text) => ToolResult::success(text.to_string()),
            None => ToolResult::error("missing required field 'text'"),
        }
    }
}

/// Evaluates a small arithmetic expression of the form `<number> <op>
/// <number>`. Illustrates a tool that can legitimately fail.
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate a simple arithmetic expression, e.g. '2 + 2'"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "expression": { "type": "string" } },
            "required": ["expression"],
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(expr) = input.get("expression").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required field 'expression'");
        };
        let parts: Vec<&str> = expr.split_whitespace().collect();
        let [a, op, b] = parts[..] else {
            return ToolResult::error("expected '<number> <op> <number>'");
        };
        let (Ok(a), Ok(b)) = (a.parse::<f64>(), b.parse::<f64>()) else {
            return ToolResult::error("operands must be numbers");
        };
        let result = match op {
            "+" => a + b,
            "-" => a - b,
            "*" => a * b,
            "/" if b != 0.0 => a / b,
            "/" => return ToolResult::error("division by zero"),
            other => return ToolResult::error(format!("unsupported operator '{other}'")),
        };
        ToolResult::success(result.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_returns_input_text() {
        let result = EchoTool.execute(serde_json::json!({"text": "hi"})).await;
        assert_eq!(result.content, "hi");
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn calculator_adds() {
        let result = CalculatorTool
            .execute(serde_json::json!({"expression": "2 + 3"}))
            .await;
        assert_eq!(result.content, "5");
    }

    #[tokio::test]
    async fn calculator_rejects_division_by_zero() {
        let result = CalculatorTool
            .execute(serde_json::json!({"expression": "1 / 0"}))
            .await;
        assert!(result.is_error);
    }

    #[test]
    fn registry_subset_skips_unknown_ids() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let subset = registry.subset(&["echo".to_string(), "nonexistent".to_string()]);
        assert_eq!(subset.len(), 1);
        assert_eq!(subset[0].name(), "echo");
    }
}
