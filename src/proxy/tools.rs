// Tool/function normalization shared by request and response translation

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::schema::{FunctionDef, Tool, ToolCall};

/// Client `tool_choice`, resolved from its dynamic JSON shape once at
/// deserialization time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ToolChoice {
    #[default]
    Absent,
    Auto,
    None,
    /// `{"type":"function","function":{"name":...}}`. The name may be empty
    /// when the client omitted it.
    Function(String),
}

impl ToolChoice {
    /// Any shape other than the four recognized ones collapses to `Absent`.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => match s.as_str() {
                "auto" => ToolChoice::Auto,
                "none" => ToolChoice::None,
                _ => ToolChoice::Absent,
            },
            Value::Object(obj) => {
                if obj.get("type").and_then(|v| v.as_str()) == Some("function") {
                    let name = obj
                        .get("function")
                        .and_then(|f| f.get("name"))
                        .and_then(|n| n.as_str())
                        .unwrap_or("");
                    ToolChoice::Function(name.to_string())
                } else {
                    ToolChoice::Absent
                }
            }
            _ => ToolChoice::Absent,
        }
    }

    pub fn deserialize_lenient<'de, D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value.as_ref().map(Self::from_value).unwrap_or_default())
    }
}

/// What to send upstream for a structured function selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StructuredChoicePolicy {
    /// Downgrade to unconstrained auto-selection.
    #[default]
    Auto,
    /// Leave `tool_choice` unset (upstream default).
    Omit,
}

/// `tools` wins when non-empty; otherwise legacy `functions` are wrapped.
pub fn consolidate_tools(tools: Option<Vec<Tool>>, functions: Option<Vec<FunctionDef>>) -> Vec<Tool> {
    match tools {
        Some(tools) if !tools.is_empty() => tools,
        _ => functions
            .unwrap_or_default()
            .into_iter()
            .map(|function| Tool {
                tool_type: "function".to_string(),
                function,
            })
            .collect(),
    }
}

/// Resolve to the only values upstreams accept: `"auto"`, `"none"` or unset.
pub fn resolve_choice(choice: &ToolChoice, policy: StructuredChoicePolicy) -> Option<&'static str> {
    match choice {
        ToolChoice::Absent => None,
        ToolChoice::Auto => Some("auto"),
        ToolChoice::None => Some("none"),
        ToolChoice::Function(name) => {
            tracing::debug!(function = %name, ?policy, "downgrading structured tool_choice");
            match policy {
                StructuredChoicePolicy::Auto => Some("auto"),
                StructuredChoicePolicy::Omit => None,
            }
        }
    }
}

/// Drop tool calls with an empty function name and force `type` to
/// `"function"`. Ids and arguments are kept verbatim.
pub fn sanitize_tool_calls(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    calls
        .into_iter()
        .enumerate()
        .filter_map(|(i, mut call)| {
            if call.function.name.is_empty() {
                tracing::warn!(index = i, id = %call.id, "dropping tool call with empty function name");
                return None;
            }
            call.call_type = "function".to_string();
            Some(call)
        })
        .collect()
}
