//! Tool schema descriptor as returned by `tools/list`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One tool advertised by an MCP server: name, human description, and the
/// JSON schema of its arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default = "default_schema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: Option<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description,
            input_schema,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_camel_case_input_schema() {
        let schema: ToolSchema = serde_json::from_str(
            r#"{"name":"read_file","description":"Read a file","inputSchema":{"type":"object"}}"#,
        )
        .unwrap();
        assert_eq!(schema.name, "read_file");
        assert_eq!(schema.input_schema["type"], "object");
    }

    #[test]
    fn missing_input_schema_defaults_to_object() {
        let schema: ToolSchema = serde_json::from_str(r#"{"name":"bare"}"#).unwrap();
        assert_eq!(schema.input_schema["type"], "object");
    }
}
