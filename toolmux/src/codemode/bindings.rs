//! Typed binding generation for code mode.
//!
//! The LLM sees a virtual file tree of TypeScript-like declarations derived
//! from the filtered tool set: `servers/{Client}.d.ts` for a whole server,
//! `servers/{Client}/{tool}.d.ts` for one tool. Nothing is persisted; the
//! tree is regenerated (with a small cache) from the live registry.

use serde_json::Value;

use mcp_wire::ToolSchema;

use crate::registry::sanitize_name;

/// Renders a JSON schema as a TypeScript type expression.
fn ts_type(schema: &Value) -> String {
    if let Some(values) = schema.get("enum").and_then(|e| e.as_array()) {
        let literals: Vec<String> = values
            .iter()
            .map(|v| match v {
                Value::String(s) => format!("\"{}\"", s),
                other => other.to_string(),
            })
            .collect();
        if !literals.is_empty() {
            return literals.join(" | ");
        }
    }
    match schema.get("type").and_then(|t| t.as_str()) {
        Some("string") => "string".to_string(),
        Some("number") | Some("integer") => "number".to_string(),
        Some("boolean") => "boolean".to_string(),
        Some("null") => "null".to_string(),
        Some("array") => {
            let items = schema
                .get("items")
                .map(ts_type)
                .unwrap_or_else(|| "any".to_string());
            format!("{}[]", items)
        }
        Some("object") => object_type(schema),
        _ => "any".to_string(),
    }
}

fn object_type(schema: &Value) -> String {
    let Some(props) = schema.get("properties").and_then(|p| p.as_object()) else {
        return "Record<string, any>".to_string();
    };
    if props.is_empty() {
        return "Record<string, any>".to_string();
    }
    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();
    let mut fields: Vec<String> = Vec::with_capacity(props.len());
    for (key, prop) in props {
        let optional = if required.contains(&key.as_str()) { "" } else { "?" };
        fields.push(format!("{}{}: {}", key, optional, ts_type(prop)));
    }
    format!("{{ {} }}", fields.join("; "))
}

/// One method line inside a server declaration.
fn method_line(tool: &ToolSchema) -> String {
    let mut out = String::new();
    if let Some(ref description) = tool.description {
        out.push_str(&format!("  /** {} */\n", description.replace('\n', " ")));
    }
    let args = object_type(&tool.input_schema);
    let method = sanitize_name(&tool.name);
    if args == "Record<string, any>" {
        out.push_str(&format!("  {}(args?: Record<string, any>): any;\n", method));
    } else {
        out.push_str(&format!("  {}(args: {}): any;\n", method, args));
    }
    out
}

/// Full `.d.ts` declaration for one server binding.
pub fn server_declaration(server: &str, tools: &[ToolSchema]) -> String {
    let mut out = format!("declare const {}: {{\n", server);
    for tool in tools {
        out.push_str(&method_line(tool));
    }
    out.push_str("};\n");
    out
}

/// `.d.ts` declaration for a single tool of a server.
pub fn tool_declaration(server: &str, tool: &ToolSchema) -> String {
    let mut out = format!("declare const {}: {{\n", server);
    out.push_str(&method_line(tool));
    out.push_str("};\n");
    out
}

/// Filesystem-like listing of the binding tree for the allowed clients.
pub fn file_tree(clients: &[(String, Vec<ToolSchema>)]) -> String {
    let mut out = String::from("servers/\n");
    for (server, tools) in clients {
        out.push_str(&format!("  {}.d.ts\n", server));
        if !tools.is_empty() {
            out.push_str(&format!("  {}/\n", server));
            for tool in tools {
                out.push_str(&format!("    {}.d.ts\n", sanitize_name(&tool.name)));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn search_tool() -> ToolSchema {
        ToolSchema::new(
            "search",
            Some("Search repositories.".into()),
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "limit": {"type": "integer"}
                },
                "required": ["query"]
            }),
        )
    }

    #[test]
    fn ts_type_covers_primitive_and_composite_schemas() {
        assert_eq!(ts_type(&json!({"type": "string"})), "string");
        assert_eq!(ts_type(&json!({"type": "integer"})), "number");
        assert_eq!(
            ts_type(&json!({"type": "array", "items": {"type": "boolean"}})),
            "boolean[]"
        );
        assert_eq!(
            ts_type(&json!({"enum": ["a", "b"]})),
            "\"a\" | \"b\""
        );
        assert_eq!(ts_type(&json!({})), "any");
    }

    #[test]
    fn server_declaration_marks_optional_fields() {
        let decl = server_declaration("Github", &[search_tool()]);
        assert!(decl.starts_with("declare const Github: {"));
        assert!(decl.contains("/** Search repositories. */"));
        assert!(decl.contains("query: string"));
        assert!(decl.contains("limit?: number"));
        assert!(decl.contains("search(args: {"));
    }

    #[test]
    fn schema_without_properties_takes_optional_record() {
        let tool = ToolSchema::new("now", None, json!({"type": "object"}));
        let decl = tool_declaration("Clock", &tool);
        assert!(decl.contains("now(args?: Record<string, any>): any;"));
    }

    #[test]
    fn file_tree_lists_server_and_tool_files() {
        let tree = file_tree(&[("Github".to_string(), vec![search_tool()])]);
        assert!(tree.contains("servers/\n"));
        assert!(tree.contains("  Github.d.ts\n"));
        assert!(tree.contains("  Github/\n"));
        assert!(tree.contains("    search.d.ts\n"));
    }

    #[test]
    fn tool_method_names_are_sanitized() {
        let tool = ToolSchema::new("get-user.v2", None, json!({"type": "object"}));
        let decl = tool_declaration("Api", &tool);
        assert!(decl.contains("get_user_v2(args?"));
    }
}
