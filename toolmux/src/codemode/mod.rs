//! Code mode: one code snippet orchestrating many tool calls.
//!
//! Instead of one tool call per LLM turn, the LLM may call
//! [`META_EXECUTE_TOOL_CODE`] with a snippet that drives every bound tool
//! through the sandbox. [`META_LIST_TOOL_FILES`] and [`META_READ_TOOL_FILE`]
//! expose the generated typed bindings as a virtual file tree. The three
//! meta-tools appear (unprefixed) whenever at least one code-mode client is
//! visible under the active context.

mod bindings;
mod sandbox;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::json;
use tracing::debug;

use mcp_wire::ToolSchema;

use crate::config::ToolManagerConfig;
use crate::context::ExecContext;
use crate::error::ToolCallError;
use crate::executor::ToolExecutor;
use crate::registry::{sanitize_name, ToolRegistry};

/// Runs a code snippet in the sandbox; counts as one agent turn.
pub const META_EXECUTE_TOOL_CODE: &str = "executeToolCode";
/// Lists the virtual binding files for the allowed servers.
pub const META_LIST_TOOL_FILES: &str = "listToolFiles";
/// Reads one binding file.
pub const META_READ_TOOL_FILE: &str = "readToolFile";

/// Schemas of the meta-tools, as surfaced to the LLM.
pub fn meta_tool_schemas() -> Vec<ToolSchema> {
    vec![
        ToolSchema::new(
            META_EXECUTE_TOOL_CODE,
            Some(
                "Execute a Rhai code snippet that may call the bound MCP servers. \
                 Each server is a global object with one method per tool; \
                 parallel([|| A.x(), || B.y()]) runs closures concurrently and \
                 returns their results in order."
                    .into(),
            ),
            json!({
                "type": "object",
                "properties": { "code": { "type": "string" } },
                "required": ["code"]
            }),
        ),
        ToolSchema::new(
            META_LIST_TOOL_FILES,
            Some("List the typed binding files for the available MCP servers.".into()),
            json!({ "type": "object", "properties": {} }),
        ),
        ToolSchema::new(
            META_READ_TOOL_FILE,
            Some("Read one typed binding file, e.g. servers/Github.d.ts.".into()),
            json!({
                "type": "object",
                "properties": { "fileName": { "type": "string" } },
                "required": ["fileName"]
            }),
        ),
    ]
}

/// True when `name` is one of the three meta-tools.
pub fn is_meta_tool(name: &str) -> bool {
    matches!(
        name,
        META_EXECUTE_TOOL_CODE | META_LIST_TOOL_FILES | META_READ_TOOL_FILE
    )
}

/// Code-mode runtime: binding generation plus the sandbox entry point.
pub struct CodeMode {
    registry: Arc<ToolRegistry>,
    config: Arc<RwLock<ToolManagerConfig>>,
    /// Declaration cache keyed by file name + tool fingerprint.
    cache: RwLock<HashMap<String, Arc<String>>>,
}

impl CodeMode {
    pub fn new(registry: Arc<ToolRegistry>, config: Arc<RwLock<ToolManagerConfig>>) -> Self {
        Self {
            registry,
            config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Allowed code-mode clients under this context, with sanitized names.
    fn visible_clients(&self, ctx: &ExecContext) -> Vec<(String, Vec<ToolSchema>)> {
        self.registry
            .code_mode_clients(ctx)
            .into_iter()
            .map(|(handle, tools)| (handle.name(), tools))
            .collect()
    }

    /// `listToolFiles`: the virtual binding tree.
    pub fn list_tool_files(&self, ctx: &ExecContext) -> String {
        bindings::file_tree(&self.visible_clients(ctx))
    }

    /// `readToolFile`: one binding file. Unknown names report "not found".
    pub fn read_tool_file(&self, ctx: &ExecContext, file_name: &str) -> Result<String, ToolCallError> {
        let path = file_name
            .strip_prefix("servers/")
            .and_then(|rest| rest.strip_suffix(".d.ts"))
            .ok_or_else(|| {
                ToolCallError::NotAvailable(format!("file '{}' not found", file_name))
            })?;

        let clients = self.visible_clients(ctx);
        let not_found =
            || ToolCallError::NotAvailable(format!("file '{}' not found", file_name));

        let (server, tool) = match path.split_once('/') {
            Some((server, tool)) => (server, Some(tool)),
            None => (path, None),
        };
        let (_, tools) = clients
            .iter()
            .find(|(name, _)| name.as_str() == server)
            .ok_or_else(not_found)?;

        let fingerprint: String = tools
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let cache_key = format!("{}|{}", file_name, fingerprint);
        if let Ok(cache) = self.cache.read() {
            if let Some(cached) = cache.get(&cache_key) {
                return Ok(cached.as_ref().clone());
            }
        }

        let rendered = match tool {
            None => bindings::server_declaration(server, tools),
            Some(tool_name) => {
                let schema = tools
                    .iter()
                    .find(|t| sanitize_name(&t.name) == tool_name)
                    .ok_or_else(not_found)?;
                bindings::tool_declaration(server, schema)
            }
        };
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(cache_key, Arc::new(rendered.clone()));
        }
        Ok(rendered)
    }

    /// `executeToolCode`: runs the snippet and returns the serialized
    /// `{"result": ...}` / `{"error": ...}` body.
    pub async fn execute_tool_code(&self, ctx: &ExecContext, code: &str) -> String {
        let clients = self.visible_clients(ctx);
        // Meta-tools are not reachable from inside the sandbox.
        let executor = Arc::new(ToolExecutor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
            None,
        ));
        match sandbox::run_code(executor, ctx, clients, code.to_string()).await {
            Ok(value) => json!({ "result": value }).to_string(),
            Err(message) => {
                debug!(error = %message, "code-mode: snippet failed");
                json!({ "error": message }).to_string()
            }
        }
    }
}
