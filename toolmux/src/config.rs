//! Client and manager configuration types.
//!
//! These are plain structs the embedding gateway constructs programmatically;
//! the subsystem does no file or environment loading.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Transport configuration for one MCP client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionConfig {
    /// Spawn a subprocess; JSON-RPC over stdin/stdout, one message per line.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: Vec<(String, String)>,
    },
    /// POST JSON-RPC per call to a streamable-HTTP endpoint.
    Http {
        url: String,
        #[serde(default)]
        headers: Vec<(String, String)>,
    },
    /// Persistent server-to-client event stream plus paired POST endpoint.
    Sse {
        url: String,
        #[serde(default)]
        headers: Vec<(String, String)>,
    },
    /// Direct dispatch to handlers registered in this process.
    InProcess,
}

impl ConnectionConfig {
    pub fn kind(&self) -> ConnectionKind {
        match self {
            ConnectionConfig::Stdio { .. } => ConnectionKind::Stdio,
            ConnectionConfig::Http { .. } => ConnectionKind::Http,
            ConnectionConfig::Sse { .. } => ConnectionKind::Sse,
            ConnectionConfig::InProcess => ConnectionKind::InProcess,
        }
    }
}

/// Transport kind, used to reject connection-type changes on edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    Stdio,
    Http,
    Sse,
    InProcess,
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionKind::Stdio => "stdio",
            ConnectionKind::Http => "http",
            ConnectionKind::Sse => "sse",
            ConnectionKind::InProcess => "in_process",
        };
        f.write_str(s)
    }
}

/// Configuration for one MCP client.
///
/// `tools_to_execute` is the static allow-list: `None` and `[]` both deny
/// every tool; `["*"]` allows all. `tools_to_auto_execute` uses the same
/// matching and is intersected with `tools_to_execute` at runtime, so a tool
/// that is auto-listed but not executable is simply not auto.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub id: String,
    pub name: String,
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub tools_to_execute: Option<Vec<String>>,
    #[serde(default)]
    pub tools_to_auto_execute: Option<Vec<String>>,
    /// When set, the client's tools are reachable only through the code-mode
    /// meta-tools, not the direct per-client listing.
    #[serde(default)]
    pub is_code_mode_client: bool,
}

impl ClientConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, connection: ConnectionConfig) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            connection,
            tools_to_execute: None,
            tools_to_auto_execute: None,
            is_code_mode_client: false,
        }
    }

    pub fn with_tools_to_execute(mut self, tools: Vec<String>) -> Self {
        self.tools_to_execute = Some(tools);
        self
    }

    pub fn with_tools_to_auto_execute(mut self, tools: Vec<String>) -> Self {
        self.tools_to_auto_execute = Some(tools);
        self
    }

    pub fn with_code_mode(mut self, enabled: bool) -> Self {
        self.is_code_mode_client = enabled;
        self
    }
}

/// Observed connection state of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientState {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClientState::Connecting => "connecting",
            ClientState::Connected => "connected",
            ClientState::Disconnected => "disconnected",
            ClientState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Tunables of the tool manager.
#[derive(Debug, Clone)]
pub struct ToolManagerConfig {
    /// Maximum number of LLM follow-up calls inside one agent invocation.
    /// Zero means: never auto-execute, return immediately for approval.
    pub max_agent_depth: usize,
    /// Upper bound for a single `tools/call`.
    pub tool_execution_timeout: Duration,
}

impl Default for ToolManagerConfig {
    fn default() -> Self {
        Self {
            max_agent_depth: 10,
            tool_execution_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_config_round_trips_with_type_tag() {
        let stdio = ConnectionConfig::Stdio {
            command: "npx".into(),
            args: vec!["-y".into(), "@mcp/server".into()],
            env: vec![("TOKEN".into(), "secret".into())],
        };
        let json = serde_json::to_value(&stdio).unwrap();
        assert_eq!(json["type"], "stdio");
        assert_eq!(json["command"], "npx");

        let back: ConnectionConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), ConnectionKind::Stdio);
    }

    #[test]
    fn kind_is_stable_per_variant() {
        let http = ConnectionConfig::Http {
            url: "http://localhost:9000/mcp".into(),
            headers: vec![],
        };
        assert_eq!(http.kind(), ConnectionKind::Http);
        assert_eq!(http.kind().to_string(), "http");
        assert_eq!(ConnectionConfig::InProcess.kind(), ConnectionKind::InProcess);
    }

    #[test]
    fn manager_config_defaults_match_contract() {
        let cfg = ToolManagerConfig::default();
        assert_eq!(cfg.tool_execution_timeout, Duration::from_secs(30));
        assert!(cfg.max_agent_depth > 0);
    }
}
