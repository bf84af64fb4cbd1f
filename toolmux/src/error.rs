//! Error taxonomy for tool execution and client management.
//!
//! [`ToolCallError`] is the structured error every execution path surfaces;
//! its display strings keep the substrings callers and the agent loop match
//! on ("not found" / "not available" / "not permitted", "timeout").
//! [`ManagerError`] covers client lifecycle operations.

use thiserror::Error;

/// Error surfaced by tool execution, the agent loop, and the sandbox.
///
/// The agent loop treats `Tool`, `NotAvailable`, `Argument`, and per-call
/// `Timeout` as recoverable: they become tool-result messages the LLM can see.
/// `Cancelled` and `Llm` abort the loop.
#[derive(Debug, Error)]
pub enum ToolCallError {
    /// Tool name unknown, or filtered out by client config / context overlay.
    #[error("{0}")]
    NotAvailable(String),

    /// Per-call or per-agent deadline exceeded.
    #[error("tool call timeout: {0}")]
    Timeout(String),

    /// The caller's context was cancelled.
    #[error("tool call cancelled: {0}")]
    Cancelled(String),

    /// Malformed JSON arguments or schema mismatch.
    #[error("invalid tool arguments: {0}")]
    Argument(String),

    /// The tool itself reported an error; message preserved verbatim.
    #[error("{0}")]
    Tool(String),

    /// Driver I/O failure or disconnection.
    #[error("transport error: {0}")]
    Transport(String),

    /// The injected LLM caller failed; fatal to the agent loop.
    #[error("llm call failed: {0}")]
    Llm(String),
}

impl ToolCallError {
    /// Not-available error for a name the registry cannot resolve.
    pub fn not_found(name: &str) -> Self {
        ToolCallError::NotAvailable(format!("tool '{}' not found", name))
    }

    /// Not-available error for a tool the filter engine denies.
    pub fn not_permitted(name: &str) -> Self {
        ToolCallError::NotAvailable(format!("tool '{}' is not permitted", name))
    }

    /// Not-available error for a client outside the context overlay.
    pub fn client_not_available(name: &str) -> Self {
        ToolCallError::NotAvailable(format!("client '{}' is not available", name))
    }

    /// True for errors the agent loop converts into tool-result messages
    /// instead of aborting.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ToolCallError::Cancelled(_) | ToolCallError::Llm(_))
    }
}

/// Error surfaced by client-management operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("client '{0}' not found")]
    UnknownClient(String),

    #[error("client '{0}' already exists")]
    DuplicateClient(String),

    #[error("connection type of client '{0}' cannot be changed")]
    ConnectionTypeChange(String),

    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("client '{0}' is reserved")]
    ReservedClient(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_required_substrings() {
        assert!(ToolCallError::not_found("calc").to_string().contains("not found"));
        assert!(ToolCallError::not_permitted("calc")
            .to_string()
            .contains("not permitted"));
        assert!(ToolCallError::client_not_available("fs")
            .to_string()
            .contains("not available"));
        assert!(ToolCallError::Timeout("after 200ms".into())
            .to_string()
            .to_lowercase()
            .contains("timeout"));
    }

    #[test]
    fn recoverability_split_matches_loop_policy() {
        assert!(ToolCallError::Tool("division by zero".into()).is_recoverable());
        assert!(ToolCallError::Timeout("x".into()).is_recoverable());
        assert!(!ToolCallError::Cancelled("x".into()).is_recoverable());
        assert!(!ToolCallError::Llm("x".into()).is_recoverable());
    }
}
