//! Per-request execution context.
//!
//! Carries the cancellation token, the optional deadline, the request id, and
//! the per-request filter overlays (`include_clients` / `include_tools`).
//! Every blocking operation in the subsystem selects against this context so
//! that teardown is prompt.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Context threaded through tool execution, the agent loop, and the sandbox.
///
/// Overlays are allow-lists that can only narrow what the static client
/// configuration permits; `None` means "no restriction from this request".
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
    /// Opaque id of the enclosing gateway request, for log correlation.
    pub request_id: Option<String>,
    /// Restricts execution to the named clients (`"*"` keeps all).
    pub include_clients: Option<Vec<String>>,
    /// Restricts execution to the named tools (`"*"` keeps all).
    pub include_tools: Option<Vec<String>>,
}

impl ExecContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.with_deadline(deadline)
    }

    pub fn with_include_clients(mut self, clients: Vec<String>) -> Self {
        self.include_clients = Some(clients);
        self
    }

    pub fn with_include_tools(mut self, tools: Vec<String>) -> Self {
        self.include_tools = Some(tools);
        self
    }

    /// Derives a child context: child cancellation token, same deadline and
    /// overlays. Cancelling the parent cancels the child, not vice versa.
    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            deadline: self.deadline,
            request_id: self.request_id.clone(),
            include_clients: self.include_clients.clone(),
            include_tools: self.include_tools.clone(),
        }
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves when the context is cancelled.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time budget for one blocking call: the smaller of `cap` and whatever
    /// remains until the context deadline. Zero when the deadline has passed.
    pub fn remaining(&self, cap: Duration) -> Duration {
        match self.deadline {
            Some(deadline) => cap.min(deadline.saturating_duration_since(Instant::now())),
            None => cap,
        }
    }
}
