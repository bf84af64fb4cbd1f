//! Health-monitor state transitions, driven by a controllable in-process
//! driver under a paused clock.


use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use toolmux::{
    in_process_handler, ChatToolCall, ClientConfig, ClientState, ConnectionConfig, ExecContext,
    InProcessDriver, ToolManager, ToolSchema,
};

async fn wait_for_state(manager: &ToolManager, id: &str, state: ClientState, max: Duration) {
    let started = tokio::time::Instant::now();
    loop {
        let current = manager
            .get_clients()
            .into_iter()
            .find(|c| c.id == id)
            .map(|c| c.state);
        if current == Some(state) {
            return;
        }
        assert!(
            started.elapsed() < max,
            "client {} did not reach {:?} within {:?} (currently {:?})",
            id,
            state,
            max,
            current
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn probe_driver() -> Arc<InProcessDriver> {
    let driver = Arc::new(InProcessDriver::new());
    driver
        .register(
            ToolSchema::new("probe", None, json!({"type": "object"})),
            in_process_handler(|_| async move { Ok("alive".to_string()) }),
        )
        .unwrap();
    driver
}

/// **Scenario**: a client whose pings start failing goes `Disconnected`
/// after three consecutive failures, and transitions back to `Connected`
/// within the 20 s envelope once the server is reachable again. A tool call
/// then succeeds without caller intervention.
#[tokio::test(start_paused = true)]
async fn client_recovers_after_server_outage() {
    let manager = ToolManager::default();
    let driver = probe_driver();
    manager
        .add_client_with_driver(
            ClientConfig::new("probe", "probe", ConnectionConfig::InProcess)
                .with_tools_to_execute(vec!["*".into()]),
            Arc::clone(&driver) as _,
        )
        .unwrap();
    wait_for_state(&manager, "probe", ClientState::Connected, Duration::from_secs(5)).await;

    // Server goes away: pings fail, three strikes mark it disconnected.
    driver.set_ping_healthy(false);
    wait_for_state(
        &manager,
        "probe",
        ClientState::Disconnected,
        Duration::from_secs(30),
    )
    .await;

    // Server comes back: the backoff-driven reconnect restores the client
    // within the 20 s detection envelope.
    driver.set_ping_healthy(true);
    wait_for_state(
        &manager,
        "probe",
        ClientState::Connected,
        Duration::from_secs(20),
    )
    .await;

    let out = manager
        .execute_chat_mcp_tool(
            &ExecContext::new(),
            &ChatToolCall::new("call-1", "probe-probe", "{}"),
        )
        .await
        .unwrap();
    assert_eq!(out.content.as_deref(), Some("alive"));
}

/// A forced reconnect brings the client back without waiting for pings.
#[tokio::test(start_paused = true)]
async fn reconnect_client_forces_fresh_connection() {
    let manager = ToolManager::default();
    let driver = probe_driver();
    manager
        .add_client_with_driver(
            ClientConfig::new("probe", "probe", ConnectionConfig::InProcess)
                .with_tools_to_execute(vec!["*".into()]),
            Arc::clone(&driver) as _,
        )
        .unwrap();
    wait_for_state(&manager, "probe", ClientState::Connected, Duration::from_secs(5)).await;

    manager.reconnect_client("probe").unwrap();
    wait_for_state(&manager, "probe", ClientState::Connected, Duration::from_secs(10)).await;

    assert!(manager.reconnect_client("missing").is_err());
}
