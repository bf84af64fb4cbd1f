//! End-to-end stdio driver test against a tiny shell-scripted MCP server
//! (newline-delimited JSON-RPC, canned responses keyed by request id).


use serde_json::json;
use tokio::sync::mpsc;
use toolmux::{ConnectionDriver, DriverEvent, ExecContext, StdioDriver};

/// Minimal MCP server: answers initialize, tools/list, tools/call, and ping;
/// ignores notifications (frames without an id).
const MOCK_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"initialize"'*)
      printf '{"jsonrpc":"2.0","id":"%s","result":{"protocolVersion":"2025-03-26","capabilities":{"tools":{}}}}\n' "$id" ;;
    *'"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":"%s","result":{"tools":[{"name":"upper","description":"Uppercase a string","inputSchema":{"type":"object","properties":{"text":{"type":"string"}}}}]}}\n' "$id" ;;
    *'"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":"%s","result":{"content":[{"type":"text","text":"OK-FROM-STDIO"}]}}\n' "$id" ;;
    *)
      printf '{"jsonrpc":"2.0","id":"%s","result":{}}\n' "$id" ;;
  esac
done
"#;

fn mock_driver() -> (StdioDriver, mpsc::UnboundedReceiver<DriverEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        StdioDriver::new(
            "sh".to_string(),
            vec!["-c".to_string(), MOCK_SERVER.to_string()],
            vec![],
            tx,
        ),
        rx,
    )
}

#[tokio::test]
async fn stdio_connect_list_call_and_ping() {
    let (driver, _events) = mock_driver();
    driver.connect().await.unwrap();

    let tools = driver.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "upper");
    assert_eq!(tools[0].description.as_deref(), Some("Uppercase a string"));

    let out = driver
        .call_tool("upper", json!({"text": "hello"}), &ExecContext::new())
        .await
        .unwrap();
    assert_eq!(out.text, "OK-FROM-STDIO");
    assert!(!out.is_error);

    driver.ping().await.unwrap();
    driver.close().await;
}

/// Killing the server surfaces a `Disconnected` event and fails pending and
/// subsequent calls.
#[tokio::test]
async fn stdio_process_exit_reports_disconnect() {
    let (driver, mut events) = mock_driver();
    driver.connect().await.unwrap();
    driver.close().await;

    // close() tears down the reader; a fresh connect against a server that
    // exits immediately delivers the disconnect event instead.
    let (tx, mut events2) = mpsc::unbounded_channel();
    let short_lived = StdioDriver::new("true".to_string(), vec![], vec![], tx);
    // `true` exits at once, so the handshake cannot complete.
    assert!(short_lived.connect().await.is_err());
    let event = tokio::time::timeout(std::time::Duration::from_secs(5), events2.recv())
        .await
        .expect("event within timeout");
    assert_eq!(event, Some(DriverEvent::Disconnected));

    // The original driver's channel saw no spurious events after close.
    assert!(events.try_recv().is_err());
}
