//! SSE driver tests against a raw TCP mock: endpoint announcement, paired
//! POST requests, responses over the stream, disconnect reporting.


use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use toolmux::{ConnectionDriver, DriverEvent, ExecContext, SseDriver};

async fn read_http_request(stream: &mut TcpStream) -> (String, String) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];
    loop {
        let n = stream.read(&mut tmp).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let header_end = pos + 4;
            let headers = String::from_utf8_lossy(&buf[..header_end]).to_string();
            let content_length = headers
                .lines()
                .find_map(|line| {
                    line.to_ascii_lowercase()
                        .strip_prefix("content-length:")
                        .and_then(|v| v.trim().parse::<usize>().ok())
                })
                .unwrap_or(0);
            let mut body = buf[header_end..].to_vec();
            while body.len() < content_length {
                let m = stream.read(&mut tmp).await.unwrap();
                if m == 0 {
                    break;
                }
                body.extend_from_slice(&tmp[..m]);
            }
            let body = String::from_utf8_lossy(&body[..content_length]).to_string();
            return (headers, body);
        }
    }
    (String::new(), String::new())
}

async fn accept_stream(listener: &TcpListener) -> TcpStream {
    let (mut stream, _) = listener.accept().await.unwrap();
    let (headers, _) = read_http_request(&mut stream).await;
    assert!(headers.starts_with("GET"));
    stream
        .write_all(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\n\r\n",
        )
        .await
        .unwrap();
    stream
        .write_all(b"event: endpoint\ndata: /rpc\n\n")
        .await
        .unwrap();
    stream
}

async fn answer_post(listener: &TcpListener, stream: &mut TcpStream) {
    let (mut post, _) = listener.accept().await.unwrap();
    let (_, body) = read_http_request(&mut post).await;
    post.write_all(b"HTTP/1.1 202 Accepted\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let json: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    let Some(id) = json.get("id").and_then(|id| id.as_str()).map(String::from) else {
        return; // notification: no reply on the stream
    };
    let method = json.get("method").and_then(|m| m.as_str()).unwrap_or("");
    let reply = match method {
        "initialize" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {"protocolVersion": "2025-03-26"}
        }),
        "tools/list" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {"tools": [{"name": "sse_tool", "description": "via sse", "inputSchema": {"type": "object"}}]}
        }),
        "tools/call" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {"content": [{"type": "text", "text": "ok-from-sse"}]}
        }),
        _ => json!({"jsonrpc": "2.0", "id": id, "result": {}}),
    };
    stream
        .write_all(format!("event: message\ndata: {}\n\n", reply).as_bytes())
        .await
        .unwrap();
}

#[tokio::test]
async fn sse_driver_connects_lists_and_calls() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (events_tx, _events_rx) = mpsc::unbounded_channel();

    let server = tokio::spawn(async move {
        let mut stream = accept_stream(&listener).await;
        // initialize, notifications/initialized, tools/list, tools/call
        for _ in 0..4 {
            answer_post(&listener, &mut stream).await;
        }
        stream
    });

    let driver = SseDriver::new(format!("http://{}/sse", addr), vec![], events_tx);
    driver.connect().await.unwrap();

    let tools = driver.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "sse_tool");

    let out = driver
        .call_tool("sse_tool", json!({"q": 1}), &ExecContext::new())
        .await
        .unwrap();
    assert_eq!(out.text, "ok-from-sse");

    driver.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn sse_stream_break_reports_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    let server = tokio::spawn(async move {
        let mut stream = accept_stream(&listener).await;
        for _ in 0..2 {
            answer_post(&listener, &mut stream).await;
        }
        // Drop the stream: the driver must report the break.
        drop(stream);
    });

    let driver = SseDriver::new(format!("http://{}/sse", addr), vec![], events_tx);
    driver.connect().await.unwrap();
    server.await.unwrap();

    let event = tokio::time::timeout(std::time::Duration::from_secs(5), events_rx.recv())
        .await
        .expect("disconnect within timeout");
    assert_eq!(event, Some(DriverEvent::Disconnected));
}
