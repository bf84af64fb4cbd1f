//! JSON-RPC 2.0 frames: requests, notifications, results, and the stdio line
//! decoder that classifies inbound traffic.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::WireError;

/// JSON-RPC protocol version string sent on every frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC message id. MCP servers echo whichever form the client sent;
/// some servers originate numeric ids for their own requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Number(i64),
    String(String),
}

impl MessageId {
    /// Canonical key form used to route responses to pending requests.
    pub fn as_key(&self) -> String {
        match self {
            MessageId::Number(n) => n.to_string(),
            MessageId::String(s) => s.clone(),
        }
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        MessageId::String(s.to_string())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        MessageId::String(s)
    }
}

impl From<i64> for MessageId {
    fn from(n: i64) -> Self {
        MessageId::Number(n)
    }
}

/// An outbound request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMessage {
    pub jsonrpc: String,
    pub id: MessageId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestMessage {
    pub fn new(id: impl Into<MessageId>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params: Some(params),
        }
    }
}

/// An outbound or inbound notification frame (no id, no reply expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl NotificationMessage {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC error object carried in a failed result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }
}

/// A response frame: either `result` or `error` is set, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMessage {
    pub id: MessageId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl ResultMessage {
    pub fn success(id: impl Into<MessageId>, result: Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: impl Into<MessageId>, error: ErrorObject) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }
}

/// Classified inbound frame from a newline-delimited stream.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    /// Reply to one of our requests; route by id.
    Response(ResultMessage),
    /// Server-originated notification (e.g. `notifications/tools/list_changed`).
    Notification(NotificationMessage),
    /// Server-originated request (e.g. `ping`); callers may answer or drop it.
    Request(RequestMessage),
}

/// Decodes one newline-delimited JSON-RPC frame.
///
/// A frame with `method` and `id` is a request; `method` without `id` is a
/// notification; `result` or `error` with `id` is a response. Anything else is
/// malformed.
pub fn decode_line(line: &str) -> Result<InboundMessage, WireError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| WireError::Malformed(e.to_string()))?;
    let obj = value
        .as_object()
        .ok_or_else(|| WireError::Malformed("frame is not an object".into()))?;

    if obj.contains_key("method") {
        if obj.contains_key("id") {
            let req: RequestMessage =
                serde_json::from_value(value).map_err(|e| WireError::Malformed(e.to_string()))?;
            return Ok(InboundMessage::Request(req));
        }
        let note: NotificationMessage =
            serde_json::from_value(value).map_err(|e| WireError::Malformed(e.to_string()))?;
        return Ok(InboundMessage::Notification(note));
    }

    if obj.contains_key("result") || obj.contains_key("error") {
        let resp: ResultMessage =
            serde_json::from_value(value).map_err(|e| WireError::Malformed(e.to_string()))?;
        return Ok(InboundMessage::Response(resp));
    }

    Err(WireError::Malformed(
        "frame has neither method nor result/error".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_with_version_and_params() {
        let req = RequestMessage::new("r-1", "tools/call", json!({"name": "echo"}));
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], "r-1");
        assert_eq!(value["params"]["name"], "echo");
    }

    #[test]
    fn message_id_key_is_stable_across_forms() {
        assert_eq!(MessageId::from(7).as_key(), "7");
        assert_eq!(MessageId::from("7").as_key(), "7");
    }

    #[test]
    fn decode_line_classifies_response_notification_request() {
        let resp = decode_line(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#).unwrap();
        assert!(matches!(resp, InboundMessage::Response(_)));

        let note =
            decode_line(r#"{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}"#)
                .unwrap();
        assert!(matches!(note, InboundMessage::Notification(_)));

        let req = decode_line(r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#).unwrap();
        assert!(matches!(req, InboundMessage::Request(_)));
    }

    #[test]
    fn decode_line_rejects_non_jsonrpc_frames() {
        assert!(decode_line("not json").is_err());
        assert!(decode_line(r#"{"hello":"world"}"#).is_err());
        assert!(decode_line(r#"[1,2,3]"#).is_err());
    }
}
