//! Responses-API item shapes.

use serde::{Deserialize, Serialize};

/// One item in a Responses-API input or output sequence.
///
/// Tool calls are `function_call` items; their results are
/// `function_call_output` items carrying the same `call_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesItem {
    Message {
        role: String,
        content: String,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

impl ResponsesItem {
    pub fn assistant(content: impl Into<String>) -> Self {
        ResponsesItem::Message {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    pub fn function_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        ResponsesItem::FunctionCall {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        ResponsesItem::FunctionCallOutput {
            call_id: call_id.into(),
            output: output.into(),
        }
    }
}

/// Responses request: the accumulated input items.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponsesRequest {
    pub input: Vec<ResponsesItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ResponsesRequest {
    pub fn new(input: Vec<ResponsesItem>) -> Self {
        Self { input, model: None }
    }
}

/// Responses response as returned by the injected LLM caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponsesResponse {
    pub output: Vec<ResponsesItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl ResponsesResponse {
    pub fn new(output: Vec<ResponsesItem>) -> Self {
        Self {
            output,
            finish_reason: None,
        }
    }

    /// The `function_call` items of this response, in emission order.
    pub fn function_calls(&self) -> Vec<&ResponsesItem> {
        self.output
            .iter()
            .filter(|item| matches!(item, ResponsesItem::FunctionCall { .. }))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_serialize_with_type_tags() {
        let call = ResponsesItem::function_call("c1", "fs-read_file", "{}");
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["type"], "function_call");
        assert_eq!(json["call_id"], "c1");

        let out = ResponsesItem::function_call_output("c1", "data");
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["type"], "function_call_output");
        assert_eq!(json["output"], "data");
    }

    #[test]
    fn function_calls_filters_message_items() {
        let resp = ResponsesResponse::new(vec![
            ResponsesItem::assistant("working on it"),
            ResponsesItem::function_call("c1", "echo", "{}"),
            ResponsesItem::function_call("c2", "calc", "{}"),
        ]);
        assert_eq!(resp.function_calls().len(), 2);
    }
}
