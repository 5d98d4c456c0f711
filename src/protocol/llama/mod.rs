pub mod decoder;
pub mod encoder;
pub mod response_decoder;
pub mod response_encoder;
pub mod stream;

use serde::Deserialize;
use serde_json::Value;

use crate::protocol::context::{Codec, SerdeContext};

/// Llama API context: a single `completion_message`, tool arguments as JSON
/// strings, and usage reported as a `metrics` array.
pub static LLAMA_CONTEXT: SerdeContext = SerdeContext {
    name: "llama",
    function: Codec::reduce_only(encoder::reduce_string_arguments),
    message: Codec::new(decoder::produce_completion_message, encoder::reduce_completion_message),
    choice: Codec::new(decoder::produce_completion, encoder::reduce_completion),
    usage: Codec::new(decoder::produce_metrics, encoder::reduce_metrics),
    content: Codec::new(decoder::produce_content_item, encoder::reduce_content_item),
    url: Codec::new(decoder::produce_image_url, encoder::reduce_image_url),
    ..SerdeContext::EMPTY
};

/// One streamed chunk: `{ "id"?, "event": {...} }`, or an error object.
#[derive(Debug, Clone, Deserialize)]
pub struct LlamaStreamChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub event: Option<LlamaStreamEvent>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlamaStreamEvent {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub delta: Option<LlamaDelta>,
    #[serde(default)]
    pub metrics: Option<Vec<Value>>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LlamaDelta {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolCall {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        function: LlamaFunctionDelta,
    },
    Reasoning {
        #[serde(default, alias = "text")]
        reasoning: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlamaFunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: String,
}

/// Human-readable text of an error object or string.
#[must_use]
pub fn describe_error(error: &Value) -> String {
    match error {
        Value::String(message) => message.clone(),
        _ => error
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), str::to_string),
    }
}
