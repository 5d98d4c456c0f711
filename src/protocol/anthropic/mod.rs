pub mod decoder;
pub mod encoder;
pub mod response_decoder;
pub mod response_encoder;
pub mod stream;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::protocol::context::{Codec, SerdeContext};

/// Anthropic Messages context: content blocks, `tool_use` calls, `input`
/// arguments, and usage without a total.
pub static ANTHROPIC_CONTEXT: SerdeContext = SerdeContext {
    name: "anthropic",
    tool_call: Codec::new(decoder::produce_tool_use, encoder::reduce_tool_use),
    tool_call_result: Codec::new(decoder::produce_tool_result, encoder::reduce_tool_result),
    function: Codec::new(decoder::produce_tool_input, encoder::reduce_tool_input),
    message: Codec::reduce_only(encoder::reduce_assistant),
    choice: Codec::new(decoder::produce_response, encoder::reduce_response),
    usage: Codec::new(decoder::produce_token_usage, encoder::reduce_token_usage),
    content: Codec::new(decoder::produce_block, encoder::reduce_block),
    url: Codec::new(decoder::produce_url_source, encoder::reduce_url_source),
    file: Codec::new(decoder::produce_base64_source, encoder::reduce_base64_source),
    ..SerdeContext::EMPTY
};

/// Anthropic SSE stream event, keyed by `data.type`.
///
/// Block and message bodies stay as JSON maps: the reconciler folds them into
/// the response document rather than into typed values.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicStreamEvent {
    MessageStart {
        message: Map<String, Value>,
    },
    ContentBlockStart {
        index: usize,
        content_block: Map<String, Value>,
    },
    ContentBlockDelta {
        index: usize,
        delta: AnthropicDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        #[serde(default)]
        delta: Map<String, Value>,
        #[serde(default)]
        usage: Option<Map<String, Value>>,
    },
    MessageStop,
    Ping,
    Error {
        error: AnthropicErrorBody,
    },
    #[serde(other)]
    Unknown,
}

/// Delta variants for content block deltas.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Unknown,
}

/// Error body, in stream and in error documents.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnthropicErrorBody {
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default)]
    pub message: String,
}

impl AnthropicErrorBody {
    #[must_use]
    pub fn describe(&self) -> String {
        match (self.type_.is_empty(), self.message.is_empty()) {
            (true, _) => self.message.clone(),
            (false, true) => self.type_.clone(),
            (false, false) => format!("{}: {}", self.type_, self.message),
        }
    }
}
