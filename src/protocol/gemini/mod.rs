pub mod decoder;
pub mod encoder;
pub mod response_decoder;
pub mod response_encoder;
pub mod stream;

use serde::Deserialize;

use crate::protocol::context::{Codec, SerdeContext};

/// Gemini `generateContent` context: `parts` instead of `content`, camelCase
/// media fields, `functionCall.args` objects and `usageMetadata` counts.
pub static GEMINI_CONTEXT: SerdeContext = SerdeContext {
    name: "gemini",
    text: Codec::reduce_only(encoder::reduce_text_part),
    tool_call: Codec::new(decoder::produce_function_call, encoder::reduce_function_call),
    tool_call_result: Codec::new(
        decoder::produce_function_response,
        encoder::reduce_function_response,
    ),
    function: Codec::new(decoder::produce_function_args, encoder::reduce_function_args),
    message: Codec::new(decoder::produce_content_parts, encoder::reduce_content_parts),
    choice: Codec::new(decoder::produce_candidate, encoder::reduce_candidate),
    usage: Codec::new(decoder::produce_usage_metadata, encoder::reduce_usage_metadata),
    content: Codec::new(decoder::produce_part, encoder::reduce_part),
    url: Codec::new(decoder::produce_file_data, encoder::reduce_file_data),
    file: Codec::new(decoder::produce_inline_data, encoder::reduce_inline_data),
    ..SerdeContext::EMPTY
};

/// Error object Gemini returns in place of a response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeminiErrorBody {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl GeminiErrorBody {
    #[must_use]
    pub fn describe(&self) -> String {
        match (&self.status, self.code) {
            (Some(status), _) => format!("{status}: {}", self.message),
            (None, Some(code)) => format!("{code}: {}", self.message),
            (None, None) => self.message.clone(),
        }
    }

    /// Read an `error` object, keeping its raw text when it has an
    /// unexpected shape.
    #[must_use]
    pub fn parse(error: &serde_json::Value) -> Self {
        serde_json::from_value(error.clone()).unwrap_or_else(|_| Self {
            message: error.to_string(),
            ..Self::default()
        })
    }
}
