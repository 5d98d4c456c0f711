use serde_json::{json, Value};

use super::decoder::{COMPLETION_TOKENS, PROMPT_TOKENS, TOTAL_TOKENS};
use crate::protocol::canonical::{
    CanonicalChoice, CanonicalContent, CanonicalFunction, CanonicalMedia, CanonicalMessage,
    CanonicalUsage,
};
use crate::protocol::codec::{reduce_content, reduce_message, reduce_text, reduce_tool_call, reduce_url};
use crate::protocol::context::SerdeContext;
use crate::protocol::mapping::{canonical_role_to_llama, canonical_stop_to_llama};

/// Arguments are written back as a JSON string.
pub fn reduce_string_arguments(function: &CanonicalFunction, _ctx: &SerdeContext) -> Value {
    json!({ "name": function.name, "arguments": function.arguments.to_string() })
}

pub fn reduce_content_item(content: &CanonicalContent, ctx: &SerdeContext) -> Value {
    match content {
        CanonicalContent::Text(text) => reduce_text(text, ctx),
        CanonicalContent::Thinking { thinking, .. } => {
            json!({ "type": "reasoning", "reasoning": thinking })
        }
        CanonicalContent::ToolCall(call) => reduce_tool_call(call, ctx),
        CanonicalContent::ToolResult(result) => json!({ "type": "text", "text": result.content.to_string() }),
        CanonicalContent::Media(media) => json!({ "type": "image_url", "image_url": reduce_url(media, ctx) }),
    }
}

pub fn reduce_image_url(media: &CanonicalMedia, _ctx: &SerdeContext) -> Value {
    match media {
        CanonicalMedia::Url { url, .. } => json!({ "url": url }),
        CanonicalMedia::File { media_type, data } => {
            json!({ "url": format!("data:{media_type};base64,{data}") })
        }
    }
}

/// A lone text item is written as an object, anything else as a list.
/// Tool calls go to the separate `tool_calls` array.
pub fn reduce_completion_message(message: &CanonicalMessage, ctx: &SerdeContext) -> Value {
    let mut items: Vec<Value> = message
        .content
        .iter()
        .filter(|content| !matches!(content, CanonicalContent::ToolCall(_)))
        .map(|content| reduce_content(content, ctx))
        .collect();
    let content = if items.len() == 1 {
        items.pop().unwrap_or_default()
    } else {
        Value::Array(items)
    };
    let tool_calls: Vec<Value> = message
        .tool_calls()
        .map(|call| reduce_tool_call(call, ctx))
        .collect();
    json!({
        "role": canonical_role_to_llama(message.role),
        "content": content,
        "tool_calls": tool_calls,
    })
}

pub fn reduce_completion(choice: &CanonicalChoice, ctx: &SerdeContext) -> Value {
    let mut completion = reduce_message(&choice.message, ctx);
    if let Some(reason) = choice.stop_reason {
        completion["stop_reason"] = Value::String(canonical_stop_to_llama(reason).to_string());
    }
    json!({ "completion_message": completion })
}

pub fn reduce_metrics(usage: &CanonicalUsage, _ctx: &SerdeContext) -> Value {
    let metrics: Vec<Value> = [
        (PROMPT_TOKENS, usage.input_tokens),
        (COMPLETION_TOKENS, usage.output_tokens),
        (TOTAL_TOKENS, usage.total_tokens),
    ]
    .into_iter()
    .filter_map(|(metric, value)| {
        value.map(|value| json!({ "metric": metric, "value": value, "unit": "tokens" }))
    })
    .collect();
    Value::Array(metrics)
}
