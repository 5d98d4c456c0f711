use serde_json::{json, Map, Value};

use super::decoder::{REDACTED_KEY, SIGNATURE_KEY};
use crate::protocol::canonical::{
    CanonicalChoice, CanonicalContent, CanonicalFunction, CanonicalMedia, CanonicalMessage,
    CanonicalToolCall, CanonicalToolResult, CanonicalUsage,
};
use crate::protocol::codec::{
    reduce_content, reduce_file, reduce_function, reduce_message, reduce_text, reduce_tool_call,
    reduce_tool_call_result, reduce_url,
};
use crate::protocol::context::SerdeContext;
use crate::protocol::mapping::{canonical_role_to_anthropic, canonical_stop_to_anthropic};

pub fn reduce_block(content: &CanonicalContent, ctx: &SerdeContext) -> Value {
    match content {
        CanonicalContent::Text(text) => reduce_text(text, ctx),
        CanonicalContent::Thinking { thinking, metadata } => {
            if let Some(data) = metadata.get(REDACTED_KEY) {
                return json!({ "type": "redacted_thinking", "data": data });
            }
            let mut out = json!({ "type": "thinking", "thinking": thinking });
            if let Some(signature) = metadata.get(SIGNATURE_KEY) {
                out[SIGNATURE_KEY] = signature.clone();
            }
            out
        }
        CanonicalContent::ToolCall(call) => reduce_tool_call(call, ctx),
        CanonicalContent::ToolResult(result) => reduce_tool_call_result(result, ctx),
        CanonicalContent::Media(media) => {
            let (kind, source) = match media {
                CanonicalMedia::Url { .. } => ("image", reduce_url(media, ctx)),
                CanonicalMedia::File { media_type, .. } => {
                    let kind = if media_type.starts_with("image/") {
                        "image"
                    } else {
                        "document"
                    };
                    (kind, reduce_file(media, ctx))
                }
            };
            json!({ "type": kind, "source": source })
        }
    }
}

pub fn reduce_tool_input(function: &CanonicalFunction, _ctx: &SerdeContext) -> Value {
    json!({ "name": function.name, "input": function.arguments })
}

pub fn reduce_tool_use(call: &CanonicalToolCall, ctx: &SerdeContext) -> Value {
    let mut out = Map::new();
    out.insert("type".to_string(), Value::String("tool_use".to_string()));
    out.insert("id".to_string(), Value::String(call.id.clone()));
    if let Value::Object(function) = reduce_function(&call.function, ctx) {
        out.extend(function);
    }
    Value::Object(out)
}

pub fn reduce_tool_result(result: &CanonicalToolResult, _ctx: &SerdeContext) -> Value {
    json!({
        "type": "tool_result",
        "tool_use_id": result.tool_call_id,
        "content": result.content,
    })
}

pub fn reduce_url_source(media: &CanonicalMedia, ctx: &SerdeContext) -> Value {
    match media {
        CanonicalMedia::Url { url, .. } => json!({ "type": "url", "url": url }),
        CanonicalMedia::File { .. } => reduce_base64_source(media, ctx),
    }
}

pub fn reduce_base64_source(media: &CanonicalMedia, ctx: &SerdeContext) -> Value {
    match media {
        CanonicalMedia::File { media_type, data } => {
            json!({ "type": "base64", "media_type": media_type, "data": data })
        }
        CanonicalMedia::Url { .. } => reduce_url_source(media, ctx),
    }
}

/// Content blocks in order; tool calls become `tool_use` blocks in place.
pub fn reduce_assistant(message: &CanonicalMessage, ctx: &SerdeContext) -> Value {
    let content: Vec<Value> = message
        .content
        .iter()
        .map(|content| reduce_content(content, ctx))
        .collect();
    json!({
        "role": canonical_role_to_anthropic(message.role),
        "content": content,
    })
}

pub fn reduce_response(choice: &CanonicalChoice, ctx: &SerdeContext) -> Value {
    let mut out = reduce_message(&choice.message, ctx);
    out["stop_reason"] = choice.stop_reason.map_or(Value::Null, |reason| {
        Value::String(canonical_stop_to_anthropic(reason).to_string())
    });
    out
}

/// Anthropic reports no total.
pub fn reduce_token_usage(usage: &CanonicalUsage, _ctx: &SerdeContext) -> Value {
    json!({
        "input_tokens": usage.input_tokens.unwrap_or(0),
        "output_tokens": usage.output_tokens.unwrap_or(0),
    })
}
