use serde_json::{json, Map, Value};

use super::decoder::THOUGHT_SIGNATURE_KEY;
use crate::protocol::canonical::{
    CanonicalChoice, CanonicalContent, CanonicalFunction, CanonicalMedia, CanonicalMessage,
    CanonicalToolCall, CanonicalToolResult, CanonicalUsage,
};
use crate::protocol::codec::{
    reduce_content, reduce_file, reduce_function, reduce_message, reduce_text, reduce_tool_call,
    reduce_tool_call_result, reduce_url, usage_to_object,
};
use crate::protocol::context::SerdeContext;
use crate::protocol::mapping::{canonical_role_to_gemini, canonical_stop_to_gemini};

pub fn reduce_text_part(text: &String, _ctx: &SerdeContext) -> Value {
    json!({ "text": text })
}

pub fn reduce_part(content: &CanonicalContent, ctx: &SerdeContext) -> Value {
    match content {
        CanonicalContent::Text(text) => reduce_text(text, ctx),
        CanonicalContent::Thinking { thinking, metadata } => {
            let mut out = json!({ "text": thinking, "thought": true });
            if let Some(signature) = metadata.get(THOUGHT_SIGNATURE_KEY) {
                out[THOUGHT_SIGNATURE_KEY] = signature.clone();
            }
            out
        }
        CanonicalContent::ToolCall(call) => reduce_tool_call(call, ctx),
        CanonicalContent::ToolResult(result) => reduce_tool_call_result(result, ctx),
        CanonicalContent::Media(media @ CanonicalMedia::Url { .. }) => {
            json!({ "fileData": reduce_url(media, ctx) })
        }
        CanonicalContent::Media(media @ CanonicalMedia::File { .. }) => {
            json!({ "inlineData": reduce_file(media, ctx) })
        }
    }
}

pub fn reduce_function_args(function: &CanonicalFunction, _ctx: &SerdeContext) -> Value {
    json!({ "name": function.name, "args": function.arguments })
}

/// The id is omitted when it only repeats the function name.
pub fn reduce_function_call(call: &CanonicalToolCall, ctx: &SerdeContext) -> Value {
    let mut function = reduce_function(&call.function, ctx);
    if call.id != call.function.name {
        function["id"] = Value::String(call.id.clone());
    }
    json!({ "functionCall": function })
}

pub fn reduce_function_response(result: &CanonicalToolResult, _ctx: &SerdeContext) -> Value {
    json!({
        "functionResponse": {
            "name": result.tool_call_id,
            "response": result.content,
        }
    })
}

pub fn reduce_inline_data(media: &CanonicalMedia, ctx: &SerdeContext) -> Value {
    match media {
        CanonicalMedia::File { media_type, data } => json!({ "mimeType": media_type, "data": data }),
        CanonicalMedia::Url { .. } => reduce_file_data(media, ctx),
    }
}

pub fn reduce_file_data(media: &CanonicalMedia, ctx: &SerdeContext) -> Value {
    match media {
        CanonicalMedia::Url { url, media_type } => {
            let mut out = json!({ "fileUri": url });
            if let Some(media_type) = media_type {
                out["mimeType"] = Value::String(media_type.clone());
            }
            out
        }
        CanonicalMedia::File { .. } => reduce_inline_data(media, ctx),
    }
}

/// Parts in content order; tool calls become `functionCall` parts in place.
pub fn reduce_content_parts(message: &CanonicalMessage, ctx: &SerdeContext) -> Value {
    let parts: Vec<Value> = message
        .content
        .iter()
        .map(|content| reduce_content(content, ctx))
        .collect();
    json!({ "role": canonical_role_to_gemini(message.role), "parts": parts })
}

pub fn reduce_candidate(choice: &CanonicalChoice, ctx: &SerdeContext) -> Value {
    let mut out = Map::new();
    out.insert("content".to_string(), reduce_message(&choice.message, ctx));
    if let Some(reason) = choice.stop_reason {
        out.insert(
            "finishReason".to_string(),
            Value::String(canonical_stop_to_gemini(reason).to_string()),
        );
    }
    out.insert("index".to_string(), Value::from(choice.index));
    Value::Object(out)
}

pub fn reduce_usage_metadata(usage: &CanonicalUsage, _ctx: &SerdeContext) -> Value {
    usage_to_object(
        usage,
        ["promptTokenCount", "candidatesTokenCount", "totalTokenCount"],
    )
}
