use serde_json::{Map, Value};

use crate::error::ReconcileError;
use crate::protocol::canonical::{
    CanonicalChoice, CanonicalContent, CanonicalFunction, CanonicalMedia, CanonicalMessage,
    CanonicalRole, CanonicalToolCall, CanonicalToolResult, CanonicalUsage,
};
use crate::protocol::codec::{
    field_array, field_str, field_u64, produce_file, produce_function, produce_message,
    produce_parts, produce_text, produce_tool_call, produce_tool_call_result, produce_url,
    require_str,
};
use crate::protocol::context::SerdeContext;
use crate::protocol::mapping::{gemini_role_to_canonical, gemini_stop_to_canonical};

/// Metadata key holding Gemini's thought signature.
pub(crate) const THOUGHT_SIGNATURE_KEY: &str = "thoughtSignature";

/// Whether a part is a thought summary.
pub(crate) fn is_thought(part: &Value) -> bool {
    part.get("thought").and_then(Value::as_bool).unwrap_or(false)
}

/// One entry of `content.parts`.
///
/// # Errors
///
/// Parts without a recognized key are [`ReconcileError::UnknownEvent`].
pub fn produce_part(data: &Value, ctx: &SerdeContext) -> Result<CanonicalContent, ReconcileError> {
    if data.get("text").is_some() {
        let text = produce_text(data, ctx)?;
        if !is_thought(data) {
            return Ok(CanonicalContent::Text(text));
        }
        let mut metadata = Map::new();
        if let Some(signature) = data.get(THOUGHT_SIGNATURE_KEY) {
            metadata.insert(THOUGHT_SIGNATURE_KEY.to_string(), signature.clone());
        }
        return Ok(CanonicalContent::Thinking {
            thinking: text,
            metadata,
        });
    }
    if data.get("functionCall").is_some() {
        return produce_tool_call(data, ctx).map(CanonicalContent::ToolCall);
    }
    if data.get("functionResponse").is_some() {
        return produce_tool_call_result(data, ctx).map(CanonicalContent::ToolResult);
    }
    if let Some(inline) = data.get("inlineData") {
        return produce_file(inline, ctx).map(CanonicalContent::Media);
    }
    if let Some(file) = data.get("fileData") {
        return produce_url(file, ctx).map(CanonicalContent::Media);
    }
    let keys: Vec<&str> = data
        .as_object()
        .map(|part| part.keys().map(String::as_str).collect())
        .unwrap_or_default();
    Err(ReconcileError::UnknownEvent(format!("part with keys {keys:?}")))
}

/// `{ "name": ..., "args": {...} }`
///
/// # Errors
///
/// Fails when `name` is missing.
pub fn produce_function_args(data: &Value, _ctx: &SerdeContext) -> Result<CanonicalFunction, ReconcileError> {
    Ok(CanonicalFunction {
        name: require_str(data, "name", "functionCall")?.to_string(),
        arguments: match data.get("args") {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(args) => args.clone(),
        },
    })
}

/// A `{ "functionCall": {...} }` part. Gemini ids are optional; the
/// function name stands in for a missing one.
///
/// # Errors
///
/// Fails when `functionCall.name` is missing.
pub fn produce_function_call(data: &Value, ctx: &SerdeContext) -> Result<CanonicalToolCall, ReconcileError> {
    let call = data
        .get("functionCall")
        .ok_or_else(|| ReconcileError::translation("part is missing 'functionCall'"))?;
    let function = produce_function(call, ctx)?;
    let id = field_str(call, "id").unwrap_or(&function.name).to_string();
    Ok(CanonicalToolCall { id, function })
}

/// A `{ "functionResponse": {...} }` part.
///
/// # Errors
///
/// Fails when `functionResponse.name` is missing.
pub fn produce_function_response(
    data: &Value,
    _ctx: &SerdeContext,
) -> Result<CanonicalToolResult, ReconcileError> {
    let response = data
        .get("functionResponse")
        .ok_or_else(|| ReconcileError::translation("part is missing 'functionResponse'"))?;
    let name = require_str(response, "name", "functionResponse")?;
    Ok(CanonicalToolResult {
        tool_call_id: field_str(response, "id").unwrap_or(name).to_string(),
        content: response.get("response").cloned().unwrap_or(Value::Null),
    })
}

/// `{ "mimeType": ..., "data": ... }`
///
/// # Errors
///
/// Fails when either field is missing.
pub fn produce_inline_data(data: &Value, _ctx: &SerdeContext) -> Result<CanonicalMedia, ReconcileError> {
    Ok(CanonicalMedia::File {
        media_type: require_str(data, "mimeType", "inlineData")?.to_string(),
        data: require_str(data, "data", "inlineData")?.to_string(),
    })
}

/// `{ "fileUri": ..., "mimeType"?: ... }`
///
/// # Errors
///
/// Fails when `fileUri` is missing.
pub fn produce_file_data(data: &Value, _ctx: &SerdeContext) -> Result<CanonicalMedia, ReconcileError> {
    Ok(CanonicalMedia::Url {
        url: require_str(data, "fileUri", "fileData")?.to_string(),
        media_type: field_str(data, "mimeType").map(str::to_string),
    })
}

/// A `{ "role", "parts" }` content object.
///
/// # Errors
///
/// Propagates part errors other than unknown parts.
pub fn produce_content_parts(data: &Value, ctx: &SerdeContext) -> Result<CanonicalMessage, ReconcileError> {
    let role = field_str(data, "role").map_or(CanonicalRole::Assistant, gemini_role_to_canonical);
    let parts = produce_parts(field_array(data, "parts"), ctx)?;
    Ok(CanonicalMessage::from_parts(role, parts))
}

/// A candidate. A candidate without `content` (blocked by safety filters)
/// yields an empty assistant message.
///
/// # Errors
///
/// Propagates content errors; an index beyond `usize` is a translation
/// error.
pub fn produce_candidate(data: &Value, ctx: &SerdeContext) -> Result<CanonicalChoice, ReconcileError> {
    let index = field_u64(data, "index").unwrap_or(0);
    let index = usize::try_from(index)
        .map_err(|_| ReconcileError::translation(format!("candidate index {index} out of range")))?;
    let message = match data.get("content") {
        Some(content) => produce_message(content, ctx)?,
        None => CanonicalMessage::new(CanonicalRole::Assistant),
    };
    let stop_reason = field_str(data, "finishReason")
        .map(|reason| gemini_stop_to_canonical(reason, message.has_tool_calls()));
    Ok(CanonicalChoice {
        index,
        message,
        stop_reason,
    })
}

/// `usageMetadata` counts; thought tokens count as output.
///
/// # Errors
///
/// Never fails; the signature matches the context table.
pub fn produce_usage_metadata(data: &Value, _ctx: &SerdeContext) -> Result<CanonicalUsage, ReconcileError> {
    let candidates = field_u64(data, "candidatesTokenCount");
    let thoughts = field_u64(data, "thoughtsTokenCount");
    let output_tokens = match (candidates, thoughts) {
        (None, None) => None,
        (candidates, thoughts) => Some(candidates.unwrap_or(0).saturating_add(thoughts.unwrap_or(0))),
    };
    Ok(CanonicalUsage {
        input_tokens: field_u64(data, "promptTokenCount"),
        output_tokens,
        total_tokens: field_u64(data, "totalTokenCount"),
    })
}
