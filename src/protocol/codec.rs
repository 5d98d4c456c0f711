//! Context dispatch and the default produce/reduce rules.
//!
//! Every `produce_*` / `reduce_*` function consults the vendor's
//! [`SerdeContext`] first and falls back to the default rule, which reads and
//! writes the canonical JSON shape. Default rules recurse through the
//! dispatchers, so a vendor overriding `content` also changes what the
//! default `message` rule produces.

use serde_json::{json, Map, Value};

use crate::error::ReconcileError;
use crate::protocol::canonical::{
    CanonicalChoice, CanonicalContent, CanonicalFunction, CanonicalMedia, CanonicalMessage,
    CanonicalPayload, CanonicalRole, CanonicalStopReason, CanonicalToolCall, CanonicalToolResult,
    CanonicalUsage, ProviderExtensions,
};
use crate::protocol::context::SerdeContext;

// ---------------------------------------------------------------------------
// Field helpers shared by the vendor rules
// ---------------------------------------------------------------------------

pub(crate) fn field_str<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str)
}

pub(crate) fn require_str<'a>(
    data: &'a Value,
    key: &str,
    what: &str,
) -> Result<&'a str, ReconcileError> {
    field_str(data, key)
        .ok_or_else(|| ReconcileError::translation(format!("{what} is missing string field '{key}'")))
}

pub(crate) fn field_u64(data: &Value, key: &str) -> Option<u64> {
    data.get(key).and_then(Value::as_u64)
}

pub(crate) fn field_array<'a>(data: &'a Value, key: &str) -> &'a [Value] {
    data.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub(crate) fn parse_role(data: &Value, default: CanonicalRole) -> Result<CanonicalRole, ReconcileError> {
    match field_str(data, "role") {
        None => Ok(default),
        Some(role) => CanonicalRole::from_wire(role)
            .ok_or_else(|| ReconcileError::translation(format!("unknown role '{role}'"))),
    }
}

/// Parse tool arguments that a vendor sends as a JSON-encoded string.
///
/// An empty string means "no arguments".
pub(crate) fn parse_arguments_text(text: &str, event: &str) -> Result<Value, ReconcileError> {
    if text.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(text).map_err(|e| {
        ReconcileError::malformed(event, format!("tool arguments are not valid JSON: {e}"))
    })
}

fn usage_field(usage: &CanonicalUsage, out: &mut Map<String, Value>, names: [&str; 3]) {
    let values = [usage.input_tokens, usage.output_tokens, usage.total_tokens];
    for (name, value) in names.into_iter().zip(values) {
        if let Some(value) = value {
            out.insert(name.to_string(), Value::from(value));
        }
    }
}

/// Write the populated usage fields under vendor-specific names.
pub(crate) fn usage_to_object(usage: &CanonicalUsage, names: [&str; 3]) -> Value {
    let mut out = Map::new();
    usage_field(usage, &mut out, names);
    Value::Object(out)
}

// ---------------------------------------------------------------------------
// Dispatchers
// ---------------------------------------------------------------------------

macro_rules! dispatch {
    ($produce:ident, $reduce:ident, $field:ident, $ty:ty, $default_produce:ident, $default_reduce:ident) => {
        /// Produce through the context override, or the default rule.
        ///
        /// # Errors
        ///
        /// Returns [`ReconcileError`] when the wire value does not have the
        /// expected shape.
        pub fn $produce(data: &Value, ctx: &SerdeContext) -> Result<$ty, ReconcileError> {
            match ctx.$field.produce {
                Some(produce) => produce(data, ctx),
                None => $default_produce(data, ctx),
            }
        }

        /// Reduce through the context override, or the default rule.
        #[must_use]
        pub fn $reduce(value: &$ty, ctx: &SerdeContext) -> Value {
            match ctx.$field.reduce {
                Some(reduce) => reduce(value, ctx),
                None => $default_reduce(value, ctx),
            }
        }
    };
}

dispatch!(produce_text, reduce_text, text, String, default_produce_text, default_reduce_text);
dispatch!(
    produce_tool_call,
    reduce_tool_call,
    tool_call,
    CanonicalToolCall,
    default_produce_tool_call,
    default_reduce_tool_call
);
dispatch!(
    produce_tool_call_result,
    reduce_tool_call_result,
    tool_call_result,
    CanonicalToolResult,
    default_produce_tool_call_result,
    default_reduce_tool_call_result
);
dispatch!(
    produce_function,
    reduce_function,
    function,
    CanonicalFunction,
    default_produce_function,
    default_reduce_function
);
dispatch!(
    produce_message,
    reduce_message,
    message,
    CanonicalMessage,
    default_produce_message,
    default_reduce_message
);
dispatch!(
    produce_choice,
    reduce_choice,
    choice,
    CanonicalChoice,
    default_produce_choice,
    default_reduce_choice
);
dispatch!(
    produce_usage,
    reduce_usage,
    usage,
    CanonicalUsage,
    default_produce_usage,
    default_reduce_usage
);
dispatch!(
    produce_content,
    reduce_content,
    content,
    CanonicalContent,
    default_produce_content,
    default_reduce_content
);
dispatch!(produce_url, reduce_url, url, CanonicalMedia, default_produce_url, default_reduce_url);
dispatch!(produce_file, reduce_file, file, CanonicalMedia, default_produce_file, default_reduce_file);

/// Produce every part, skipping the ones the context does not recognize.
///
/// # Errors
///
/// Returns the first non-soft error raised by a part.
pub fn produce_parts(parts: &[Value], ctx: &SerdeContext) -> Result<Vec<CanonicalContent>, ReconcileError> {
    let mut out = Vec::with_capacity(parts.len());
    for part in parts {
        match produce_content(part, ctx) {
            Ok(content) => out.push(content),
            Err(err) if err.is_soft() => {
                tracing::debug!(context = ctx.name, error = %err, "skipping content part");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(out)
}

/// Decode the canonical JSON shape into a payload.
///
/// # Errors
///
/// Returns [`ReconcileError`] when a choice or usage entry is malformed.
pub fn produce_payload(data: &Value, ctx: &SerdeContext) -> Result<CanonicalPayload, ReconcileError> {
    let mut payload = CanonicalPayload::new();
    for choice in field_array(data, "choices") {
        payload.merge_choice(produce_choice(choice, ctx)?);
    }
    if let Some(usage) = data.get("usage").filter(|usage| !usage.is_null()) {
        payload.merge_usage(&produce_usage(usage, ctx)?);
    }
    Ok(payload)
}

/// Encode a payload into the canonical JSON shape.
#[must_use]
pub fn reduce_payload(payload: &CanonicalPayload, ctx: &SerdeContext) -> Value {
    let choices: Vec<Value> = payload
        .choices
        .iter()
        .map(|choice| reduce_choice(choice, ctx))
        .collect();
    let mut out = Map::new();
    out.insert("choices".to_string(), Value::Array(choices));
    if let Some(usage) = &payload.usage {
        out.insert("usage".to_string(), reduce_usage(usage, ctx));
    }
    Value::Object(out)
}

impl CanonicalPayload {
    /// The canonical JSON form of this payload.
    #[must_use]
    pub fn to_json(&self) -> Value {
        reduce_payload(self, &SerdeContext::EMPTY)
    }

    /// Parse the canonical JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when `data` is not in canonical form.
    pub fn from_json(data: &Value) -> Result<Self, ReconcileError> {
        produce_payload(data, &SerdeContext::EMPTY)
    }
}

// ---------------------------------------------------------------------------
// Default rules
// ---------------------------------------------------------------------------

fn default_produce_text(data: &Value, _ctx: &SerdeContext) -> Result<String, ReconcileError> {
    match data {
        Value::String(text) => Ok(text.clone()),
        _ => require_str(data, "text", "text content").map(str::to_string),
    }
}

fn default_reduce_text(text: &String, _ctx: &SerdeContext) -> Value {
    json!({ "type": "text", "text": text })
}

fn default_produce_function(data: &Value, _ctx: &SerdeContext) -> Result<CanonicalFunction, ReconcileError> {
    let name = require_str(data, "name", "function")?.to_string();
    let arguments = match data.get("arguments") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(Value::String(text)) => parse_arguments_text(text, "function")?,
        Some(other) => other.clone(),
    };
    Ok(CanonicalFunction { name, arguments })
}

fn default_reduce_function(function: &CanonicalFunction, _ctx: &SerdeContext) -> Value {
    json!({ "name": function.name, "arguments": function.arguments })
}

fn default_produce_tool_call(data: &Value, ctx: &SerdeContext) -> Result<CanonicalToolCall, ReconcileError> {
    let id = require_str(data, "id", "tool call")?.to_string();
    let function = match data.get("function") {
        Some(function) => produce_function(function, ctx)?,
        None => produce_function(data, ctx)?,
    };
    Ok(CanonicalToolCall { id, function })
}

fn default_reduce_tool_call(call: &CanonicalToolCall, ctx: &SerdeContext) -> Value {
    json!({ "id": call.id, "function": reduce_function(&call.function, ctx) })
}

fn default_produce_tool_call_result(
    data: &Value,
    _ctx: &SerdeContext,
) -> Result<CanonicalToolResult, ReconcileError> {
    Ok(CanonicalToolResult {
        tool_call_id: require_str(data, "tool_call_id", "tool result")?.to_string(),
        content: data.get("content").cloned().unwrap_or(Value::Null),
    })
}

fn default_reduce_tool_call_result(result: &CanonicalToolResult, _ctx: &SerdeContext) -> Value {
    json!({
        "type": "tool_result",
        "tool_call_id": result.tool_call_id,
        "content": result.content,
    })
}

fn default_produce_url(data: &Value, _ctx: &SerdeContext) -> Result<CanonicalMedia, ReconcileError> {
    Ok(CanonicalMedia::Url {
        url: require_str(data, "url", "url content")?.to_string(),
        media_type: field_str(data, "media_type").map(str::to_string),
    })
}

fn default_reduce_url(media: &CanonicalMedia, ctx: &SerdeContext) -> Value {
    match media {
        CanonicalMedia::Url { url, media_type } => {
            let mut out = json!({ "type": "url", "url": url });
            if let Some(media_type) = media_type {
                out["media_type"] = Value::String(media_type.clone());
            }
            out
        }
        CanonicalMedia::File { .. } => reduce_file(media, ctx),
    }
}

fn default_produce_file(data: &Value, _ctx: &SerdeContext) -> Result<CanonicalMedia, ReconcileError> {
    Ok(CanonicalMedia::File {
        media_type: require_str(data, "media_type", "file content")?.to_string(),
        data: require_str(data, "data", "file content")?.to_string(),
    })
}

fn default_reduce_file(media: &CanonicalMedia, ctx: &SerdeContext) -> Value {
    match media {
        CanonicalMedia::File { media_type, data } => {
            json!({ "type": "file", "media_type": media_type, "data": data })
        }
        CanonicalMedia::Url { .. } => reduce_url(media, ctx),
    }
}

fn default_produce_content(data: &Value, ctx: &SerdeContext) -> Result<CanonicalContent, ReconcileError> {
    if let Value::String(text) = data {
        return Ok(CanonicalContent::Text(text.clone()));
    }
    match field_str(data, "type") {
        Some("text") => produce_text(data, ctx).map(CanonicalContent::Text),
        Some("thinking") => Ok(CanonicalContent::Thinking {
            thinking: require_str(data, "thinking", "thinking content")?.to_string(),
            metadata: data
                .get("metadata")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        }),
        Some("tool_call") => produce_tool_call(data, ctx).map(CanonicalContent::ToolCall),
        Some("tool_result") => produce_tool_call_result(data, ctx).map(CanonicalContent::ToolResult),
        Some("url") => produce_url(data, ctx).map(CanonicalContent::Media),
        Some("file") => produce_file(data, ctx).map(CanonicalContent::Media),
        Some(other) => Err(ReconcileError::UnknownEvent(format!("content type '{other}'"))),
        None => Err(ReconcileError::translation("content entry has no 'type'")),
    }
}

fn default_reduce_content(content: &CanonicalContent, ctx: &SerdeContext) -> Value {
    match content {
        CanonicalContent::Text(text) => reduce_text(text, ctx),
        CanonicalContent::Thinking { thinking, metadata } => {
            thinking_to_value(thinking, metadata)
        }
        CanonicalContent::ToolCall(call) => {
            let mut out = reduce_tool_call(call, ctx);
            if let Value::Object(map) = &mut out {
                map.insert("type".to_string(), Value::String("tool_call".to_string()));
            }
            out
        }
        CanonicalContent::ToolResult(result) => reduce_tool_call_result(result, ctx),
        CanonicalContent::Media(media @ CanonicalMedia::Url { .. }) => reduce_url(media, ctx),
        CanonicalContent::Media(media @ CanonicalMedia::File { .. }) => reduce_file(media, ctx),
    }
}

fn thinking_to_value(thinking: &str, metadata: &ProviderExtensions) -> Value {
    let mut out = json!({ "type": "thinking", "thinking": thinking });
    if !metadata.is_empty() {
        out["metadata"] = Value::Object(metadata.clone());
    }
    out
}

fn default_produce_message(data: &Value, ctx: &SerdeContext) -> Result<CanonicalMessage, ReconcileError> {
    let role = parse_role(data, CanonicalRole::Assistant)?;
    let parts = match data.get("content") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(text)) => vec![CanonicalContent::Text(text.clone())],
        Some(Value::Array(parts)) => produce_parts(parts, ctx)?,
        Some(single) => produce_parts(std::slice::from_ref(single), ctx)?,
    };
    let mut message = CanonicalMessage::from_parts(role, parts);
    for call in field_array(data, "tool_calls") {
        message.push_tool_call(produce_tool_call(call, ctx)?);
    }
    Ok(message)
}

fn default_reduce_message(message: &CanonicalMessage, ctx: &SerdeContext) -> Value {
    let content: Vec<Value> = message
        .content
        .iter()
        .map(|content| reduce_content(content, ctx))
        .collect();
    json!({
        "role": message.role.as_str(),
        "content": content,
    })
}

fn default_produce_choice(data: &Value, ctx: &SerdeContext) -> Result<CanonicalChoice, ReconcileError> {
    let index = field_u64(data, "index").unwrap_or(0);
    let index = usize::try_from(index)
        .map_err(|_| ReconcileError::translation(format!("choice index {index} out of range")))?;
    let message = match data.get("message") {
        Some(message) => produce_message(message, ctx)?,
        None => return Err(ReconcileError::translation("choice is missing 'message'")),
    };
    let stop_reason = field_str(data, "stop_reason").and_then(CanonicalStopReason::parse);
    Ok(CanonicalChoice {
        index,
        message,
        stop_reason,
    })
}

fn default_reduce_choice(choice: &CanonicalChoice, ctx: &SerdeContext) -> Value {
    let mut out = json!({
        "index": choice.index,
        "message": reduce_message(&choice.message, ctx),
    });
    if let Some(stop_reason) = choice.stop_reason {
        out["stop_reason"] = Value::String(stop_reason.as_str().to_string());
    }
    out
}

const CANONICAL_USAGE_NAMES: [&str; 3] = ["input_tokens", "output_tokens", "total_tokens"];

fn default_produce_usage(data: &Value, _ctx: &SerdeContext) -> Result<CanonicalUsage, ReconcileError> {
    let [input, output, total] = CANONICAL_USAGE_NAMES;
    Ok(CanonicalUsage {
        input_tokens: field_u64(data, input),
        output_tokens: field_u64(data, output),
        total_tokens: field_u64(data, total),
    })
}

fn default_reduce_usage(usage: &CanonicalUsage, _ctx: &SerdeContext) -> Value {
    usage_to_object(usage, CANONICAL_USAGE_NAMES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::context::Codec;

    #[test]
    fn test_canonical_payload_json_roundtrip() {
        let data = json!({
            "choices": [{
                "index": 0,
                "stop_reason": "tool_calls",
                "message": {
                    "role": "assistant",
                    "content": [
                        {"type": "thinking", "thinking": "weather lookup", "metadata": {"signature": "sig"}},
                        {"type": "text", "text": "Checking."},
                        {"type": "tool_call", "id": "call_1", "function": {"name": "weather", "arguments": {"city": "London"}}},
                        {"type": "text", "text": "Done."}
                    ]
                }
            }],
            "usage": {"input_tokens": 3, "output_tokens": 4}
        });
        let payload = CanonicalPayload::from_json(&data).unwrap();
        assert_eq!(payload.text(), "Checking.\nDone.");
        assert_eq!(payload.tool_calls().count(), 1);
        assert_eq!(payload.choices[0].stop_reason, Some(CanonicalStopReason::ToolCalls));
        assert_eq!(payload.usage.and_then(|u| u.total()), Some(7));
        assert_eq!(payload.to_json(), data);
    }

    #[test]
    fn test_string_arguments_are_parsed() {
        let call = produce_tool_call(
            &json!({"id": "c", "function": {"name": "f", "arguments": "{\"a\":1}"}}),
            &SerdeContext::EMPTY,
        )
        .unwrap();
        assert_eq!(call.function.arguments, json!({"a": 1}));
    }

    #[test]
    fn test_bad_string_arguments_are_malformed() {
        let err = produce_tool_call(
            &json!({"id": "c", "function": {"name": "f", "arguments": "{\"a\":"}}),
            &SerdeContext::EMPTY,
        )
        .unwrap_err();
        assert!(matches!(err, ReconcileError::MalformedEvent { .. }));
    }

    #[test]
    fn test_unknown_content_is_skipped() {
        let message = produce_message(
            &json!({"role": "assistant", "content": [
                {"type": "hologram", "frames": 3},
                {"type": "text", "text": "hi"}
            ]}),
            &SerdeContext::EMPTY,
        )
        .unwrap();
        assert_eq!(message.content, vec![CanonicalContent::text("hi")]);
    }

    fn produce_bracketed(data: &Value, _ctx: &SerdeContext) -> Result<String, ReconcileError> {
        Ok(format!("[{}]", data["text"].as_str().unwrap_or_default()))
    }

    static BRACKETS: SerdeContext = SerdeContext {
        name: "brackets",
        text: Codec::produce_only(produce_bracketed),
        ..SerdeContext::EMPTY
    };

    #[test]
    fn test_override_reaches_nested_default_rules() {
        let message = produce_message(
            &json!({"role": "assistant", "content": [{"type": "text", "text": "hi"}]}),
            &BRACKETS,
        )
        .unwrap();
        assert_eq!(message.text(), "[hi]");
    }
}
