use serde_json::{Map, Value};

use crate::error::ReconcileError;
use crate::protocol::canonical::{
    CanonicalChoice, CanonicalContent, CanonicalMedia, CanonicalMessage, CanonicalRole,
    CanonicalUsage,
};
use crate::protocol::codec::{
    field_array, field_str, parse_role, produce_message, produce_parts, produce_text,
    produce_tool_call, produce_url, require_str,
};
use crate::protocol::context::SerdeContext;
use crate::protocol::mapping::llama_stop_to_canonical;

/// Metric names carrying token counts.
pub(crate) const PROMPT_TOKENS: &str = "num_prompt_tokens";
pub(crate) const COMPLETION_TOKENS: &str = "num_completion_tokens";
pub(crate) const TOTAL_TOKENS: &str = "num_total_tokens";

/// `{ "type": "text" | "reasoning" | "image_url", ... }`
///
/// # Errors
///
/// Unknown item types are [`ReconcileError::UnknownEvent`].
pub fn produce_content_item(data: &Value, ctx: &SerdeContext) -> Result<CanonicalContent, ReconcileError> {
    if let Value::String(text) = data {
        return Ok(CanonicalContent::Text(text.clone()));
    }
    match field_str(data, "type") {
        Some("text") => produce_text(data, ctx).map(CanonicalContent::Text),
        Some("reasoning") => Ok(CanonicalContent::Thinking {
            thinking: require_str(data, "reasoning", "reasoning content")?.to_string(),
            metadata: Map::new(),
        }),
        Some("image_url") => {
            let image = data
                .get("image_url")
                .ok_or_else(|| ReconcileError::translation("image_url item is missing 'image_url'"))?;
            produce_url(image, ctx).map(CanonicalContent::Media)
        }
        Some(other) => Err(ReconcileError::UnknownEvent(format!("content type '{other}'"))),
        None => Err(ReconcileError::translation("content item has no 'type'")),
    }
}

/// `{ "url": ... }`
///
/// # Errors
///
/// Fails when `url` is missing.
pub fn produce_image_url(data: &Value, _ctx: &SerdeContext) -> Result<CanonicalMedia, ReconcileError> {
    Ok(CanonicalMedia::Url {
        url: require_str(data, "url", "image_url")?.to_string(),
        media_type: None,
    })
}

/// `completion_message`: `content` is a string, a single item, or a list.
/// Tool call arguments arrive as JSON strings and are parsed by the default
/// function rule.
///
/// # Errors
///
/// Fails on unknown roles or argument strings that are not valid JSON.
pub fn produce_completion_message(data: &Value, ctx: &SerdeContext) -> Result<CanonicalMessage, ReconcileError> {
    let role = parse_role(data, CanonicalRole::Assistant)?;
    let parts = match data.get("content") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => produce_parts(items, ctx)?,
        Some(item) => produce_parts(std::slice::from_ref(item), ctx)?,
    };
    let mut message = CanonicalMessage::from_parts(role, parts);
    for call in field_array(data, "tool_calls") {
        message.push_tool_call(produce_tool_call(call, ctx)?);
    }
    Ok(message)
}

/// The response document; Llama has a single choice.
///
/// # Errors
///
/// Fails when `completion_message` is missing or malformed.
pub fn produce_completion(data: &Value, ctx: &SerdeContext) -> Result<CanonicalChoice, ReconcileError> {
    let completion = data
        .get("completion_message")
        .ok_or_else(|| ReconcileError::translation("response is missing 'completion_message'"))?;
    Ok(CanonicalChoice {
        index: 0,
        message: produce_message(completion, ctx)?,
        stop_reason: field_str(completion, "stop_reason").map(llama_stop_to_canonical),
    })
}

/// A `metrics` array of `{ "metric", "value" }` entries.
///
/// # Errors
///
/// Never fails; unknown metrics are skipped.
pub fn produce_metrics(data: &Value, _ctx: &SerdeContext) -> Result<CanonicalUsage, ReconcileError> {
    let mut usage = CanonicalUsage::default();
    for metric in data.as_array().map(Vec::as_slice).unwrap_or(&[]) {
        let value = metric.get("value").and_then(|value| {
            value
                .as_u64()
                .or_else(|| value.as_f64().filter(|v| *v >= 0.0).map(|v| v.round() as u64))
        });
        match field_str(metric, "metric") {
            Some(PROMPT_TOKENS) => usage.input_tokens = value,
            Some(COMPLETION_TOKENS) => usage.output_tokens = value,
            Some(TOTAL_TOKENS) => usage.total_tokens = value,
            _ => {}
        }
    }
    Ok(usage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::CanonicalStopReason;
    use crate::protocol::llama::LLAMA_CONTEXT;
    use serde_json::json;

    #[test]
    fn test_completion_with_string_arguments() {
        let choice = produce_completion(
            &json!({"completion_message": {
                "role": "assistant",
                "content": {"type": "text", "text": ""},
                "stop_reason": "tool_calls",
                "tool_calls": [{"id": "call_1", "function": {"name": "get_weather", "arguments": "{\"location\":\"Paris\"}"}}]
            }}),
            &LLAMA_CONTEXT,
        )
        .unwrap();
        assert_eq!(choice.stop_reason, Some(CanonicalStopReason::ToolCalls));
        assert_eq!(
            choice.message.tool_calls().next().unwrap().function.arguments,
            json!({"location": "Paris"})
        );
    }

    #[test]
    fn test_string_content() {
        let message = produce_completion_message(
            &json!({"role": "assistant", "content": "Hello"}),
            &LLAMA_CONTEXT,
        )
        .unwrap();
        assert_eq!(message.text(), "Hello");
    }

    #[test]
    fn test_metrics_to_usage() {
        let usage = produce_metrics(
            &json!([
                {"metric": "num_completion_tokens", "value": 12, "unit": "tokens"},
                {"metric": "num_prompt_tokens", "value": 30, "unit": "tokens"},
                {"metric": "num_total_tokens", "value": 42.0, "unit": "tokens"}
            ]),
            &LLAMA_CONTEXT,
        )
        .unwrap();
        assert_eq!(usage.input_tokens, Some(30));
        assert_eq!(usage.output_tokens, Some(12));
        assert_eq!(usage.total_tokens, Some(42));
    }
}
