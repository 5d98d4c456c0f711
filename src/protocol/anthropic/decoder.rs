use serde_json::{Map, Value};

use crate::error::ReconcileError;
use crate::protocol::canonical::{
    CanonicalChoice, CanonicalContent, CanonicalFunction, CanonicalMedia, CanonicalRole,
    CanonicalToolCall, CanonicalToolResult, CanonicalUsage,
};
use crate::protocol::codec::{
    field_str, field_u64, produce_file, produce_function, produce_message, produce_text,
    produce_tool_call, produce_tool_call_result, produce_url, require_str,
};
use crate::protocol::context::SerdeContext;
use crate::protocol::mapping::anthropic_stop_to_canonical;

/// Anthropic metadata key holding the thinking signature.
pub(crate) const SIGNATURE_KEY: &str = "signature";
/// Anthropic metadata key holding a redacted thinking payload.
pub(crate) const REDACTED_KEY: &str = "redacted_data";

/// A content block (`text`, `thinking`, `tool_use`, `tool_result`, `image`,
/// `document`).
///
/// # Errors
///
/// Unknown block types are [`ReconcileError::UnknownEvent`].
pub fn produce_block(data: &Value, ctx: &SerdeContext) -> Result<CanonicalContent, ReconcileError> {
    match field_str(data, "type") {
        Some("text") => produce_text(data, ctx).map(CanonicalContent::Text),
        Some("thinking") => {
            let mut metadata = Map::new();
            if let Some(signature) = field_str(data, SIGNATURE_KEY).filter(|s| !s.is_empty()) {
                metadata.insert(SIGNATURE_KEY.to_string(), Value::String(signature.to_string()));
            }
            Ok(CanonicalContent::Thinking {
                thinking: field_str(data, "thinking").unwrap_or_default().to_string(),
                metadata,
            })
        }
        Some("redacted_thinking") => {
            let mut metadata = Map::new();
            metadata.insert(
                REDACTED_KEY.to_string(),
                Value::String(require_str(data, "data", "redacted_thinking block")?.to_string()),
            );
            Ok(CanonicalContent::Thinking {
                thinking: String::new(),
                metadata,
            })
        }
        Some("tool_use") => produce_tool_call(data, ctx).map(CanonicalContent::ToolCall),
        Some("tool_result") => {
            produce_tool_call_result(data, ctx).map(CanonicalContent::ToolResult)
        }
        Some("image" | "document") => {
            let source = data
                .get("source")
                .ok_or_else(|| ReconcileError::translation("media block is missing 'source'"))?;
            match field_str(source, "type") {
                Some("url") => produce_url(source, ctx).map(CanonicalContent::Media),
                Some("base64") => produce_file(source, ctx).map(CanonicalContent::Media),
                other => Err(ReconcileError::UnknownEvent(format!(
                    "media source type '{}'",
                    other.unwrap_or("")
                ))),
            }
        }
        Some(other) => Err(ReconcileError::UnknownEvent(format!("content block '{other}'"))),
        None => Err(ReconcileError::translation("content block has no 'type'")),
    }
}

/// `{ "name": ..., "input": {...} }`
///
/// # Errors
///
/// Fails when `name` is missing.
pub fn produce_tool_input(data: &Value, _ctx: &SerdeContext) -> Result<CanonicalFunction, ReconcileError> {
    Ok(CanonicalFunction {
        name: require_str(data, "name", "tool_use block")?.to_string(),
        arguments: match data.get("input") {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(input) => input.clone(),
        },
    })
}

/// A `tool_use` block.
///
/// # Errors
///
/// Fails when `id` or `name` is missing.
pub fn produce_tool_use(data: &Value, ctx: &SerdeContext) -> Result<CanonicalToolCall, ReconcileError> {
    Ok(CanonicalToolCall {
        id: require_str(data, "id", "tool_use block")?.to_string(),
        function: produce_function(data, ctx)?,
    })
}

/// A `tool_result` block.
///
/// # Errors
///
/// Fails when `tool_use_id` is missing.
pub fn produce_tool_result(data: &Value, _ctx: &SerdeContext) -> Result<CanonicalToolResult, ReconcileError> {
    Ok(CanonicalToolResult {
        tool_call_id: require_str(data, "tool_use_id", "tool_result block")?.to_string(),
        content: data.get("content").cloned().unwrap_or(Value::Null),
    })
}

/// `{ "type": "url", "url": ... }` media source.
///
/// # Errors
///
/// Fails when `url` is missing.
pub fn produce_url_source(data: &Value, _ctx: &SerdeContext) -> Result<CanonicalMedia, ReconcileError> {
    Ok(CanonicalMedia::Url {
        url: require_str(data, "url", "url source")?.to_string(),
        media_type: field_str(data, "media_type").map(str::to_string),
    })
}

/// `{ "type": "base64", "media_type": ..., "data": ... }` media source.
///
/// # Errors
///
/// Fails when `media_type` or `data` is missing.
pub fn produce_base64_source(data: &Value, _ctx: &SerdeContext) -> Result<CanonicalMedia, ReconcileError> {
    Ok(CanonicalMedia::File {
        media_type: require_str(data, "media_type", "base64 source")?.to_string(),
        data: require_str(data, "data", "base64 source")?.to_string(),
    })
}

/// The whole Messages response is Anthropic's only choice.
///
/// # Errors
///
/// Fails when a content block is malformed or the role is not `assistant`.
pub fn produce_response(data: &Value, ctx: &SerdeContext) -> Result<CanonicalChoice, ReconcileError> {
    let message = produce_message(data, ctx)?;
    if message.role != CanonicalRole::Assistant {
        return Err(ReconcileError::translation(format!(
            "response role must be assistant, got '{}'",
            message.role.as_str()
        )));
    }
    Ok(CanonicalChoice {
        index: 0,
        message,
        stop_reason: field_str(data, "stop_reason").map(anthropic_stop_to_canonical),
    })
}

/// `{ "input_tokens", "output_tokens", "cache_*" }`; the total is derived.
///
/// # Errors
///
/// Never fails; the signature matches the context table.
pub fn produce_token_usage(data: &Value, _ctx: &SerdeContext) -> Result<CanonicalUsage, ReconcileError> {
    let cached = field_u64(data, "cache_creation_input_tokens")
        .unwrap_or(0)
        .saturating_add(field_u64(data, "cache_read_input_tokens").unwrap_or(0));
    let input_tokens = field_u64(data, "input_tokens").map(|tokens| tokens.saturating_add(cached));
    let output_tokens = field_u64(data, "output_tokens");
    let total_tokens = match (input_tokens, output_tokens) {
        (Some(input), Some(output)) => Some(input.saturating_add(output)),
        _ => None,
    };
    Ok(CanonicalUsage {
        input_tokens,
        output_tokens,
        total_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::anthropic::ANTHROPIC_CONTEXT;
    use crate::protocol::canonical::CanonicalStopReason;
    use serde_json::json;

    #[test]
    fn test_usage_counts_saturate() {
        let usage = produce_token_usage(
            &json!({
                "input_tokens": u64::MAX,
                "cache_read_input_tokens": 5,
                "cache_creation_input_tokens": u64::MAX,
                "output_tokens": 9
            }),
            &ANTHROPIC_CONTEXT,
        )
        .unwrap();
        assert_eq!(usage.input_tokens, Some(u64::MAX));
        assert_eq!(usage.total_tokens, Some(u64::MAX));
    }

    #[test]
    fn test_tool_use_becomes_tool_call() {
        let choice = produce_response(
            &json!({
                "role": "assistant",
                "stop_reason": "tool_use",
                "content": [
                    {"type": "text", "text": "Let me check."},
                    {"type": "tool_use", "id": "toolu_1", "name": "weather", "input": {"city": "Oslo"}}
                ]
            }),
            &ANTHROPIC_CONTEXT,
        )
        .unwrap();
        assert_eq!(choice.stop_reason, Some(CanonicalStopReason::ToolCalls));
        assert_eq!(choice.message.text(), "Let me check.");
        let calls: Vec<_> = choice.message.tool_calls().collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.arguments, json!({"city": "Oslo"}));
    }

    #[test]
    fn test_thinking_keeps_signature() {
        let content = produce_block(
            &json!({"type": "thinking", "thinking": "hmm", "signature": "EqQB"}),
            &ANTHROPIC_CONTEXT,
        )
        .unwrap();
        let CanonicalContent::Thinking { thinking, metadata } = content else {
            panic!("expected thinking");
        };
        assert_eq!(thinking, "hmm");
        assert_eq!(metadata[SIGNATURE_KEY], json!("EqQB"));
    }

    #[test]
    fn test_image_sources() {
        let url = produce_block(
            &json!({"type": "image", "source": {"type": "url", "url": "https://x/cat.png"}}),
            &ANTHROPIC_CONTEXT,
        )
        .unwrap();
        assert!(matches!(url, CanonicalContent::Media(CanonicalMedia::Url { .. })));
        let file = produce_block(
            &json!({"type": "document", "source": {"type": "base64", "media_type": "application/pdf", "data": "JVBE"}}),
            &ANTHROPIC_CONTEXT,
        )
        .unwrap();
        assert_eq!(
            file,
            CanonicalContent::Media(CanonicalMedia::File {
                media_type: "application/pdf".to_string(),
                data: "JVBE".to_string(),
            })
        );
    }

    #[test]
    fn test_usage_adds_cache_tokens() {
        let usage = produce_token_usage(
            &json!({"input_tokens": 10, "cache_read_input_tokens": 5, "output_tokens": 2}),
            &ANTHROPIC_CONTEXT,
        )
        .unwrap();
        assert_eq!(usage.input_tokens, Some(15));
        assert_eq!(usage.total_tokens, Some(17));
    }

    #[test]
    fn test_unknown_block_is_soft() {
        let err = produce_block(&json!({"type": "server_tool_use"}), &ANTHROPIC_CONTEXT).unwrap_err();
        assert!(err.is_soft());
    }
}
