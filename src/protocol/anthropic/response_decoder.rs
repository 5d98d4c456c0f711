use serde_json::Value;

use super::AnthropicErrorBody;
use crate::error::ReconcileError;
use crate::protocol::canonical::CanonicalPayload;
use crate::protocol::codec::{field_str, produce_choice, produce_usage};
use crate::protocol::context::SerdeContext;

/// Decode an Anthropic Messages API response document into canonical form.
///
/// The streaming reconciler assembles the same document and calls this.
///
/// # Errors
///
/// Returns [`ReconcileError::Upstream`] for an error document and
/// [`ReconcileError`] when a content block cannot be translated.
pub fn decode_anthropic_response(
    response: &Value,
    ctx: &SerdeContext,
) -> Result<CanonicalPayload, ReconcileError> {
    if field_str(response, "type") == Some("error") {
        let body: AnthropicErrorBody = response
            .get("error")
            .and_then(|error| serde_json::from_value(error.clone()).ok())
            .unwrap_or_default();
        return Err(ReconcileError::Upstream(body.describe()));
    }
    if !response.is_object() {
        return Err(ReconcileError::translation("Anthropic response must be a JSON object"));
    }

    let mut payload = CanonicalPayload::new();
    payload.merge_choice(produce_choice(response, ctx)?);

    // --- usage ---
    if let Some(usage) = response.get("usage").filter(|usage| usage.is_object()) {
        payload.merge_usage(&produce_usage(usage, ctx)?);
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::anthropic::ANTHROPIC_CONTEXT;
    use crate::protocol::canonical::CanonicalStopReason;
    use serde_json::json;

    #[test]
    fn test_decode_text_response() {
        let payload = decode_anthropic_response(
            &json!({
                "id": "msg_1",
                "type": "message",
                "role": "assistant",
                "model": "claude-sonnet-4",
                "content": [{"type": "text", "text": "Hello"}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 5, "output_tokens": 1}
            }),
            &ANTHROPIC_CONTEXT,
        )
        .unwrap();
        assert_eq!(payload.text(), "Hello");
        assert_eq!(payload.choices[0].stop_reason, Some(CanonicalStopReason::EndOfTurn));
        assert_eq!(payload.usage.and_then(|u| u.total_tokens), Some(6));
    }

    #[test]
    fn test_error_document_is_upstream() {
        let err = decode_anthropic_response(
            &json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
            &ANTHROPIC_CONTEXT,
        )
        .unwrap_err();
        assert_eq!(err, ReconcileError::Upstream("overloaded_error: Overloaded".to_string()));
    }
}
