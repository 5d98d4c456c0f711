use serde_json::{Map, Value};

use crate::protocol::canonical::{CanonicalChoice, CanonicalMessage, CanonicalPayload, CanonicalRole};
use crate::protocol::codec::{reduce_choice, reduce_usage};
use crate::protocol::context::SerdeContext;

/// Encode a canonical payload as an Anthropic Messages API response.
///
/// Anthropic has a single choice; only the lowest-indexed one is written.
#[must_use]
pub fn encode_anthropic_response(payload: &CanonicalPayload, ctx: &SerdeContext) -> Value {
    let empty;
    let choice = match payload.choices.first() {
        Some(choice) => choice,
        None => {
            empty = CanonicalChoice::new(0, CanonicalMessage::new(CanonicalRole::Assistant));
            &empty
        }
    };

    let mut out = Map::new();
    out.insert("type".to_string(), Value::String("message".to_string()));
    if let Value::Object(fields) = reduce_choice(choice, ctx) {
        out.extend(fields);
    }
    if let Some(usage) = &payload.usage {
        out.insert("usage".to_string(), reduce_usage(usage, ctx));
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::anthropic::response_decoder::decode_anthropic_response;
    use crate::protocol::anthropic::ANTHROPIC_CONTEXT;
    use crate::protocol::canonical::{CanonicalContent, CanonicalStopReason, CanonicalToolCall, CanonicalUsage};
    use serde_json::json;

    #[test]
    fn test_encode_then_decode_keeps_payload() {
        let mut message = CanonicalMessage::new(CanonicalRole::Assistant);
        message.content.push(CanonicalContent::text("Sure."));
        message.push_tool_call(CanonicalToolCall::new("toolu_9", "lookup", json!({"q": "rust"})));
        let mut choice = CanonicalChoice::new(0, message);
        choice.stop_reason = Some(CanonicalStopReason::ToolCalls);
        let mut payload = CanonicalPayload::new();
        payload.merge_choice(choice);
        payload.merge_usage(&CanonicalUsage {
            input_tokens: Some(4),
            output_tokens: Some(6),
            total_tokens: Some(10),
        });

        let wire = encode_anthropic_response(&payload, &ANTHROPIC_CONTEXT);
        assert_eq!(wire["content"][1]["type"], json!("tool_use"));
        assert_eq!(wire["content"][1]["input"], json!({"q": "rust"}));
        assert_eq!(wire["stop_reason"], json!("tool_use"));
        assert_eq!(decode_anthropic_response(&wire, &ANTHROPIC_CONTEXT).unwrap(), payload);
    }
}
