use serde_json::{Map, Value};

use crate::protocol::canonical::{CanonicalChoice, CanonicalMessage, CanonicalPayload, CanonicalRole};
use crate::protocol::codec::{reduce_choice, reduce_usage};
use crate::protocol::context::SerdeContext;

/// Encode a canonical payload as a Llama API chat completion.
///
/// Only the lowest-indexed choice is written.
#[must_use]
pub fn encode_llama_response(payload: &CanonicalPayload, ctx: &SerdeContext) -> Value {
    let empty;
    let choice = match payload.choices.first() {
        Some(choice) => choice,
        None => {
            empty = CanonicalChoice::new(0, CanonicalMessage::new(CanonicalRole::Assistant));
            &empty
        }
    };

    let mut out = Map::new();
    if let Value::Object(fields) = reduce_choice(choice, ctx) {
        out.extend(fields);
    }
    if let Some(usage) = &payload.usage {
        out.insert("metrics".to_string(), reduce_usage(usage, ctx));
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::{
        CanonicalContent, CanonicalStopReason, CanonicalToolCall, CanonicalUsage,
    };
    use crate::protocol::llama::response_decoder::decode_llama_response;
    use crate::protocol::llama::LLAMA_CONTEXT;
    use serde_json::json;

    #[test]
    fn test_encode_writes_string_arguments() {
        let mut message = CanonicalMessage::new(CanonicalRole::Assistant);
        message.content.push(CanonicalContent::text("On it."));
        message.push_tool_call(CanonicalToolCall::new("call_2", "get_time", json!({"tz": "UTC"})));
        let mut choice = CanonicalChoice::new(0, message);
        choice.stop_reason = Some(CanonicalStopReason::ToolCalls);
        let mut payload = CanonicalPayload::new();
        payload.merge_choice(choice);
        payload.merge_usage(&CanonicalUsage {
            input_tokens: Some(7),
            output_tokens: Some(3),
            total_tokens: Some(10),
        });

        let wire = encode_llama_response(&payload, &LLAMA_CONTEXT);
        let completion = &wire["completion_message"];
        assert_eq!(completion["content"], json!({"type": "text", "text": "On it."}));
        assert_eq!(
            completion["tool_calls"][0]["function"]["arguments"],
            json!("{\"tz\":\"UTC\"}")
        );
        assert_eq!(wire["metrics"].as_array().map(Vec::len), Some(3));
        assert_eq!(decode_llama_response(&wire, &LLAMA_CONTEXT).unwrap(), payload);
    }
}
