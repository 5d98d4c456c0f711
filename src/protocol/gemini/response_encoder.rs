use serde_json::{Map, Value};

use crate::protocol::canonical::CanonicalPayload;
use crate::protocol::codec::{reduce_choice, reduce_usage};
use crate::protocol::context::SerdeContext;

/// Encode a canonical payload as a Gemini `generateContent` response.
#[must_use]
pub fn encode_gemini_response(payload: &CanonicalPayload, ctx: &SerdeContext) -> Value {
    let candidates: Vec<Value> = payload
        .choices
        .iter()
        .map(|choice| reduce_choice(choice, ctx))
        .collect();
    let mut out = Map::new();
    out.insert("candidates".to_string(), Value::Array(candidates));
    if let Some(usage) = &payload.usage {
        out.insert("usageMetadata".to_string(), reduce_usage(usage, ctx));
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::{
        CanonicalChoice, CanonicalContent, CanonicalMedia, CanonicalMessage, CanonicalRole,
        CanonicalToolCall,
    };
    use crate::protocol::gemini::response_decoder::decode_gemini_response;
    use crate::protocol::gemini::GEMINI_CONTEXT;
    use serde_json::json;

    #[test]
    fn test_encode_then_decode_keeps_payload() {
        let mut message = CanonicalMessage::new(CanonicalRole::Assistant);
        message.content.push(CanonicalContent::thinking("plan"));
        message.content.push(CanonicalContent::text("Here:"));
        message.content.push(CanonicalContent::Media(CanonicalMedia::File {
            media_type: "image/png".to_string(),
            data: "iVBO".to_string(),
        }));
        message.push_tool_call(CanonicalToolCall::new("call_7", "search", json!({"q": "gemini"})));
        let mut payload = CanonicalPayload::new();
        payload.merge_choice(CanonicalChoice::new(3, message));

        let wire = encode_gemini_response(&payload, &GEMINI_CONTEXT);
        let parts = &wire["candidates"][0]["content"]["parts"];
        assert_eq!(parts[0], json!({"text": "plan", "thought": true}));
        assert_eq!(parts[3]["functionCall"]["id"], json!("call_7"));
        assert_eq!(wire["candidates"][0]["index"], json!(3));
        assert_eq!(decode_gemini_response(&wire, &GEMINI_CONTEXT).unwrap(), payload);
    }
}
