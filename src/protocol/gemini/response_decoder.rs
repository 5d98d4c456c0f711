use serde_json::Value;

use super::GeminiErrorBody;
use crate::error::ReconcileError;
use crate::protocol::canonical::CanonicalPayload;
use crate::protocol::codec::{field_array, produce_choice, produce_usage};
use crate::protocol::context::SerdeContext;

/// Decode a Gemini `generateContent` response document into canonical form.
///
/// A candidate without an `index` takes its position in `candidates`.
///
/// # Errors
///
/// Returns [`ReconcileError::Upstream`] for an error document and
/// [`ReconcileError`] when a candidate cannot be translated.
pub fn decode_gemini_response(
    response: &Value,
    ctx: &SerdeContext,
) -> Result<CanonicalPayload, ReconcileError> {
    if let Some(error) = response.get("error").map(GeminiErrorBody::parse) {
        return Err(ReconcileError::Upstream(error.describe()));
    }
    if !response.is_object() {
        return Err(ReconcileError::translation("Gemini response must be a JSON object"));
    }

    // --- candidates ---
    let mut payload = CanonicalPayload::new();
    for (position, candidate) in field_array(response, "candidates").iter().enumerate() {
        let mut choice = produce_choice(candidate, ctx)?;
        if candidate.get("index").is_none() {
            choice.index = position;
        }
        payload.merge_choice(choice);
    }

    // --- usage ---
    if let Some(usage) = response.get("usageMetadata").filter(|usage| usage.is_object()) {
        payload.merge_usage(&produce_usage(usage, ctx)?);
    }
    Ok(payload)
}
