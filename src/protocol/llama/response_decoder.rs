use serde_json::Value;

use super::describe_error;
use crate::error::ReconcileError;
use crate::protocol::canonical::CanonicalPayload;
use crate::protocol::codec::{produce_choice, produce_usage};
use crate::protocol::context::SerdeContext;

/// Decode a Llama API chat completion document into canonical form.
///
/// # Errors
///
/// Returns [`ReconcileError::Upstream`] for an error document,
/// [`ReconcileError::MalformedEvent`] when a tool call's argument string is
/// not valid JSON, and [`ReconcileError::Translation`] when
/// `completion_message` is missing.
pub fn decode_llama_response(
    response: &Value,
    ctx: &SerdeContext,
) -> Result<CanonicalPayload, ReconcileError> {
    if let Some(error) = response.get("error") {
        return Err(ReconcileError::Upstream(describe_error(error)));
    }

    let mut payload = CanonicalPayload::new();
    payload.merge_choice(produce_choice(response, ctx)?);

    // --- metrics ---
    if let Some(metrics) = response.get("metrics").filter(|metrics| metrics.is_array()) {
        let usage = produce_usage(metrics, ctx)?;
        if !usage.is_empty() {
            payload.merge_usage(&usage);
        }
    }
    Ok(payload)
}
