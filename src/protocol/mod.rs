pub mod anthropic;
pub mod canonical;
pub mod codec;
pub mod context;
pub mod gemini;
pub mod llama;
pub mod mapping;

use serde_json::Value;

use crate::error::ReconcileError;
use crate::stream::{IncompletePolicy, Reconciler};
use canonical::{CanonicalPayload, ProviderKind};
use context::SerdeContext;

impl ProviderKind {
    /// The vendor's static serialization context.
    #[must_use]
    pub fn context(self) -> &'static SerdeContext {
        match self {
            ProviderKind::Anthropic => &anthropic::ANTHROPIC_CONTEXT,
            ProviderKind::Gemini => &gemini::GEMINI_CONTEXT,
            ProviderKind::Llama => &llama::LLAMA_CONTEXT,
        }
    }

    /// Decode a complete non-streaming response document.
    ///
    /// # Errors
    ///
    /// See the vendor's `response_decoder`.
    pub fn decode_response(self, response: &Value) -> Result<CanonicalPayload, ReconcileError> {
        let ctx = self.context();
        match self {
            ProviderKind::Anthropic => {
                anthropic::response_decoder::decode_anthropic_response(response, ctx)
            }
            ProviderKind::Gemini => gemini::response_decoder::decode_gemini_response(response, ctx),
            ProviderKind::Llama => llama::response_decoder::decode_llama_response(response, ctx),
        }
    }

    /// Write a canonical payload back in the vendor's response shape.
    #[must_use]
    pub fn encode_response(self, payload: &CanonicalPayload) -> Value {
        let ctx = self.context();
        match self {
            ProviderKind::Anthropic => {
                anthropic::response_encoder::encode_anthropic_response(payload, ctx)
            }
            ProviderKind::Gemini => gemini::response_encoder::encode_gemini_response(payload, ctx),
            ProviderKind::Llama => llama::response_encoder::encode_llama_response(payload, ctx),
        }
    }

    /// A fresh reconciler for one streamed response.
    #[must_use]
    pub fn reconciler(self, policy: IncompletePolicy) -> Box<dyn Reconciler + Send> {
        match self {
            ProviderKind::Anthropic => {
                Box::new(anthropic::stream::AnthropicReconciler::new().with_policy(policy))
            }
            ProviderKind::Gemini => {
                Box::new(gemini::stream::GeminiReconciler::new().with_policy(policy))
            }
            ProviderKind::Llama => Box::new(llama::stream::LlamaReconciler::new().with_policy(policy)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::context::ContentKind;

    #[test]
    fn test_every_provider_overrides_choice_and_usage() {
        for provider in ProviderKind::ALL {
            let ctx = provider.context();
            assert_eq!(ctx.name, provider.as_str());
            assert!(ctx.lookup(ContentKind::Choice).produce);
            assert!(ctx.lookup(ContentKind::Usage).reduce);
        }
    }

    #[test]
    fn test_fresh_reconciler_is_not_terminated() {
        for provider in ProviderKind::ALL {
            let reconciler = provider.reconciler(IncompletePolicy::Strict);
            assert!(!reconciler.is_terminated());
            assert_eq!(reconciler.stats().units, 0);
        }
    }
}
