use serde_json::{json, Map, Value};

use super::response_decoder::decode_llama_response;
use super::{describe_error, LlamaDelta, LlamaStreamChunk, LLAMA_CONTEXT};
use crate::error::ReconcileError;
use crate::protocol::canonical::CanonicalPayload;
use crate::protocol::codec::parse_arguments_text;
use crate::protocol::context::SerdeContext;
use crate::stream::{ArgumentBuffer, Delta, IncompletePolicy, Reconciler, StreamStats, StreamUnit};

const PROVIDER: &str = "llama";

#[derive(Debug, Clone)]
struct ToolCallSlot {
    id: String,
    name: String,
    arguments: ArgumentBuffer,
}

/// Reconciles a Llama API chat completion stream.
///
/// Text accumulates into one buffer. Tool calls open with a delta carrying
/// an `id`; later fragments without an `id` extend the most recent call.
/// The family has no block stop: the end of input closes every call, and
/// argument strings are parsed then.
#[derive(Debug)]
pub struct LlamaReconciler<'a> {
    ctx: &'a SerdeContext,
    policy: IncompletePolicy,
    text: Option<String>,
    reasoning: String,
    tool_calls: Vec<ToolCallSlot>,
    metrics: Option<Vec<Value>>,
    stop_reason: Option<String>,
    /// `[DONE]` arrived; metrics may still follow `complete`.
    terminated: bool,
    stats: StreamStats,
    finished: Option<CanonicalPayload>,
}

impl LlamaReconciler<'static> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_context(&LLAMA_CONTEXT)
    }
}

impl Default for LlamaReconciler<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> LlamaReconciler<'a> {
    #[must_use]
    pub fn with_context(ctx: &'a SerdeContext) -> Self {
        Self {
            ctx,
            policy: IncompletePolicy::default(),
            text: None,
            reasoning: String::new(),
            tool_calls: Vec::new(),
            metrics: None,
            stop_reason: None,
            terminated: false,
            stats: StreamStats::default(),
            finished: None,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: IncompletePolicy) -> Self {
        self.policy = policy;
        self
    }

    fn apply_delta(
        &mut self,
        delta: LlamaDelta,
        unit: &StreamUnit,
        sink: &mut dyn FnMut(Delta),
    ) -> Result<(), ReconcileError> {
        const EVENT: &str = "progress";
        match delta {
            LlamaDelta::Text { text } => {
                if text.is_empty() {
                    return Ok(());
                }
                match self.text.as_mut() {
                    Some(existing) => existing.push_str(&text),
                    None => self.text = Some(text.clone()),
                }
                self.stats.emit(sink, Delta::from_text(text));
            }
            LlamaDelta::Reasoning { reasoning } => {
                if reasoning.is_empty() {
                    return Ok(());
                }
                self.reasoning.push_str(&reasoning);
                self.stats.emit(sink, Delta::from_thinking(reasoning));
            }
            LlamaDelta::ToolCall {
                id: Some(id),
                function,
            } => {
                let mut arguments = ArgumentBuffer::default();
                arguments.push_fragment(&function.arguments, EVENT)?;
                self.tool_calls.push(ToolCallSlot {
                    id,
                    name: function.name.unwrap_or_default(),
                    arguments,
                });
            }
            LlamaDelta::ToolCall { id: None, function } => {
                let slot = self.tool_calls.last_mut().ok_or_else(|| {
                    ReconcileError::malformed(EVENT, "tool call fragment without a started call")
                })?;
                if let Some(name) = function.name.filter(|name| !name.is_empty()) {
                    slot.name = name;
                }
                slot.arguments.push_fragment(&function.arguments, EVENT)?;
            }
            LlamaDelta::Unknown => self.stats.ignore(PROVIDER, unit, "unknown delta type"),
        }
        Ok(())
    }

    /// The non-streaming response document, arguments still as strings.
    ///
    /// Under [`IncompletePolicy::BestEffort`] a call whose arguments do not
    /// parse is dropped; otherwise it fails the fold.
    fn assemble(&self) -> Result<Value, ReconcileError> {
        const EVENT: &str = "end_of_stream";
        let mut tool_calls = Vec::with_capacity(self.tool_calls.len());
        for slot in &self.tool_calls {
            let raw = slot.arguments.raw().unwrap_or_default();
            if let Err(err) = parse_arguments_text(raw, EVENT) {
                if self.policy == IncompletePolicy::Strict {
                    return Err(err);
                }
                tracing::warn!(
                    provider = PROVIDER,
                    id = %slot.id,
                    error = %err,
                    "dropping tool call with unparseable arguments"
                );
                continue;
            }
            tool_calls.push(json!({
                "id": slot.id,
                "function": { "name": slot.name, "arguments": raw },
            }));
        }

        let mut content = Vec::new();
        if !self.reasoning.is_empty() {
            content.push(json!({ "type": "reasoning", "reasoning": self.reasoning }));
        }
        if let Some(text) = &self.text {
            content.push(json!({ "type": "text", "text": text }));
        }

        let mut completion = Map::new();
        completion.insert("role".to_string(), Value::String("assistant".to_string()));
        completion.insert("content".to_string(), Value::Array(content));
        completion.insert("tool_calls".to_string(), Value::Array(tool_calls));
        if let Some(reason) = &self.stop_reason {
            completion.insert("stop_reason".to_string(), Value::String(reason.clone()));
        }

        let mut document = Map::new();
        document.insert("completion_message".to_string(), Value::Object(completion));
        if let Some(metrics) = &self.metrics {
            document.insert("metrics".to_string(), Value::Array(metrics.clone()));
        }
        Ok(Value::Object(document))
    }
}

impl Reconciler for LlamaReconciler<'_> {
    fn accept(
        &mut self,
        unit: &StreamUnit,
        sink: &mut dyn FnMut(Delta),
    ) -> Result<(), ReconcileError> {
        if self.finished.is_some() {
            return Err(ReconcileError::Finished);
        }
        self.stats.units += 1;
        if unit.is_done() {
            self.terminated = true;
            return Ok(());
        }

        let chunk: LlamaStreamChunk = unit.parse()?;
        if let Some(error) = &chunk.error {
            return Err(ReconcileError::Upstream(describe_error(error)));
        }
        let Some(event) = chunk.event else {
            self.stats.ignore(PROVIDER, unit, "chunk without event");
            return Ok(());
        };

        if let Some(metrics) = event.metrics {
            self.metrics = Some(metrics);
        }
        if let Some(delta) = event.delta {
            self.apply_delta(delta, unit, sink)?;
        }
        if let Some(reason) = event.stop_reason {
            self.stop_reason = Some(reason);
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<CanonicalPayload, ReconcileError> {
        if let Some(payload) = &self.finished {
            return Ok(payload.clone());
        }
        let document = self.assemble()?;
        let payload = decode_llama_response(&document, self.ctx)?;
        self.finished = Some(payload.clone());
        Ok(payload)
    }

    fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn stats(&self) -> StreamStats {
        self.stats
    }
}
