use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::response_decoder::decode_anthropic_response;
use super::{AnthropicDelta, AnthropicStreamEvent, ANTHROPIC_CONTEXT};
use crate::error::ReconcileError;
use crate::protocol::canonical::CanonicalPayload;
use crate::protocol::context::SerdeContext;
use crate::stream::{
    ArgumentBuffer, Delta, IncompletePolicy, Reconciler, StreamStats, StreamUnit,
};

const PROVIDER: &str = "anthropic";

/// One content block slot.
#[derive(Debug, Clone)]
struct BlockSlot {
    block: Map<String, Value>,
    /// Created on the first `input_json_delta`.
    arguments: Option<ArgumentBuffer>,
    open: bool,
}

fn append_str(block: &mut Map<String, Value>, key: &str, fragment: &str) {
    match block.get_mut(key) {
        Some(Value::String(existing)) => existing.push_str(fragment),
        _ => {
            block.insert(key.to_string(), Value::String(fragment.to_string()));
        }
    }
}

/// Reconciles an Anthropic Messages stream.
///
/// Blocks live in a sparse table keyed by the event's `index` and are
/// emitted in index order. Tool arguments are buffered per block and parsed
/// only at `content_block_stop`.
#[derive(Debug)]
pub struct AnthropicReconciler<'a> {
    ctx: &'a SerdeContext,
    policy: IncompletePolicy,
    message: Map<String, Value>,
    blocks: BTreeMap<usize, BlockSlot>,
    terminated: bool,
    stats: StreamStats,
    finished: Option<CanonicalPayload>,
}

impl AnthropicReconciler<'static> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_context(&ANTHROPIC_CONTEXT)
    }
}

impl Default for AnthropicReconciler<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> AnthropicReconciler<'a> {
    #[must_use]
    pub fn with_context(ctx: &'a SerdeContext) -> Self {
        let mut message = Map::new();
        message.insert("role".to_string(), Value::String("assistant".to_string()));
        Self {
            ctx,
            policy: IncompletePolicy::default(),
            message,
            blocks: BTreeMap::new(),
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

    fn slot_mut(&mut self, index: usize, event: &str) -> Result<&mut BlockSlot, ReconcileError> {
        let slot = self
            .blocks
            .get_mut(&index)
            .ok_or_else(|| {
                ReconcileError::malformed(event, format!("content block {index} was never started"))
            })?;
        if !slot.open {
            return Err(ReconcileError::malformed(
                event,
                format!("content block {index} is already closed"),
            ));
        }
        Ok(slot)
    }

    fn start_block(
        &mut self,
        index: usize,
        block: Map<String, Value>,
        sink: &mut dyn FnMut(Delta),
    ) {
        if self.blocks.contains_key(&index) {
            tracing::debug!(provider = PROVIDER, index, "content block restarted");
        }

        let initial = match block.get("type").and_then(Value::as_str) {
            Some("text") => block
                .get("text")
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
                .map(Delta::from_text),
            Some("thinking") => block
                .get("thinking")
                .and_then(Value::as_str)
                .filter(|thinking| !thinking.is_empty())
                .map(Delta::from_thinking),
            _ => None,
        };
        self.blocks.insert(
            index,
            BlockSlot {
                block,
                arguments: None,
                open: true,
            },
        );
        if let Some(delta) = initial {
            self.stats.emit(sink, delta);
        }
    }

    fn apply_delta(
        &mut self,
        index: usize,
        delta: AnthropicDelta,
        unit: &StreamUnit,
        sink: &mut dyn FnMut(Delta),
    ) -> Result<(), ReconcileError> {
        const EVENT: &str = "content_block_delta";
        if let AnthropicDelta::Unknown = delta {
            self.stats.ignore(PROVIDER, unit, "unknown delta type");
            return Ok(());
        }
        let slot = self.slot_mut(index, EVENT)?;
        let emitted = match delta {
            AnthropicDelta::TextDelta { text } => {
                append_str(&mut slot.block, "text", &text);
                (!text.is_empty()).then(|| Delta::from_text(text))
            }
            AnthropicDelta::ThinkingDelta { thinking } => {
                append_str(&mut slot.block, "thinking", &thinking);
                (!thinking.is_empty()).then(|| Delta::from_thinking(thinking))
            }
            AnthropicDelta::SignatureDelta { signature } => {
                append_str(&mut slot.block, "signature", &signature);
                None
            }
            AnthropicDelta::InputJsonDelta { partial_json } => {
                slot.arguments
                    .get_or_insert_with(ArgumentBuffer::default)
                    .push_fragment(&partial_json, EVENT)?;
                None
            }
            AnthropicDelta::Unknown => None,
        };
        if let Some(delta) = emitted {
            self.stats.emit(sink, delta);
        }
        Ok(())
    }

    fn stop_block(&mut self, index: usize) -> Result<(), ReconcileError> {
        const EVENT: &str = "content_block_stop";
        let slot = self.slot_mut(index, EVENT)?;
        if let Some(arguments) = slot.arguments.as_mut() {
            let initial = slot.block.get("input").cloned();
            let input = arguments
                .complete(|| initial.unwrap_or_else(|| Value::Object(Map::new())), EVENT)?
                .clone();
            slot.block.insert("input".to_string(), input);
        }
        slot.open = false;
        Ok(())
    }

    fn apply_message_delta(&mut self, delta: Map<String, Value>, usage: Option<Map<String, Value>>) {
        self.message.extend(delta);
        let Some(usage) = usage else {
            return;
        };
        let target = self
            .message
            .entry("usage")
            .or_insert_with(|| Value::Object(Map::new()));
        if !target.is_object() {
            *target = Value::Object(Map::new());
        }
        if let Value::Object(target) = target {
            target.extend(usage.into_iter().filter(|(_, value)| !value.is_null()));
        }
    }

    /// The response document streamed so far, with every block closed.
    fn assemble(&self) -> Result<Value, ReconcileError> {
        let mut content = Vec::with_capacity(self.blocks.len());
        for (&index, slot) in &self.blocks {
            if !slot.open {
                content.push(Value::Object(slot.block.clone()));
                continue;
            }
            if self.policy == IncompletePolicy::Strict {
                return Err(ReconcileError::IncompleteStream(format!(
                    "content block {index} was never closed"
                )));
            }
            let mut block = slot.block.clone();
            if let Some(raw) = slot.arguments.as_ref().and_then(ArgumentBuffer::raw) {
                match serde_json::from_str::<Value>(raw) {
                    Ok(input) => {
                        block.insert("input".to_string(), input);
                    }
                    Err(err) if !raw.trim().is_empty() => {
                        tracing::warn!(
                            provider = PROVIDER,
                            index,
                            error = %err,
                            "dropping open tool_use block with unparseable arguments"
                        );
                        continue;
                    }
                    Err(_) => {}
                }
            }
            content.push(Value::Object(block));
        }

        let mut document = self.message.clone();
        document.insert("content".to_string(), Value::Array(content));
        Ok(Value::Object(document))
    }
}

impl Reconciler for AnthropicReconciler<'_> {
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

        match unit.parse::<AnthropicStreamEvent>()? {
            AnthropicStreamEvent::MessageStart { message } => {
                self.message.extend(message.into_iter().filter(|(key, _)| key != "content"));
            }
            AnthropicStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => self.start_block(index, content_block, sink),
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => {
                self.apply_delta(index, delta, unit, sink)?;
            }
            AnthropicStreamEvent::ContentBlockStop { index } => self.stop_block(index)?,
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                self.apply_message_delta(delta, usage);
            }
            AnthropicStreamEvent::MessageStop => self.terminated = true,
            AnthropicStreamEvent::Ping => {}
            AnthropicStreamEvent::Error { error } => {
                return Err(ReconcileError::Upstream(error.describe()));
            }
            AnthropicStreamEvent::Unknown => {
                self.stats.ignore(PROVIDER, unit, "unknown event type");
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<CanonicalPayload, ReconcileError> {
        if let Some(payload) = &self.finished {
            return Ok(payload.clone());
        }
        let document = self.assemble()?;
        let payload = decode_anthropic_response(&document, self.ctx)?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::CanonicalStopReason;
    use crate::stream::reconcile;
    use serde_json::json;

    fn unit(data: Value) -> StreamUnit {
        let event = data["type"].as_str().unwrap_or_default().to_string();
        StreamUnit::named(event, data.to_string())
    }

    fn fold(units: Vec<StreamUnit>) -> (Result<CanonicalPayload, ReconcileError>, Vec<Delta>) {
        let mut deltas = Vec::new();
        let mut reconciler = AnthropicReconciler::new();
        let result = reconcile(&mut reconciler, units, &mut |delta| deltas.push(delta));
        (result, deltas)
    }

    #[test]
    fn test_out_of_order_index_keeps_index_order() {
        let (result, deltas) = fold(vec![
            unit(json!({"type": "content_block_start", "index": 2, "content_block": {"type": "text", "text": ""}})),
            unit(json!({"type": "content_block_delta", "index": 2, "delta": {"type": "text_delta", "text": "late"}})),
            unit(json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": "early"}})),
            unit(json!({"type": "content_block_stop", "index": 0})),
            unit(json!({"type": "content_block_stop", "index": 2})),
            unit(json!({"type": "message_stop"})),
        ]);
        let payload = result.unwrap();
        assert_eq!(
            payload.message().unwrap().content,
            vec![
                crate::protocol::canonical::CanonicalContent::text("early"),
                crate::protocol::canonical::CanonicalContent::text("late"),
            ]
        );
        assert_eq!(deltas, vec![Delta::from_text("late"), Delta::from_text("early")]);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_huge_block_index_is_sparse() {
        let (result, deltas) = fold(vec![
            unit(json!({"type": "content_block_start", "index": u64::MAX, "content_block": {"type": "text", "text": ""}})),
            unit(json!({"type": "content_block_delta", "index": u64::MAX, "delta": {"type": "text_delta", "text": "tail"}})),
            unit(json!({"type": "content_block_stop", "index": u64::MAX})),
            unit(json!({"type": "content_block_start", "index": 1_u64 << 40, "content_block": {"type": "text", "text": "head"}})),
            unit(json!({"type": "content_block_stop", "index": 1_u64 << 40})),
            unit(json!({"type": "message_stop"})),
        ]);
        let payload = result.unwrap();
        assert_eq!(payload.text(), "head\ntail");
        assert_eq!(deltas.len(), 2);
    }

    #[test]
    fn test_delta_before_start_is_malformed() {
        let (result, _) = fold(vec![unit(json!({
            "type": "content_block_delta", "index": 0,
            "delta": {"type": "text_delta", "text": "x"}
        }))]);
        assert!(matches!(result, Err(ReconcileError::MalformedEvent { .. })));
    }

    #[test]
    fn test_empty_argument_buffer_keeps_initial_input() {
        let (result, deltas) = fold(vec![
            unit(json!({"type": "content_block_start", "index": 0, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "now", "input": {}}})),
            unit(json!({"type": "content_block_delta", "index": 0, "delta": {"type": "input_json_delta", "partial_json": ""}})),
            unit(json!({"type": "content_block_stop", "index": 0})),
            unit(json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 3}})),
        ]);
        let payload = result.unwrap();
        let calls: Vec<_> = payload.tool_calls().collect();
        assert_eq!(calls[0].function.arguments, json!({}));
        assert_eq!(payload.choices[0].stop_reason, Some(CanonicalStopReason::ToolCalls));
        assert!(deltas.is_empty());
    }

    #[test]
    fn test_thinking_and_signature() {
        let (result, deltas) = fold(vec![
            unit(json!({"type": "content_block_start", "index": 0, "content_block": {"type": "thinking", "thinking": ""}})),
            unit(json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "Let me think"}})),
            unit(json!({"type": "content_block_delta", "index": 0, "delta": {"type": "signature_delta", "signature": "EqQB"}})),
            unit(json!({"type": "content_block_stop", "index": 0})),
        ]);
        let payload = result.unwrap();
        assert_eq!(payload.message().unwrap().thinking().as_deref(), Some("Let me think"));
        assert_eq!(deltas, vec![Delta::from_thinking("Let me think")]);
    }

    #[test]
    fn test_error_event_is_upstream() {
        let (result, _) = fold(vec![unit(json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        }))]);
        assert_eq!(
            result.unwrap_err(),
            ReconcileError::Upstream("overloaded_error: Overloaded".to_string())
        );
    }

    #[test]
    fn test_ping_and_unknown_events() {
        let mut reconciler = AnthropicReconciler::new();
        let mut sink = |_delta: Delta| {};
        reconciler.accept(&unit(json!({"type": "ping"})), &mut sink).unwrap();
        reconciler
            .accept(&unit(json!({"type": "citations_start", "index": 0})), &mut sink)
            .unwrap();
        let stats = reconciler.stats();
        assert_eq!(stats.units, 2);
        assert_eq!(stats.ignored, 1);
    }

    #[test]
    fn test_delta_after_stop_is_malformed() {
        let (result, _) = fold(vec![
            unit(json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}})),
            unit(json!({"type": "content_block_stop", "index": 0})),
            unit(json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "x"}})),
        ]);
        assert!(matches!(result, Err(ReconcileError::MalformedEvent { .. })));
    }
}
