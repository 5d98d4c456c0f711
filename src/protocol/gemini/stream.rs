use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::decoder::is_thought;
use super::response_decoder::decode_gemini_response;
use super::{GeminiErrorBody, GEMINI_CONTEXT};
use crate::error::ReconcileError;
use crate::protocol::canonical::CanonicalPayload;
use crate::protocol::context::SerdeContext;
use crate::stream::{Delta, IncompletePolicy, Reconciler, StreamStats, StreamUnit};

const PROVIDER: &str = "gemini";

fn text_of(part: &Value) -> Option<&str> {
    part.get("text").and_then(Value::as_str)
}

fn part_delta(part: &Value) -> Option<Delta> {
    let text = text_of(part).filter(|text| !text.is_empty())?;
    Some(if is_thought(part) {
        Delta::from_thinking(text)
    } else {
        Delta::from_text(text)
    })
}

/// Folds the deltas one candidate produced for one unit into a single
/// notification.
fn coalesce(deltas: Vec<Delta>) -> Option<Delta> {
    let mut out = Delta::default();
    for delta in deltas {
        for (target, piece) in [(&mut out.text, delta.text), (&mut out.thinking, delta.thinking)] {
            if let Some(piece) = piece {
                target.get_or_insert_with(String::new).push_str(&piece);
            }
        }
    }
    (out != Delta::default()).then_some(out)
}

/// Reconciles a Gemini `streamGenerateContent?alt=sse` stream.
///
/// Each unit is a partial response. Candidates are tracked by index; an
/// incoming text part is appended to the candidate's last part when both are
/// text of the same kind, and pushed as a new part otherwise. Each unit
/// yields at most one [`Delta`] per candidate.
#[derive(Debug)]
pub struct GeminiReconciler<'a> {
    ctx: &'a SerdeContext,
    candidates: BTreeMap<usize, Map<String, Value>>,
    top: Map<String, Value>,
    terminated: bool,
    stats: StreamStats,
    finished: Option<CanonicalPayload>,
}

impl GeminiReconciler<'static> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_context(&GEMINI_CONTEXT)
    }
}

impl Default for GeminiReconciler<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> GeminiReconciler<'a> {
    #[must_use]
    pub fn with_context(ctx: &'a SerdeContext) -> Self {
        Self {
            ctx,
            candidates: BTreeMap::new(),
            top: Map::new(),
            terminated: false,
            stats: StreamStats::default(),
            finished: None,
        }
    }

    /// Gemini has no open/close framing; every policy yields the same
    /// payload.
    #[must_use]
    pub fn with_policy(self, _policy: IncompletePolicy) -> Self {
        self
    }

    fn merge_candidate(
        &mut self,
        position: usize,
        candidate: Value,
        sink: &mut dyn FnMut(Delta),
    ) -> Result<(), ReconcileError> {
        let Value::Object(incoming) = candidate else {
            return Err(ReconcileError::malformed("data", "candidate is not an object"));
        };
        let index = match incoming.get("index") {
            None => position,
            Some(index) => index
                .as_u64()
                .and_then(|index| usize::try_from(index).ok())
                .ok_or_else(|| ReconcileError::malformed("data", "candidate index is not an integer"))?,
        };
        let Some(existing) = self.candidates.get_mut(&index) else {
            let deltas: Vec<Delta> = incoming
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
                .map(|parts| parts.iter().filter_map(part_delta).collect())
                .unwrap_or_default();
            self.candidates.insert(index, incoming);
            if let Some(delta) = coalesce(deltas) {
                self.stats.emit(sink, delta);
            }
            return Ok(());
        };

        let mut deltas = Vec::new();
        for (key, value) in incoming {
            if key != "content" {
                existing.insert(key, value);
                continue;
            }
            let Value::Object(content) = value else {
                return Err(ReconcileError::malformed("data", "candidate content is not an object"));
            };
            let target = existing
                .entry("content")
                .or_insert_with(|| Value::Object(Map::new()));
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            let Value::Object(target) = target else {
                continue;
            };
            for (field, value) in content {
                if field != "parts" {
                    target.entry(field).or_insert(value);
                    continue;
                }
                let Value::Array(parts) = value else {
                    return Err(ReconcileError::malformed("data", "content parts is not an array"));
                };
                let existing_parts = target
                    .entry("parts")
                    .or_insert_with(|| Value::Array(Vec::new()));
                if !existing_parts.is_array() {
                    *existing_parts = Value::Array(Vec::new());
                }
                if let Value::Array(existing_parts) = existing_parts {
                    append_parts(existing_parts, parts, &mut deltas);
                }
            }
        }
        if let Some(delta) = coalesce(deltas) {
            self.stats.emit(sink, delta);
        }
        Ok(())
    }

    fn assemble(&self) -> Value {
        let candidates: Vec<Value> = self
            .candidates
            .iter()
            .map(|(index, candidate)| {
                let mut candidate = candidate.clone();
                candidate
                    .entry("index")
                    .or_insert_with(|| Value::from(*index));
                Value::Object(candidate)
            })
            .collect();
        let mut document = self.top.clone();
        document.insert("candidates".to_string(), Value::Array(candidates));
        Value::Object(document)
    }
}

/// Only the last existing part is considered for concatenation; a text part
/// that follows a function call starts a new part even if earlier parts were
/// text.
fn append_parts(existing: &mut Vec<Value>, incoming: Vec<Value>, deltas: &mut Vec<Delta>) {
    for part in incoming {
        let delta = part_delta(&part);
        let mergeable = match (existing.last(), text_of(&part)) {
            (Some(last), Some(_)) => text_of(last).is_some() && is_thought(last) == is_thought(&part),
            _ => false,
        };
        if !mergeable {
            existing.push(part);
            deltas.extend(delta);
            continue;
        }
        let (Some(Value::Object(last)), Value::Object(part)) = (existing.last_mut(), part) else {
            continue;
        };
        for (key, value) in part {
            if key == "text" {
                if let (Some(Value::String(text)), Value::String(fragment)) =
                    (last.get_mut("text"), &value)
                {
                    text.push_str(fragment);
                    continue;
                }
            }
            last.insert(key, value);
        }
        deltas.extend(delta);
    }
}

impl Reconciler for GeminiReconciler<'_> {
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

        let chunk: Map<String, Value> = unit.parse()?;
        if let Some(error) = chunk.get("error").map(GeminiErrorBody::parse) {
            return Err(ReconcileError::Upstream(error.describe()));
        }
        if chunk.is_empty() {
            self.stats.ignore(PROVIDER, unit, "empty chunk");
            return Ok(());
        }

        for (key, value) in chunk {
            if key != "candidates" {
                self.top.insert(key, value);
                continue;
            }
            let Value::Array(candidates) = value else {
                return Err(ReconcileError::malformed("data", "candidates is not an array"));
            };
            for (position, candidate) in candidates.into_iter().enumerate() {
                self.merge_candidate(position, candidate, sink)?;
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<CanonicalPayload, ReconcileError> {
        if let Some(payload) = &self.finished {
            return Ok(payload.clone());
        }
        let payload = decode_gemini_response(&self.assemble(), self.ctx)?;
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
    use crate::protocol::canonical::CanonicalContent;
    use crate::stream::reconcile;
    use serde_json::json;

    fn fold(chunks: Vec<Value>) -> (CanonicalPayload, Vec<Delta>) {
        let mut deltas = Vec::new();
        let mut reconciler = GeminiReconciler::new();
        let units = chunks.into_iter().map(|chunk| StreamUnit::data(chunk.to_string()));
        let payload = reconcile(&mut reconciler, units, &mut |delta| deltas.push(delta)).unwrap();
        (payload, deltas)
    }

    #[test]
    fn test_text_after_function_call_starts_new_part() {
        let (payload, deltas) = fold(vec![
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "Hi "}]}}]}),
            json!({"candidates": [{"content": {"parts": [{"functionCall": {"name": "f", "args": {}}}]}}]}),
            json!({"candidates": [{"content": {"parts": [{"text": "there"}]}, "finishReason": "STOP"}]}),
        ]);
        let message = payload.message().unwrap();
        assert_eq!(message.content.len(), 3);
        assert_eq!(message.content[0], CanonicalContent::text("Hi "));
        assert!(matches!(message.content[1], CanonicalContent::ToolCall(_)));
        assert_eq!(message.content[2], CanonicalContent::text("there"));
        assert_eq!(deltas, vec![Delta::from_text("Hi "), Delta::from_text("there")]);
    }

    #[test]
    fn test_thought_parts_do_not_merge_into_text() {
        let (payload, deltas) = fold(vec![
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "plan", "thought": true}]}}]}),
            json!({"candidates": [{"content": {"parts": [{"text": " more", "thought": true}]}}]}),
            json!({"candidates": [{"content": {"parts": [{"text": "Answer"}]}}]}),
        ]);
        let message = payload.message().unwrap();
        assert_eq!(message.thinking().as_deref(), Some("plan more"));
        assert_eq!(message.text(), "Answer");
        assert_eq!(
            deltas,
            vec![
                Delta::from_thinking("plan"),
                Delta::from_thinking(" more"),
                Delta::from_text("Answer"),
            ]
        );
    }

    #[test]
    fn test_usage_last_write_wins() {
        let (payload, _) = fold(vec![
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "a"}]}}], "usageMetadata": {"promptTokenCount": 3}}),
            json!({"candidates": [{"content": {"parts": [{"text": "b"}]}}], "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2, "totalTokenCount": 5}}),
        ]);
        assert_eq!(payload.text(), "ab");
        assert_eq!(payload.usage.and_then(|u| u.total_tokens), Some(5));
    }

    #[test]
    fn test_sparse_candidate_indices() {
        let (payload, _) = fold(vec![
            json!({"candidates": [{"index": 2, "content": {"role": "model", "parts": [{"text": "two"}]}}]}),
            json!({"candidates": [{"index": 0, "content": {"role": "model", "parts": [{"text": "zero"}]}}]}),
        ]);
        let indices: Vec<usize> = payload.choices.iter().map(|choice| choice.index).collect();
        assert_eq!(indices, vec![0, 2]);
        assert_eq!(payload.choice(2).unwrap().message.text(), "two");
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_huge_candidate_index_does_not_allocate_slots() {
        let (payload, deltas) = fold(vec![
            json!({"candidates": [{"index": u64::MAX, "content": {"role": "model", "parts": [{"text": "far"}]}}]}),
            json!({"candidates": [{"index": 1_u64 << 40, "content": {"role": "model", "parts": [{"text": "away"}]}}]}),
        ]);
        assert_eq!(payload.choices.len(), 2);
        assert_eq!(payload.choices[0].message.text(), "away");
        assert_eq!(payload.choices[1].index, usize::MAX);
        assert_eq!(deltas.len(), 2);
    }

    #[test]
    fn test_one_delta_per_unit_for_several_parts() {
        let (payload, deltas) = fold(vec![
            json!({"candidates": [{"content": {"role": "model", "parts": [
                {"text": "plan", "thought": true},
                {"text": "Hello"},
                {"functionCall": {"name": "f", "args": {}}},
                {"text": " world"}
            ]}}]}),
            json!({"candidates": [{"content": {"parts": [{"text": "!"}, {"text": "?"}]}}]}),
        ]);
        assert_eq!(
            deltas,
            vec![
                Delta {
                    text: Some("Hello world".to_string()),
                    thinking: Some("plan".to_string()),
                },
                Delta::from_text("!?"),
            ]
        );
        assert_eq!(payload.message().unwrap().text(), "Hello\n world!?");
    }

    #[test]
    fn test_in_band_error_is_upstream() {
        let mut reconciler = GeminiReconciler::new();
        let err = reconciler
            .accept(
                &StreamUnit::data(json!({"error": {"code": 500, "message": "internal"}}).to_string()),
                &mut |_| {},
            )
            .unwrap_err();
        assert_eq!(err, ReconcileError::Upstream("500: internal".to_string()));
    }
}
