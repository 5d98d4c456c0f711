pub mod sse;

pub use sse::{encode_sse_unit, sse_unit_stream, SseTokenizer};

use std::fmt;
use std::str::FromStr;

use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ReconcileError;
use crate::protocol::canonical::CanonicalPayload;

/// One tokenized SSE unit: `(event, data, id)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamUnit {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl StreamUnit {
    /// An unnamed `data:` unit.
    #[must_use]
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
            id: None,
        }
    }

    /// A named unit, as Anthropic sends them.
    #[must_use]
    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
            id: None,
        }
    }

    /// Whether this is the `[DONE]` end-of-stream sentinel.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }

    fn label(&self) -> &str {
        self.event.as_deref().unwrap_or("data")
    }

    /// Parse the unit's JSON payload.
    pub(crate) fn parse<T: DeserializeOwned>(&self) -> Result<T, ReconcileError> {
        serde_json::from_str(&self.data)
            .map_err(|e| ReconcileError::malformed(self.label(), e.to_string()))
    }
}

/// An incremental notification for the caller; never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub text: Option<String>,
    pub thinking: Option<String>,
}

impl Delta {
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            thinking: None,
        }
    }

    #[must_use]
    pub fn from_thinking(thinking: impl Into<String>) -> Self {
        Self {
            text: None,
            thinking: Some(thinking.into()),
        }
    }
}

/// What `finish` does with blocks or buffers that never saw their
/// completion signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncompletePolicy {
    /// Fail: an open block is [`ReconcileError::IncompleteStream`], a
    /// buffer that does not parse is [`ReconcileError::MalformedEvent`].
    #[default]
    Strict,
    /// Keep open text, keep tool calls whose buffer parses, drop the rest.
    BestEffort,
}

impl IncompletePolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            IncompletePolicy::Strict => "strict",
            IncompletePolicy::BestEffort => "best_effort",
        }
    }
}

impl fmt::Display for IncompletePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncompletePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "strict" => Ok(IncompletePolicy::Strict),
            "best_effort" => Ok(IncompletePolicy::BestEffort),
            other => Err(format!("unknown incomplete policy '{other}'")),
        }
    }
}

/// Counters kept by every reconciler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub units: u64,
    pub deltas: u64,
    pub ignored: u64,
}

impl StreamStats {
    pub(crate) fn emit(&mut self, sink: &mut dyn FnMut(Delta), delta: Delta) {
        self.deltas += 1;
        sink(delta);
    }

    pub(crate) fn ignore(&mut self, provider: &str, unit: &StreamUnit, reason: &str) {
        self.ignored += 1;
        tracing::debug!(
            provider,
            event = unit.label(),
            id = unit.id.as_deref().unwrap_or(""),
            reason,
            "ignoring stream unit"
        );
    }
}

/// Tool-call argument text that is only parsed once its completion signal
/// arrives.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentBuffer {
    Buffering(String),
    Parsed(serde_json::Value),
}

impl Default for ArgumentBuffer {
    fn default() -> Self {
        ArgumentBuffer::Buffering(String::new())
    }
}

impl ArgumentBuffer {
    /// Append a raw fragment.
    ///
    /// # Errors
    ///
    /// Fragments after completion are malformed.
    pub fn push_fragment(&mut self, fragment: &str, event: &str) -> Result<(), ReconcileError> {
        match self {
            ArgumentBuffer::Buffering(text) => {
                text.push_str(fragment);
                Ok(())
            }
            ArgumentBuffer::Parsed(_) => Err(ReconcileError::malformed(
                event,
                "argument fragment after the call was completed",
            )),
        }
    }

    /// Parse the buffered text and switch to [`ArgumentBuffer::Parsed`].
    ///
    /// A buffer holding only whitespace completes to `fallback`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::MalformedEvent`] when the text is not valid
    /// JSON; the buffer is left untouched.
    pub fn complete(
        &mut self,
        fallback: impl FnOnce() -> serde_json::Value,
        event: &str,
    ) -> Result<&serde_json::Value, ReconcileError> {
        if let ArgumentBuffer::Buffering(text) = self {
            let value = if text.trim().is_empty() {
                fallback()
            } else {
                serde_json::from_str(text).map_err(|e| {
                    ReconcileError::malformed(event, format!("tool arguments are not valid JSON: {e}"))
                })?
            };
            *self = ArgumentBuffer::Parsed(value);
        }
        match self {
            ArgumentBuffer::Parsed(value) => Ok(value),
            ArgumentBuffer::Buffering(_) => unreachable!("buffer was just completed"),
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, ArgumentBuffer::Parsed(_))
    }

    /// Raw text while still buffering.
    #[must_use]
    pub fn raw(&self) -> Option<&str> {
        match self {
            ArgumentBuffer::Buffering(text) => Some(text),
            ArgumentBuffer::Parsed(_) => None,
        }
    }
}

/// A per-response fold from tokenized units to a canonical payload.
///
/// One instance per logical response. Deltas go to the sink in unit order;
/// the sink is never called after [`Reconciler::finish`].
pub trait Reconciler {
    /// Advance by one unit, emitting zero or more deltas.
    ///
    /// # Errors
    ///
    /// Malformed units and in-band vendor errors are fatal for this response.
    /// Unknown event types are ignored.
    fn accept(
        &mut self,
        unit: &StreamUnit,
        sink: &mut dyn FnMut(Delta),
    ) -> Result<(), ReconcileError>;

    /// The canonical result. Calling it again returns the same payload.
    ///
    /// # Errors
    ///
    /// Fails when a completed buffer does not parse, or when the stream is
    /// incomplete under [`IncompletePolicy::Strict`].
    fn finish(&mut self) -> Result<CanonicalPayload, ReconcileError>;

    /// Whether the vendor's terminal unit has been seen.
    fn is_terminated(&self) -> bool;

    fn stats(&self) -> StreamStats;
}

impl<R: Reconciler + ?Sized> Reconciler for Box<R> {
    fn accept(
        &mut self,
        unit: &StreamUnit,
        sink: &mut dyn FnMut(Delta),
    ) -> Result<(), ReconcileError> {
        (**self).accept(unit, sink)
    }

    fn finish(&mut self) -> Result<CanonicalPayload, ReconcileError> {
        (**self).finish()
    }

    fn is_terminated(&self) -> bool {
        (**self).is_terminated()
    }

    fn stats(&self) -> StreamStats {
        (**self).stats()
    }
}

/// Fold `units` until the terminal unit or the end of input, then finish.
///
/// # Errors
///
/// Propagates the first error from [`Reconciler::accept`] or
/// [`Reconciler::finish`].
pub fn reconcile<R, I>(
    reconciler: &mut R,
    units: I,
    sink: &mut dyn FnMut(Delta),
) -> Result<CanonicalPayload, ReconcileError>
where
    R: Reconciler + ?Sized,
    I: IntoIterator<Item = StreamUnit>,
{
    for unit in units {
        reconciler.accept(&unit, sink)?;
        if reconciler.is_terminated() {
            break;
        }
    }
    reconciler.finish()
}

/// Async variant of [`reconcile`] over a stream of units.
///
/// # Errors
///
/// Same as [`reconcile`].
pub async fn reconcile_stream<R, S>(
    reconciler: &mut R,
    units: S,
    sink: &mut dyn FnMut(Delta),
) -> Result<CanonicalPayload, ReconcileError>
where
    R: Reconciler + ?Sized,
    S: Stream<Item = StreamUnit>,
{
    let mut units = std::pin::pin!(units);
    while let Some(unit) = units.next().await {
        reconciler.accept(&unit, sink)?;
        if reconciler.is_terminated() {
            break;
        }
    }
    reconciler.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_argument_buffer_completes_once() {
        let mut buffer = ArgumentBuffer::default();
        buffer.push_fragment("{\"city\":", "delta").unwrap();
        buffer.push_fragment("\"Paris\"}", "delta").unwrap();
        assert_eq!(buffer.raw(), Some("{\"city\":\"Paris\"}"));
        let value = buffer.complete(|| json!({}), "stop").unwrap().clone();
        assert_eq!(value, json!({"city": "Paris"}));
        assert!(buffer.is_complete());
        assert!(buffer.push_fragment("x", "delta").is_err());
    }

    #[test]
    fn test_argument_buffer_blank_uses_fallback() {
        let mut buffer = ArgumentBuffer::default();
        buffer.push_fragment("  ", "delta").unwrap();
        let value = buffer.complete(|| json!({"seed": true}), "stop").unwrap();
        assert_eq!(value, &json!({"seed": true}));
    }

    #[test]
    fn test_argument_buffer_invalid_stays_buffering() {
        let mut buffer = ArgumentBuffer::Buffering("{\"a\"".to_string());
        let err = buffer.complete(|| json!({}), "stop").unwrap_err();
        assert!(matches!(err, ReconcileError::MalformedEvent { .. }));
        assert!(!buffer.is_complete());
    }

    #[test]
    fn test_done_sentinel() {
        assert!(StreamUnit::data(" [DONE] ").is_done());
        assert!(!StreamUnit::data("{}").is_done());
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("best-effort".parse(), Ok(IncompletePolicy::BestEffort));
        assert_eq!("STRICT".parse(), Ok(IncompletePolicy::Strict));
        assert!("lenient".parse::<IncompletePolicy>().is_err());
    }
}
