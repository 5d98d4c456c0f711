use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type ProviderExtensions = serde_json::Map<String, serde_json::Value>;

/// The vendor family a stream or document comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Content-block-indexed streaming (Anthropic Messages).
    Anthropic,
    /// Part-array concatenation (Gemini `streamGenerateContent`).
    Gemini,
    /// Single message buffer with a tool list (Llama API).
    Llama,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Anthropic,
        ProviderKind::Gemini,
        ProviderKind::Llama,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Llama => "llama",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            "llama" | "meta" => Ok(ProviderKind::Llama),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

/// Canonical message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalRole {
    System,
    User,
    Assistant,
    Tool,
}

impl CanonicalRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalRole::System => "system",
            CanonicalRole::User => "user",
            CanonicalRole::Assistant => "assistant",
            CanonicalRole::Tool => "tool",
        }
    }

    /// Map a vendor role string onto a canonical role.
    ///
    /// Gemini calls the assistant `model`; OpenAI-style APIs also send
    /// `developer` for system prompts and `ipython` for tool output.
    #[must_use]
    pub fn from_wire(role: &str) -> Option<Self> {
        match role {
            "system" | "developer" => Some(CanonicalRole::System),
            "user" => Some(CanonicalRole::User),
            "assistant" | "model" => Some(CanonicalRole::Assistant),
            "tool" | "function" | "ipython" => Some(CanonicalRole::Tool),
            _ => None,
        }
    }
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalStopReason {
    EndOfTurn,
    ToolCalls,
    MaxTokens,
    ContentFilter,
}

impl CanonicalStopReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalStopReason::EndOfTurn => "end_of_turn",
            CanonicalStopReason::ToolCalls => "tool_calls",
            CanonicalStopReason::MaxTokens => "max_tokens",
            CanonicalStopReason::ContentFilter => "content_filter",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "end_of_turn" => Some(CanonicalStopReason::EndOfTurn),
            "tool_calls" => Some(CanonicalStopReason::ToolCalls),
            "max_tokens" => Some(CanonicalStopReason::MaxTokens),
            "content_filter" => Some(CanonicalStopReason::ContentFilter),
            _ => None,
        }
    }
}

/// Token usage information.
///
/// Fields are only ever filled in: [`CanonicalUsage::merge`] never unsets a
/// value that is already known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CanonicalUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

impl CanonicalUsage {
    /// Copy every field `other` knows about onto `self`.
    pub fn merge(&mut self, other: &CanonicalUsage) {
        if other.input_tokens.is_some() {
            self.input_tokens = other.input_tokens;
        }
        if other.output_tokens.is_some() {
            self.output_tokens = other.output_tokens;
        }
        if other.total_tokens.is_some() {
            self.total_tokens = other.total_tokens;
        }
    }

    /// Reported total, or input plus output when the vendor omits it.
    #[must_use]
    pub fn total(&self) -> Option<u64> {
        self.total_tokens.or(match (self.input_tokens, self.output_tokens) {
            (Some(input), Some(output)) => Some(input.saturating_add(output)),
            _ => None,
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.input_tokens.is_none() && self.output_tokens.is_none() && self.total_tokens.is_none()
    }
}

/// A function invocation requested by the model.
///
/// `arguments` is always a parsed JSON value; partially streamed argument
/// text never reaches this type.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalFunction {
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalToolCall {
    pub id: String,
    pub function: CanonicalFunction,
}

impl CanonicalToolCall {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            function: CanonicalFunction {
                name: name.into(),
                arguments,
            },
        }
    }
}

/// The output of a tool execution, addressed to the call that requested it.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalToolResult {
    pub tool_call_id: String,
    pub content: serde_json::Value,
}

/// Media attached to a message, either by reference or inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalMedia {
    Url {
        url: String,
        media_type: Option<String>,
    },
    File {
        media_type: String,
        /// Base64-encoded bytes.
        data: String,
    },
}

/// A single entry of a message's ordered content.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalContent {
    Text(String),
    Thinking {
        thinking: String,
        metadata: ProviderExtensions,
    },
    ToolCall(CanonicalToolCall),
    ToolResult(CanonicalToolResult),
    Media(CanonicalMedia),
}

impl CanonicalContent {
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        CanonicalContent::Text(value.into())
    }

    #[must_use]
    pub fn thinking(value: impl Into<String>) -> Self {
        CanonicalContent::Thinking {
            thinking: value.into(),
            metadata: ProviderExtensions::new(),
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CanonicalContent::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// One message: a role and its ordered content.
///
/// Tool calls live in `content` at the position the vendor emitted them;
/// [`CanonicalMessage::tool_calls`] is the flat view.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalMessage {
    pub role: CanonicalRole,
    pub content: Vec<CanonicalContent>,
}

impl CanonicalMessage {
    #[must_use]
    pub fn new(role: CanonicalRole) -> Self {
        Self {
            role,
            content: Vec::new(),
        }
    }

    /// Build a message from produced parts, kept in order.
    #[must_use]
    pub fn from_parts(role: CanonicalRole, parts: Vec<CanonicalContent>) -> Self {
        Self {
            role,
            content: parts,
        }
    }

    pub fn push_tool_call(&mut self, call: CanonicalToolCall) {
        self.content.push(CanonicalContent::ToolCall(call));
    }

    /// Tool calls in content order.
    pub fn tool_calls(&self) -> impl Iterator<Item = &CanonicalToolCall> {
        self.content.iter().filter_map(|content| match content {
            CanonicalContent::ToolCall(call) => Some(call),
            _ => None,
        })
    }

    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls().next().is_some()
    }

    /// Add one content entry, concatenating onto a trailing entry of the
    /// same textual kind.
    pub fn push_content(&mut self, content: CanonicalContent) {
        match content {
            CanonicalContent::Text(text) => {
                if let Some(CanonicalContent::Text(last)) = self.content.last_mut() {
                    last.push_str(&text);
                } else {
                    self.content.push(CanonicalContent::Text(text));
                }
            }
            CanonicalContent::Thinking { thinking, metadata } => {
                if let Some(CanonicalContent::Thinking {
                    thinking: last,
                    metadata: last_metadata,
                }) = self.content.last_mut()
                {
                    last.push_str(&thinking);
                    last_metadata.extend(metadata);
                } else {
                    self.content
                        .push(CanonicalContent::Thinking { thinking, metadata });
                }
            }
            other => self.content.push(other),
        }
    }

    /// Content-additive merge: nothing already present is replaced.
    pub fn merge(&mut self, other: CanonicalMessage) {
        for content in other.content {
            self.push_content(content);
        }
    }

    /// All text content joined with newlines.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(CanonicalContent::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// All thinking content, if there is any.
    #[must_use]
    pub fn thinking(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|content| match content {
                CanonicalContent::Thinking { thinking, .. } => Some(thinking.as_str()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

/// One candidate response.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalChoice {
    pub index: usize,
    pub message: CanonicalMessage,
    pub stop_reason: Option<CanonicalStopReason>,
}

impl CanonicalChoice {
    #[must_use]
    pub fn new(index: usize, message: CanonicalMessage) -> Self {
        Self {
            index,
            message,
            stop_reason: None,
        }
    }

    /// Merge a later fragment of the same choice into this one.
    pub fn merge(&mut self, other: CanonicalChoice) {
        debug_assert_eq!(self.index, other.index);
        self.message.merge(other.message);
        if other.stop_reason.is_some() {
            self.stop_reason = other.stop_reason;
        }
    }
}

/// The fully merged, vendor-agnostic result of one response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalPayload {
    /// Sorted by `index`; indices may be sparse.
    pub choices: Vec<CanonicalChoice>,
    pub usage: Option<CanonicalUsage>,
}

impl CanonicalPayload {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `choice` at its index, or merge it into the choice already
    /// there.
    pub fn merge_choice(&mut self, choice: CanonicalChoice) {
        match self
            .choices
            .binary_search_by_key(&choice.index, |existing| existing.index)
        {
            Ok(pos) => self.choices[pos].merge(choice),
            Err(pos) => self.choices.insert(pos, choice),
        }
    }

    pub fn merge_usage(&mut self, usage: &CanonicalUsage) {
        self.usage.get_or_insert_with(CanonicalUsage::default).merge(usage);
    }

    #[must_use]
    pub fn choice(&self, index: usize) -> Option<&CanonicalChoice> {
        self.choices
            .binary_search_by_key(&index, |choice| choice.index)
            .ok()
            .map(|pos| &self.choices[pos])
    }

    /// The message of the lowest-indexed choice.
    #[must_use]
    pub fn message(&self) -> Option<&CanonicalMessage> {
        self.choices.first().map(|choice| &choice.message)
    }

    /// Text of the lowest-indexed choice, empty when there is none.
    #[must_use]
    pub fn text(&self) -> String {
        self.message().map(CanonicalMessage::text).unwrap_or_default()
    }

    /// Tool calls of every choice, in choice order.
    pub fn tool_calls(&self) -> impl Iterator<Item = &CanonicalToolCall> {
        self.choices
            .iter()
            .flat_map(|choice| choice.message.tool_calls())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_usage_merge_never_unsets() {
        let mut usage = CanonicalUsage {
            input_tokens: Some(10),
            output_tokens: Some(1),
            total_tokens: None,
        };
        usage.merge(&CanonicalUsage {
            input_tokens: None,
            output_tokens: Some(15),
            total_tokens: None,
        });
        assert_eq!(usage.input_tokens, Some(10));
        assert_eq!(usage.output_tokens, Some(15));
        assert_eq!(usage.total(), Some(25));
    }

    #[test]
    fn test_merge_choice_is_sparse_and_sorted() {
        let mut payload = CanonicalPayload::new();
        payload.merge_choice(CanonicalChoice::new(
            2,
            CanonicalMessage::from_parts(CanonicalRole::Assistant, vec![CanonicalContent::text("b")]),
        ));
        payload.merge_choice(CanonicalChoice::new(
            0,
            CanonicalMessage::from_parts(CanonicalRole::Assistant, vec![CanonicalContent::text("a")]),
        ));
        let indices: Vec<usize> = payload.choices.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 2]);
        assert!(payload.choice(1).is_none());
        assert_eq!(payload.choice(2).map(|c| c.message.text()), Some("b".to_string()));
    }

    #[test]
    fn test_merge_choice_is_content_additive() {
        let mut payload = CanonicalPayload::new();
        payload.merge_choice(CanonicalChoice::new(
            0,
            CanonicalMessage::from_parts(
                CanonicalRole::Assistant,
                vec![CanonicalContent::text("Hello")],
            ),
        ));
        let mut later = CanonicalChoice::new(
            0,
            CanonicalMessage::from_parts(
                CanonicalRole::Assistant,
                vec![
                    CanonicalContent::text(" World"),
                    CanonicalContent::ToolCall(CanonicalToolCall::new(
                        "call_1",
                        "lookup",
                        json!({"q": "rust"}),
                    )),
                ],
            ),
        );
        later.stop_reason = Some(CanonicalStopReason::ToolCalls);
        payload.merge_choice(later);

        assert_eq!(payload.choices.len(), 1);
        assert_eq!(payload.text(), "Hello World");
        assert_eq!(payload.tool_calls().count(), 1);
        assert_eq!(
            payload.choices[0].stop_reason,
            Some(CanonicalStopReason::ToolCalls)
        );
    }

    #[test]
    fn test_from_parts_keeps_tool_call_position() {
        let message = CanonicalMessage::from_parts(
            CanonicalRole::Assistant,
            vec![
                CanonicalContent::text("checking"),
                CanonicalContent::ToolCall(CanonicalToolCall::new("a", "f", json!({}))),
                CanonicalContent::thinking("hmm"),
            ],
        );
        assert_eq!(message.content.len(), 3);
        assert!(matches!(message.content[1], CanonicalContent::ToolCall(_)));
        assert_eq!(message.tool_calls().count(), 1);
        assert_eq!(message.thinking().as_deref(), Some("hmm"));
    }

    #[test]
    fn test_text_after_tool_call_is_not_merged_across_it() {
        let mut message = CanonicalMessage::new(CanonicalRole::Assistant);
        message.push_content(CanonicalContent::text("before"));
        message.push_tool_call(CanonicalToolCall::new("a", "f", json!({})));
        message.push_content(CanonicalContent::text("after"));
        assert_eq!(message.content.len(), 3);
        assert_eq!(message.content[2].as_text(), Some("after"));
    }

    #[test]
    fn test_total_saturates() {
        let usage = CanonicalUsage {
            input_tokens: Some(u64::MAX),
            output_tokens: Some(7),
            total_tokens: None,
        };
        assert_eq!(usage.total(), Some(u64::MAX));
    }

    #[test]
    fn test_provider_kind_aliases() {
        assert_eq!("Google".parse::<ProviderKind>(), Ok(ProviderKind::Gemini));
        assert_eq!("meta".parse::<ProviderKind>(), Ok(ProviderKind::Llama));
        assert!("cohere".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_role_from_wire() {
        assert_eq!(CanonicalRole::from_wire("model"), Some(CanonicalRole::Assistant));
        assert_eq!(CanonicalRole::from_wire("developer"), Some(CanonicalRole::System));
        assert_eq!(CanonicalRole::from_wire("narrator"), None);
    }
}
