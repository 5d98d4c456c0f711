//! Per-vendor serialization context.
//!
//! A [`SerdeContext`] is a fixed table holding, for every [`ContentKind`], an
//! optional *produce* rule (wire JSON to canonical) and an optional *reduce*
//! rule (canonical to wire JSON). Vendors build one `static` table at compile
//! time and override only the kinds whose wire shape differs from the
//! canonical one; everything else falls back to the default rules in
//! [`crate::protocol::codec`]. Tables are never mutated after
//! construction, so a single table is shared by every reconciler and by the
//! non-streaming decoders of its vendor.

use crate::error::ReconcileError;
use crate::protocol::canonical::{
    CanonicalChoice, CanonicalContent, CanonicalFunction, CanonicalMedia, CanonicalMessage,
    CanonicalToolCall, CanonicalToolResult, CanonicalUsage,
};
use serde_json::Value;

/// Wire JSON to canonical.
pub type ProduceFn<T> = fn(&Value, &SerdeContext) -> Result<T, ReconcileError>;

/// Canonical to wire JSON.
pub type ReduceFn<T> = fn(&T, &SerdeContext) -> Value;

/// The closed set of kinds a vendor may override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Text,
    ToolCall,
    ToolCallResult,
    Function,
    Message,
    Choice,
    Usage,
    Content,
    Url,
    File,
}

impl ContentKind {
    pub const ALL: [ContentKind; 10] = [
        ContentKind::Text,
        ContentKind::ToolCall,
        ContentKind::ToolCallResult,
        ContentKind::Function,
        ContentKind::Message,
        ContentKind::Choice,
        ContentKind::Usage,
        ContentKind::Content,
        ContentKind::Url,
        ContentKind::File,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::ToolCall => "tool_call",
            ContentKind::ToolCallResult => "tool_call_result",
            ContentKind::Function => "function",
            ContentKind::Message => "message",
            ContentKind::Choice => "choice",
            ContentKind::Usage => "usage",
            ContentKind::Content => "content",
            ContentKind::Url => "url",
            ContentKind::File => "file",
        }
    }
}

/// Optional produce/reduce pair for one kind.
#[derive(Debug)]
pub struct Codec<T> {
    pub produce: Option<ProduceFn<T>>,
    pub reduce: Option<ReduceFn<T>>,
}

impl<T> Codec<T> {
    pub const NONE: Self = Self {
        produce: None,
        reduce: None,
    };

    #[must_use]
    pub const fn new(produce: ProduceFn<T>, reduce: ReduceFn<T>) -> Self {
        Self {
            produce: Some(produce),
            reduce: Some(reduce),
        }
    }

    #[must_use]
    pub const fn produce_only(produce: ProduceFn<T>) -> Self {
        Self {
            produce: Some(produce),
            reduce: None,
        }
    }

    #[must_use]
    pub const fn reduce_only(reduce: ReduceFn<T>) -> Self {
        Self {
            produce: None,
            reduce: Some(reduce),
        }
    }

    fn overrides(&self) -> Overrides {
        Overrides {
            produce: self.produce.is_some(),
            reduce: self.reduce.is_some(),
        }
    }
}

/// Which directions a context overrides for one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overrides {
    pub produce: bool,
    pub reduce: bool,
}

impl Overrides {
    #[must_use]
    pub fn any(self) -> bool {
        self.produce || self.reduce
    }
}

/// Immutable table of vendor overrides, one typed codec per [`ContentKind`].
#[derive(Debug)]
pub struct SerdeContext {
    pub name: &'static str,
    pub text: Codec<String>,
    pub tool_call: Codec<CanonicalToolCall>,
    pub tool_call_result: Codec<CanonicalToolResult>,
    pub function: Codec<CanonicalFunction>,
    pub message: Codec<CanonicalMessage>,
    pub choice: Codec<CanonicalChoice>,
    pub usage: Codec<CanonicalUsage>,
    pub content: Codec<CanonicalContent>,
    pub url: Codec<CanonicalMedia>,
    pub file: Codec<CanonicalMedia>,
}

impl SerdeContext {
    /// The context without overrides: reads and writes the canonical JSON
    /// shape.
    pub const EMPTY: SerdeContext = SerdeContext {
        name: "canonical",
        text: Codec::NONE,
        tool_call: Codec::NONE,
        tool_call_result: Codec::NONE,
        function: Codec::NONE,
        message: Codec::NONE,
        choice: Codec::NONE,
        usage: Codec::NONE,
        content: Codec::NONE,
        url: Codec::NONE,
        file: Codec::NONE,
    };

    /// Report whether this context overrides `kind`.
    ///
    /// An absent direction means callers use the default rule.
    #[must_use]
    pub fn lookup(&self, kind: ContentKind) -> Overrides {
        match kind {
            ContentKind::Text => self.text.overrides(),
            ContentKind::ToolCall => self.tool_call.overrides(),
            ContentKind::ToolCallResult => self.tool_call_result.overrides(),
            ContentKind::Function => self.function.overrides(),
            ContentKind::Message => self.message.overrides(),
            ContentKind::Choice => self.choice.overrides(),
            ContentKind::Usage => self.usage.overrides(),
            ContentKind::Content => self.content.overrides(),
            ContentKind::Url => self.url.overrides(),
            ContentKind::File => self.file.overrides(),
        }
    }

    /// Kinds with at least one override, in [`ContentKind::ALL`] order.
    #[must_use]
    pub fn overridden_kinds(&self) -> Vec<ContentKind> {
        ContentKind::ALL
            .into_iter()
            .filter(|kind| self.lookup(*kind).any())
            .collect()
    }
}
