use super::canonical::{CanonicalRole, CanonicalStopReason};

// ---------------------------------------------------------------------------
// Role mappings
// ---------------------------------------------------------------------------

#[must_use]
pub fn canonical_role_to_anthropic(role: CanonicalRole) -> &'static str {
    match role {
        // Anthropic has no system or tool role inside `messages`.
        CanonicalRole::System | CanonicalRole::User | CanonicalRole::Tool => "user",
        CanonicalRole::Assistant => "assistant",
    }
}

#[must_use]
pub fn canonical_role_to_gemini(role: CanonicalRole) -> &'static str {
    match role {
        CanonicalRole::System | CanonicalRole::User => "user",
        CanonicalRole::Assistant => "model",
        CanonicalRole::Tool => "function",
    }
}

#[must_use]
pub fn gemini_role_to_canonical(s: &str) -> CanonicalRole {
    match s {
        "model" => CanonicalRole::Assistant,
        "function" => CanonicalRole::Tool,
        _ => CanonicalRole::User,
    }
}

#[must_use]
pub fn canonical_role_to_llama(role: CanonicalRole) -> &'static str {
    match role {
        CanonicalRole::System => "system",
        CanonicalRole::User => "user",
        CanonicalRole::Assistant => "assistant",
        CanonicalRole::Tool => "tool",
    }
}

// ---------------------------------------------------------------------------
// Stop reason mappings
// ---------------------------------------------------------------------------

#[must_use]
pub fn canonical_stop_to_anthropic(reason: CanonicalStopReason) -> &'static str {
    match reason {
        // Anthropic has no content_filter reason.
        CanonicalStopReason::EndOfTurn | CanonicalStopReason::ContentFilter => "end_turn",
        CanonicalStopReason::ToolCalls => "tool_use",
        CanonicalStopReason::MaxTokens => "max_tokens",
    }
}

#[must_use]
pub fn anthropic_stop_to_canonical(s: &str) -> CanonicalStopReason {
    match s {
        "tool_use" => CanonicalStopReason::ToolCalls,
        "max_tokens" => CanonicalStopReason::MaxTokens,
        "refusal" => CanonicalStopReason::ContentFilter,
        _ => CanonicalStopReason::EndOfTurn,
    }
}

#[must_use]
pub fn canonical_stop_to_gemini(reason: CanonicalStopReason) -> &'static str {
    match reason {
        // Gemini reports STOP for tool calls too.
        CanonicalStopReason::EndOfTurn | CanonicalStopReason::ToolCalls => "STOP",
        CanonicalStopReason::MaxTokens => "MAX_TOKENS",
        CanonicalStopReason::ContentFilter => "SAFETY",
    }
}

/// Map a Gemini finish reason; `STOP` becomes `ToolCalls` when the
/// candidate carries function calls.
#[must_use]
pub fn gemini_stop_to_canonical(s: &str, has_tool_calls: bool) -> CanonicalStopReason {
    match s {
        "MAX_TOKENS" => CanonicalStopReason::MaxTokens,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" => {
            CanonicalStopReason::ContentFilter
        }
        _ if has_tool_calls => CanonicalStopReason::ToolCalls,
        _ => CanonicalStopReason::EndOfTurn,
    }
}

#[must_use]
pub fn canonical_stop_to_llama(reason: CanonicalStopReason) -> &'static str {
    match reason {
        CanonicalStopReason::EndOfTurn | CanonicalStopReason::ContentFilter => "stop",
        CanonicalStopReason::ToolCalls => "tool_calls",
        CanonicalStopReason::MaxTokens => "length",
    }
}

#[must_use]
pub fn llama_stop_to_canonical(s: &str) -> CanonicalStopReason {
    match s {
        "tool_calls" => CanonicalStopReason::ToolCalls,
        "length" => CanonicalStopReason::MaxTokens,
        _ => CanonicalStopReason::EndOfTurn,
    }
}
