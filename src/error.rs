/// Error raised while folding a stream or decoding a wire document.
///
/// Every variant is fatal for the response being reconciled and for nothing
/// else: contexts are immutable and other reconcilers keep running.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    #[error("Malformed {event} event: {reason}")]
    MalformedEvent { event: String, reason: String },
    #[error("Incomplete stream: {0}")]
    IncompleteStream(String),
    #[error("Protocol translation error: {0}")]
    Translation(String),
    #[error("Upstream error: {0}")]
    Upstream(String),
    #[error("Reconciler already finished")]
    Finished,
    /// Soft: an event or content type outside the known vocabulary. Callers
    /// skip the unit or part and keep going.
    #[error("Unknown event: {0}")]
    UnknownEvent(String),
}

impl ReconcileError {
    pub(crate) fn malformed(event: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            event: event.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn translation(reason: impl Into<String>) -> Self {
        Self::Translation(reason.into())
    }

    /// Whether the error only skips a unit or part instead of failing the
    /// response.
    #[must_use]
    pub fn is_soft(&self) -> bool {
        matches!(self, ReconcileError::UnknownEvent(_))
    }

    /// Broad category used when logging a failed fold.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            ReconcileError::MalformedEvent { .. } | ReconcileError::Translation(_) => {
                ErrorCategory::Malformed
            }
            ReconcileError::IncompleteStream(_) => ErrorCategory::Incomplete,
            ReconcileError::Upstream(_) => ErrorCategory::Upstream,
            ReconcileError::Finished => ErrorCategory::Misuse,
            ReconcileError::UnknownEvent(_) => ErrorCategory::Unknown,
        }
    }
}

/// Broad error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Malformed,
    Incomplete,
    Upstream,
    Misuse,
    Unknown,
}

impl ErrorCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Malformed => "malformed",
            ErrorCategory::Incomplete => "incomplete",
            ErrorCategory::Upstream => "upstream",
            ErrorCategory::Misuse => "misuse",
            ErrorCategory::Unknown => "unknown",
        }
    }
}
