//! Streaming delta reconciliation for multi-vendor LLM responses.
//!
//! Vendor streams arrive as tokenized units ([`stream::StreamUnit`]). A
//! per-vendor [`stream::Reconciler`] folds them into the vendor's complete
//! response document while emitting [`stream::Delta`]s, then decodes that
//! document exactly as the non-streaming path does, yielding a
//! [`protocol::canonical::CanonicalPayload`].

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod stream;

pub use error::ReconcileError;
pub use protocol::canonical::{CanonicalPayload, ProviderKind};
pub use stream::{reconcile, reconcile_stream, Delta, IncompletePolicy, Reconciler, StreamUnit};
