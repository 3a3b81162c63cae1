//! Core data model for the memory-formation pipeline.
//!
//! All records are immutable once published onto the bus; the only mutation
//! window is the consolidation round, where engrams gain indices and the
//! meta summary gains its embedding. Identifiers are opaque UUID strings
//! generated at creation and never reused.

mod engram;
mod exchange;
mod meta;
mod observation;

pub use engram::{Engram, Index};
pub use exchange::{ConversationDirection, Prompt, PromptAnalysis, Response, RetrieveResult};
pub use meta::{Meta, Summary};
pub use observation::Observation;

/// Generate a fresh opaque identifier.
pub(crate) fn fresh_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
