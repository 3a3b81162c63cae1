//! The pipeline services.
//!
//! Each service is a thin stage over the runtime and fabric primitives:
//! retrieve analyzes prompts and queries memory, respond completes the main
//! prompt, codify turns completed exchanges into observations, consolidate
//! enriches observations into durable engrams, storage persists, progress
//! tracks per-source completion. Every service answers `ACKNOWLEDGE` with a
//! `STATUS` metrics snapshot.

pub mod codify;
pub mod consolidate;
pub mod progress;
pub mod respond;
pub mod retrieve;
pub mod storage;

pub use codify::CodifyService;
pub use consolidate::ConsolidateService;
pub use progress::ProgressService;
pub use respond::RespondService;
pub use retrieve::RetrieveService;
pub use storage::StorageService;

use crate::metrics::MetricPacket;
use crate::runtime::ServiceContext;

/// Build the `STATUS` payload for a metrics snapshot.
pub(crate) fn status_payload(
    ctx: &ServiceContext,
    name: &str,
    metrics: MetricPacket,
) -> serde_json::Value {
    serde_json::json!({
        "id": ctx.service_id(),
        "name": name,
        "timestamp": chrono::Utc::now().timestamp_millis(),
        "metrics": metrics,
    })
}
