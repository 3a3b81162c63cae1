//! Service runtime: named services, per-service cooperative scheduling, and
//! the host that drives the start/stop lifecycle.
//!
//! Each service owns exactly one event loop. Bus messages routed to the
//! service are dispatched to [`Service::handle`] serially on that loop, so
//! handlers and task-completion code never run in parallel with each other
//! within one service. Long-running work leaves the loop through
//! [`ServiceContext::run_task`] so the scheduler never stalls.

mod context;
mod host;

pub use context::ServiceContext;
pub use host::{Host, Profile};

use crate::bus::Envelope;
use crate::error::HostError;

/// A named long-lived component hosted by the runtime.
///
/// Construction wires dependencies; [`Service::start`] subscribes topics and
/// launches background tasks; [`Service::stop`] drains and releases. The
/// context handed to `start` is the service's only channel back into the
/// fabric and must be retained by the service (typically in a `OnceLock`).
#[async_trait::async_trait]
pub trait Service: Send + Sync + 'static {
    /// The stable service name used in logs, metrics, and recorder keys.
    fn name(&self) -> &'static str;

    /// Subscribe topics and launch background tasks.
    async fn start(&self, ctx: ServiceContext) -> Result<(), HostError>;

    /// Handle one bus message. Invoked serially on the service's event loop.
    async fn handle(&self, envelope: Envelope);

    /// Drain and release resources. Invoked after the event loop exits.
    async fn stop(&self) {}
}
