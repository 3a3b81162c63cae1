/// Core library for the mnemon memory-formation pipeline.
///
/// This crate contains the service runtime, the typed pub/sub message
/// fabric with its TCP broker, the plugin layer with record/replay support,
/// and the pipeline services that turn user exchanges into durable memory.
pub mod bus;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod plugin;
pub mod prompts;
pub mod recorder;
pub mod runtime;
pub mod services;

pub use error::*;

/// Returns the version of the mnemon-core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
