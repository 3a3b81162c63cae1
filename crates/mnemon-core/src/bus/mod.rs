//! Typed pub/sub message fabric.
//!
//! Topics are drawn from a closed enumeration. Delivery is at-most-once and
//! best-effort: publishers never block, and subscribers that have gone away
//! are dropped silently. Within a single topic, messages from one publisher
//! arrive in publish order; there is no ordering guarantee between topics.
//!
//! Two paths exist: the in-process [`Router`] fast path, and the TCP
//! [`broker`] for other processes. The broker subscribes to every local
//! topic and mirrors the fabric onto its pub endpoint.

pub mod broker;
mod client;
mod router;
mod topic;

pub use broker::BrokerService;
pub use client::BusClient;
pub use router::Router;
pub use topic::{Envelope, Topic};
