//! tether-sim library.
//!
//! Deterministic in-process collaborators for tether: an in-memory local
//! engine, a fault-injecting remote authority and a manually advanced clock.
//!
//! # Conventions
//!
//! - **Errors**: collaborators return `tether_core::Result` like the real adapters.
//! - **Logging**: use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod clock;
pub mod engine;
pub mod remote;

pub use clock::ManualClock;
pub use engine::SimEngine;
pub use remote::{RecordedRequest, SimulatedRemote};
