//! tether-core library.
//!
//! Local-first state reconciliation and resource materialization. Every
//! resource read returns the locally cached value immediately and reconciles
//! against the remote authority in the background; every mutation is applied
//! locally first and forwarded to the remote on a best-effort basis, falling
//! into a durable offline queue when delivery fails.
//!
//! # Conventions
//!
//! - **Errors**: library APIs return [`error::Result`] with the typed
//!   [`error::SyncError`] taxonomy. `anyhow` is reserved for config loading.
//! - **Logging**: use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).
//! - **Background work**: spawn only through [`sync::supervisor::TaskSupervisor`]
//!   so [`engine::Engine::shutdown`] can drain it.

pub mod adapter;
pub mod bits;
pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod resources;
pub mod sync;

pub use engine::{Engine, EngineBuilder, Fetched};
pub use error::{ErrorCode, Result, StoreError, SyncError};
