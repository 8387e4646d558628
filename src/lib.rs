//! amqcore – the queuing core of an AMQP-style message broker.
//!
//! This crate exports
//!  * `core`    – messages, queues, flow control, transactions, subscriptions
//!  * `api`     – the management facade over queues
//!  * `config`  – TOML-driven runtime configuration
//!  * `logging` – tracing subscriber setup
//!
//! Wire protocol, connections and exchange routing live outside this crate;
//! routing hands the core a set of target queues.

// ───────────────────────────────────────────────────────────
// Public modules
// ───────────────────────────────────────────────────────────
pub mod api;
pub mod config;
pub mod core;
pub mod logging;

// ───────────────────────────────────────────────────────────
// Re-exports
// ───────────────────────────────────────────────────────────
pub use config::{load_config, Config};
pub use core::error::{QueueError, StoreError};
pub use core::virtualhost::VirtualHost;
