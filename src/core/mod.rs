pub mod channel;
pub mod content;
pub mod delivery_mode;
pub mod error;
pub mod exchange;
pub mod incoming;
pub mod message;
pub mod queue;
pub mod store;
pub mod subscription;
pub mod txn;
pub mod virtualhost;
