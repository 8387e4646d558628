//! Management surface of the queuing core.
//!
//! The transport (JMX-like, HTTP or otherwise) lives outside this crate; it
//! calls [`admin::QueueManagement`] and serialises the typed results.

pub mod admin;

pub use admin::{MessageContentView, QueueInfo, QueueManagement};

use serde::{Deserialize, Serialize};

use crate::core::error::QueueError;
use crate::core::message::current_timestamp;

/// Standard response wrapper for management transports.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: u64,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: current_timestamp(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: current_timestamp(),
        }
    }
}

impl<T> From<Result<T, QueueError>> for ApiResponse<T> {
    fn from(result: Result<T, QueueError>) -> Self {
        match result {
            Ok(data) => Self::success(data),
            Err(err) => Self::error(err.to_string()),
        }
    }
}
