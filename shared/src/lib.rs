//! Shared data model, config and utilities for the render farm worker agent
//!
//! This crate contains the wire types exchanged with the Manager, the
//! worker's configuration model, and small validation/utility helpers used
//! by the worker binary.

pub mod api;
pub mod config;
pub mod defaults;
pub mod timing;
pub mod utils;

pub use api::{ApiError, MayIRunResponse, StatusChangeResponse, Task};
pub use config::WorkerConfig;
pub use timing::Timing;
pub use utils::{calculate_checksum, validate_worker_id};

/// Result type alias used throughout the shared crate
pub type Result<T> = anyhow::Result<T>;

/// Error taxonomy for configuration, identity and validation failures.
///
/// Network/HTTP-layer errors have their own classification in
/// `worker::client::ClientError`; this enum covers everything below that
/// layer.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("pre-task check failed: {0}")]
    PreTaskCheck(String),

    #[error("identity error: {0}")]
    Identity(String),
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_basic_imports() {}
}
