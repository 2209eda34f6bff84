//! Error types shared across the Capsule crates.

use thiserror::Error;

/// Failure of one delivery attempt. The `Display` text is what ends up in a
/// capsule's `last_error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("mail transport not configured: {0}")]
    NotConfigured(String),

    #[error("attachment missing: {0}")]
    AttachmentMissing(String),

    #[error("{0}")]
    Send(String),
}

#[derive(Debug, Error)]
pub enum CapsuleError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("capsule {0} not found")]
    NotFound(i64),

    #[error("access denied: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("delivery scheduler is already running in this process")]
    SchedulerRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CapsuleError>;
