//! Error types for Sendguard

use thiserror::Error;

/// Main error type for Sendguard
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Evidence error: {0}")]
    Evidence(String),

    #[error("DNS error: {0}")]
    Dns(String),

    #[error("Probe error: {0}")]
    Probe(String),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for Sendguard
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Evidence(_) => "EVIDENCE_ERROR",
            Error::Dns(_) => "DNS_ERROR",
            Error::Probe(_) => "PROBE_ERROR",
            Error::Notify(_) => "NOTIFY_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }
}
