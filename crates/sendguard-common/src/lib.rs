//! Sendguard Common - shared types and utilities
//!
//! This crate provides the error type, configuration structures, and the
//! validation report value types shared by all Sendguard crates.

pub mod config;
pub mod error;
pub mod report;

pub use config::Config;
pub use error::{Error, Result};
pub use report::{CheckOutcome, CheckStatus, FailedAddress, ValidationReport, ValidationStats};
