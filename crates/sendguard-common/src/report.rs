//! Validation report value types
//!
//! A validation run produces one [`CheckOutcome`] per check and folds them
//! into a single [`ValidationReport`]. The report JSON shape is stable: it is
//! persisted to the record store and consumed by the CLI and by notification
//! receivers, and the previous report is read back for drift detection before
//! it is overwritten.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status of a single check, and of the aggregated report.
///
/// This is a closed set: checks must not invent further values. A `pending`
/// state exists only on the stored record, before any validation has run;
/// no check ever produces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Valid,
    Invalid,
    Warning,
    Skipped,
}

impl CheckStatus {
    /// String form used in report JSON and the record store status column
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Valid => "valid",
            CheckStatus::Invalid => "invalid",
            CheckStatus::Warning => "warning",
            CheckStatus::Skipped => "skipped",
        }
    }

    /// Precedence rank for aggregation: invalid > warning > valid > skipped.
    ///
    /// A skipped check contributes no opinion and never overrides another
    /// status.
    fn severity(&self) -> u8 {
        match self {
            CheckStatus::Invalid => 3,
            CheckStatus::Warning => 2,
            CheckStatus::Valid => 1,
            CheckStatus::Skipped => 0,
        }
    }

    /// Fold two statuses into the stronger one
    pub fn combine(self, other: CheckStatus) -> CheckStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub status: CheckStatus,
    pub message: String,
    /// Open bag of check-specific data: fetched DNS records, parsed tag
    /// maps, comparison flags (`dns_changed`), nested `warnings`/`errors`
    /// lists.
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl CheckOutcome {
    pub fn new(status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: serde_json::Map::new(),
        }
    }

    pub fn valid(message: impl Into<String>) -> Self {
        Self::new(CheckStatus::Valid, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(CheckStatus::Invalid, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(CheckStatus::Warning, message)
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self::new(CheckStatus::Skipped, message)
    }

    /// Attach a detail value
    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    /// Attach the `errors` detail list
    pub fn with_errors(self, errors: Vec<String>) -> Self {
        self.with_detail("errors", serde_json::Value::from(errors))
    }

    /// Error strings carried in `details.errors`
    pub fn errors(&self) -> Vec<String> {
        self.details
            .get("errors")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Aggregated report for one validation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub status: CheckStatus,
    pub email: String,
    pub domain: String,
    /// Unix timestamp of the run
    pub timestamp: i64,
    /// Per-check outcomes keyed by the stable check name
    pub validators: BTreeMap<String, CheckOutcome>,
    /// Flat list of error strings drawn from invalid outcomes
    pub errors: Vec<String>,
}

/// Per-status counters for a batch run, emitted at the notification boundary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationStats {
    pub total: u64,
    pub valid: u64,
    pub warning: u64,
    pub invalid: u64,
    pub pending: u64,
}

/// A sender address whose latest run needs attention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedAddress {
    pub email: String,
    pub status: CheckStatus,
    pub errors: Vec<String>,
}
