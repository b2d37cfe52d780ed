//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A sender address record.
///
/// Records are created and edited by the backend; the validation core only
/// reads `email`/`name` and writes back `status`, `last_check` and the full
/// report. Identity is the normalized (lowercased) email.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SenderAddress {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    /// Display status: "pending" until the first run, then the latest
    /// report's aggregate status
    pub status: String,
    pub last_check: Option<DateTime<Utc>>,
    /// Latest validation report as JSON; overwritten on every run
    pub report: Option<serde_json::Value>,
    /// Relative path of the uploaded test email, if one was provided
    pub evidence_path: Option<String>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a sender address record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSenderAddress {
    pub email: String,
    #[serde(default)]
    pub name: String,
}
