//! Sender address repository

use crate::db::DatabasePool;
use crate::models::{CreateSenderAddress, SenderAddress};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sendguard_common::{Error, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Sender address repository trait
#[async_trait]
pub trait SenderAddressRepository: Send + Sync {
    async fn create(&self, input: CreateSenderAddress) -> Result<SenderAddress>;
    async fn get(&self, id: Uuid) -> Result<Option<SenderAddress>>;
    async fn get_by_email(&self, email: &str) -> Result<Option<SenderAddress>>;
    /// All non-deleted records
    async fn list_active(&self) -> Result<Vec<SenderAddress>>;
    /// Overwrite the record's status, check time and report after a run
    async fn update_report(
        &self,
        id: Uuid,
        status: &str,
        last_check: DateTime<Utc>,
        report: serde_json::Value,
    ) -> Result<()>;
    /// Attach an uploaded test email to the record
    async fn set_evidence_path(&self, id: Uuid, path: Option<String>) -> Result<()>;
    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// Database sender address repository
pub struct DbSenderAddressRepository {
    pool: DatabasePool,
}

impl DbSenderAddressRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SenderAddressRepository for DbSenderAddressRepository {
    async fn create(&self, input: CreateSenderAddress) -> Result<SenderAddress> {
        let id = Uuid::now_v7();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO sender_addresses (id, email, name, status, created_at, updated_at)
            VALUES ($1, LOWER($2), $3, 'pending', $4, $5)
            "#,
        )
        .bind(id)
        .bind(&input.email)
        .bind(&input.name)
        .bind(now)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        self.get(id)
            .await?
            .ok_or_else(|| Error::Internal("Failed to create sender address".to_string()))
    }

    async fn get(&self, id: Uuid) -> Result<Option<SenderAddress>> {
        sqlx::query_as::<_, SenderAddress>("SELECT * FROM sender_addresses WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<SenderAddress>> {
        sqlx::query_as::<_, SenderAddress>(
            "SELECT * FROM sender_addresses WHERE LOWER(email) = LOWER($1) AND NOT deleted",
        )
        .bind(email)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_active(&self) -> Result<Vec<SenderAddress>> {
        sqlx::query_as::<_, SenderAddress>(
            "SELECT * FROM sender_addresses WHERE NOT deleted ORDER BY email ASC",
        )
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn update_report(
        &self,
        id: Uuid,
        status: &str,
        last_check: DateTime<Utc>,
        report: serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sender_addresses
            SET status = $2, last_check = $3, report = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(last_check)
        .bind(report)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    async fn set_evidence_path(&self, id: Uuid, path: Option<String>) -> Result<()> {
        sqlx::query(
            "UPDATE sender_addresses SET evidence_path = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(path)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE sender_addresses SET deleted = TRUE, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }
}

/// In-memory sender address repository.
///
/// Backs the validation engine in tests and single-process deployments
/// without PostgreSQL.
#[derive(Default)]
pub struct MemSenderAddressRepository {
    records: RwLock<HashMap<Uuid, SenderAddress>>,
}

impl MemSenderAddressRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SenderAddressRepository for MemSenderAddressRepository {
    async fn create(&self, input: CreateSenderAddress) -> Result<SenderAddress> {
        let now = Utc::now();
        let record = SenderAddress {
            id: Uuid::now_v7(),
            email: input.email.to_lowercase(),
            name: input.name,
            status: "pending".to_string(),
            last_check: None,
            report: None,
            evidence_path: None,
            deleted: false,
            created_at: now,
            updated_at: now,
        };

        let mut records = self.records.write().await;
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<SenderAddress>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<SenderAddress>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|r| !r.deleted && r.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn list_active(&self) -> Result<Vec<SenderAddress>> {
        let records = self.records.read().await;
        let mut active: Vec<SenderAddress> =
            records.values().filter(|r| !r.deleted).cloned().collect();
        active.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(active)
    }

    async fn update_report(
        &self,
        id: Uuid,
        status: &str,
        last_check: DateTime<Utc>,
        report: serde_json::Value,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("sender address {}", id)))?;
        record.status = status.to_string();
        record.last_check = Some(last_check);
        record.report = Some(report);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn set_evidence_path(&self, id: Uuid, path: Option<String>) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("sender address {}", id)))?;
        record.evidence_path = path;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(&id) {
            record.deleted = true;
            record.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_mem_repository_round_trip() {
        let repo = MemSenderAddressRepository::new();

        let record = repo
            .create(CreateSenderAddress {
                email: "Sender@Example.com".to_string(),
                name: "Sender".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(record.email, "sender@example.com");
        assert_eq!(record.status, "pending");

        let report = serde_json::json!({"status": "valid"});
        repo.update_report(record.id, "valid", Utc::now(), report.clone())
            .await
            .unwrap();

        let loaded = repo.get(record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, "valid");
        assert_eq!(loaded.report, Some(report));

        repo.delete(record.id).await.unwrap();
        assert!(repo.list_active().await.unwrap().is_empty());
    }
}
