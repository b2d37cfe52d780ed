//! Evidence blob storage

use async_trait::async_trait;
use sendguard_common::config::StorageConfig;
use sendguard_common::{Error, Result};
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info};

/// Blob storage trait for uploaded test emails
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Store a blob and return its path
    async fn store(&self, path: &str, data: &[u8]) -> Result<String>;

    /// Read a blob
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Delete a blob
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check if a blob exists
    async fn exists(&self, path: &str) -> Result<bool>;
}

/// Local filesystem storage
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new local storage instance from config
    pub fn new(config: &StorageConfig) -> Result<Self> {
        Self::from_path(&config.path)
    }

    /// Create a new local storage instance from a path
    pub fn from_path(path: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .map_err(|e| Error::Storage(format!("Failed to create storage directory: {}", e)))?;

        info!(path = %path.display(), "Initialized local evidence storage");

        Ok(Self {
            base_path: path.to_path_buf(),
        })
    }

    /// Get full path for a relative path, rejecting traversal
    fn full_path(&self, path: &str) -> Result<PathBuf> {
        if path.contains("..") {
            return Err(Error::Storage(
                "Path traversal detected: '..' is not allowed".to_string(),
            ));
        }

        if path.starts_with('/') || path.starts_with('\\') {
            return Err(Error::Storage("Absolute paths are not allowed".to_string()));
        }

        Ok(self.base_path.join(path))
    }
}

#[async_trait]
impl FileStorage for LocalStorage {
    async fn store(&self, path: &str, data: &[u8]) -> Result<String> {
        let full = self.full_path(path)?;

        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
        }

        fs::write(&full, data)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write {}: {}", path, e)))?;

        debug!(path = %path, size = data.len(), "Stored evidence blob");
        Ok(path.to_string())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.full_path(path)?;

        fs::read(&full)
            .await
            .map_err(|e| Error::Storage(format!("Failed to read {}: {}", path, e)))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.full_path(path)?;

        fs::remove_file(&full)
            .await
            .map_err(|e| Error::Storage(format!("Failed to delete {}: {}", path, e)))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.full_path(path)?;
        Ok(full.exists())
    }
}
