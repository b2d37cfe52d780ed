//! Periodic re-check worker
//!
//! Sender configurations rot: DNS records move, keys rotate, relay pools
//! change. The worker re-validates every active record on a fixed interval
//! and pushes a notification when a cycle leaves addresses needing
//! attention.

use crate::engine::{RunSummary, ValidationService};
use crate::notify::Notifier;
use sendguard_common::Result;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{error, info};

/// Periodic re-check worker
pub struct RecheckWorker {
    service: Arc<ValidationService>,
    notifier: Arc<Notifier>,
    interval_hours: u64,
}

impl RecheckWorker {
    pub fn new(
        service: Arc<ValidationService>,
        notifier: Arc<Notifier>,
        interval_hours: u64,
    ) -> Self {
        Self {
            service,
            notifier,
            interval_hours: interval_hours.max(1),
        }
    }

    /// Run cycles until the task is aborted
    pub async fn run(&self) {
        let mut ticker = interval(Duration::from_secs(self.interval_hours * 3600));

        info!(
            interval_hours = self.interval_hours,
            "Re-check worker started"
        );

        loop {
            ticker.tick().await;

            if let Err(e) = self.run_cycle().await {
                error!("Re-check cycle failed: {}", e);
            }
        }
    }

    /// Validate all records once and notify about failures
    pub async fn run_cycle(&self) -> Result<RunSummary> {
        let summary = self.service.validate_all().await?;

        if !summary.failed_addresses.is_empty() {
            // Delivery problems must not take the worker down.
            if let Err(e) = self
                .notifier
                .send(&summary.statistics, &summary.failed_addresses)
                .await
            {
                error!("Could not deliver notification: {}", e);
            }
        }

        Ok(summary)
    }
}
