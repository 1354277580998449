//! Cloud reconciliation for locally stored messages.
//!
//! Drains unsynced messages into the cloud sink on a fixed interval and on
//! demand. A batch is marked synced only after the sink commits it as a
//! whole, so a failed run leaves everything for the next cycle.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::domain::{
    AppError, CloudSink, Message, MessageStore, Reachability, Result, SyncStatus,
};

/// What started a to-cloud run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Periodic task; silent when offline.
    Background,
    /// Explicit request; offline is an error.
    Manual,
}

/// Result of a to-cloud run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum SyncOutcome {
    /// No unsynced messages; the sink was not called.
    NothingToSync,
    /// A batch of `count` messages was committed.
    Synced { count: usize },
    /// Background run skipped because the network is unreachable.
    Offline,
}

impl SyncOutcome {
    /// Human readable summary.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::NothingToSync => "No messages to sync".to_string(),
            Self::Synced { count } => format!("Successfully synced {count} messages"),
            Self::Offline => "Skipped, network unreachable".to_string(),
        }
    }
}

/// Service reconciling the local store with the cloud sink.
pub struct CloudSyncScheduler {
    store: Arc<dyn MessageStore>,
    sink: Arc<dyn CloudSink>,
    reachability: Arc<dyn Reachability>,
    warn_after_attempts: u32,
    status: RwLock<SyncStatus>,
}

impl CloudSyncScheduler {
    #[must_use]
    pub fn new(
        store: Arc<dyn MessageStore>,
        sink: Arc<dyn CloudSink>,
        reachability: Arc<dyn Reachability>,
    ) -> Self {
        Self {
            store,
            sink,
            reachability,
            warn_after_attempts: 20,
            status: RwLock::new(SyncStatus::default()),
        }
    }

    /// Failed attempts after which a message is reported at warn level.
    #[must_use]
    pub const fn with_warn_threshold(mut self, attempts: u32) -> Self {
        self.warn_after_attempts = attempts;
        self
    }

    /// Push every unsynced message to the cloud as one batch.
    ///
    /// # Errors
    /// `Unavailable` for a manual run while offline; store and sink errors
    /// otherwise. A background run never reports offline as an error.
    pub async fn sync_to_cloud(&self, trigger: SyncTrigger) -> Result<SyncOutcome> {
        if !self.reachability.is_reachable().await {
            return match trigger {
                SyncTrigger::Background => {
                    tracing::debug!("Background sync skipped, network unreachable");
                    Ok(SyncOutcome::Offline)
                }
                SyncTrigger::Manual => Err(AppError::unavailable(
                    "Cannot sync, internet is offline",
                )),
            };
        }

        let pending = self.store.list_unsynced()?;
        if pending.is_empty() {
            tracing::debug!("Found 0 pending messages for sync");
            return Ok(SyncOutcome::NothingToSync);
        }

        self.update_status(SyncStatus::syncing).await;
        tracing::info!(count = pending.len(), ?trigger, "Syncing messages to cloud");

        let ids: Vec<String> = pending.iter().map(|m| m.id.clone()).collect();

        if let Err(e) = self.sink.upsert_batch(&pending).await {
            tracing::error!(error = %e, count = ids.len(), "Cloud batch failed, will retry next cycle");
            if let Err(record_err) = self.store.record_sync_failure(&ids, &e.to_string()) {
                tracing::warn!(error = %record_err, "Failed to record sync failure");
            }
            self.report_stuck();
            let message = e.to_string();
            self.update_status(|s| s.with_error(message)).await;
            return Err(e);
        }

        // The sink committed; a store failure here only causes a redundant
        // upsert next cycle.
        let transitioned = match self.store.mark_all_synced(&ids) {
            Ok(n) => n,
            Err(e) => {
                let message = e.to_string();
                self.update_status(|s| s.with_error(message)).await;
                return Err(e);
            }
        };

        tracing::info!(
            synced = transitioned,
            batch = ids.len(),
            "Cloud sync completed"
        );
        self.update_status(|s| s.completed(transitioned)).await;

        Ok(SyncOutcome::Synced { count: ids.len() })
    }

    /// Best-effort immediate push of a single message.
    ///
    /// Returns whether the message is now synced. Failures are logged and
    /// leave the message for the scheduler.
    pub async fn push_now(&self, message: &Message) -> bool {
        if !self.reachability.is_reachable().await {
            tracing::debug!(id = %message.id, "Offline, message will sync later");
            return false;
        }

        if let Err(e) = self.sink.upsert_batch(std::slice::from_ref(message)).await {
            tracing::info!(id = %message.id, error = %e, "Could not sync message immediately, will sync later");
            return false;
        }

        match self.store.mark_synced(&message.id) {
            Ok(_) => {
                tracing::debug!(id = %message.id, "Message synced to cloud immediately");
                true
            }
            Err(e) => {
                tracing::warn!(id = %message.id, error = %e, "Failed to mark message synced");
                false
            }
        }
    }

    /// Full remote message set, for client-side de-duplication by id.
    ///
    /// # Errors
    /// `Unavailable` while offline, or the sink's error.
    pub async fn fetch_from_cloud(&self) -> Result<Vec<Message>> {
        if !self.reachability.is_reachable().await {
            return Err(AppError::unavailable("Cannot sync, internet is offline"));
        }
        self.sink.fetch_all().await
    }

    /// Count of messages waiting for the cloud.
    ///
    /// # Errors
    /// Returns error if the store cannot be queried.
    pub fn pending_count(&self) -> Result<usize> {
        self.store.count_unsynced()
    }

    /// Current scheduler status.
    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Start the periodic task. Runs until the handle is aborted.
    #[must_use]
    pub fn spawn_periodic(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = scheduler.sync_to_cloud(SyncTrigger::Background).await {
                    tracing::error!(error = %e, "Background sync error");
                }
            }
        })
    }

    async fn update_status(&self, f: impl FnOnce(SyncStatus) -> SyncStatus) {
        let mut status = self.status.write().await;
        *status = f(std::mem::take(&mut *status));
    }

    fn report_stuck(&self) {
        match self.store.list_stuck(self.warn_after_attempts) {
            Ok(stuck) if !stuck.is_empty() => {
                for (id, attempts) in &stuck {
                    tracing::warn!(id = %id, attempts, "Message repeatedly failing to sync");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "Could not inspect sync attempts"),
        }
    }
}
