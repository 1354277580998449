//! Capabilities the core consumes from the outside world.
//!
//! Each collaborator is a trait so the broker, scheduler and discovery
//! aggregator can be driven by in-memory fakes in tests.

use async_trait::async_trait;

use super::error::Result;
use super::models::{DeliveryState, DiscoveredDevice, Message};

/// Durable, id-keyed message store.
pub trait MessageStore: Send + Sync {
    /// Upsert by id. Writing the same id twice never creates a duplicate
    /// and never lowers the sync state.
    fn put(&self, message: &Message) -> Result<()>;

    fn get(&self, id: &str) -> Result<Option<Message>>;

    fn list_all(&self) -> Result<Vec<Message>>;

    fn list_unsynced(&self) -> Result<Vec<Message>>;

    fn count_unsynced(&self) -> Result<usize>;

    /// Returns whether the message transitioned to synced.
    fn mark_synced(&self, id: &str) -> Result<bool>;

    /// Marks a committed batch in one transaction; returns transitions.
    fn mark_all_synced(&self, ids: &[String]) -> Result<usize>;

    /// Returns whether a directed message with this id was updated.
    /// Broadcasts never carry a delivery state.
    fn update_delivery_state(&self, id: &str, state: DeliveryState) -> Result<bool>;

    /// Bumps the attempt counter of every id and records the error.
    fn record_sync_failure(&self, ids: &[String], error: &str) -> Result<()>;

    /// Unsynced messages with at least `attempts` failed attempts.
    fn list_stuck(&self, attempts: u32) -> Result<Vec<(String, u32)>>;
}

/// Remote document store receiving batched upserts.
#[async_trait]
pub trait CloudSink: Send + Sync {
    /// Commits the whole batch or fails as a whole. Keyed by message id.
    async fn upsert_batch(&self, messages: &[Message]) -> Result<()>;

    /// Full remote message set.
    async fn fetch_all(&self) -> Result<Vec<Message>>;
}

/// Whether the cloud side can currently be reached.
#[async_trait]
pub trait Reachability: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// One independent network discovery technique.
///
/// Implementations swallow their own failures and return an empty list.
#[async_trait]
pub trait Probe: Send + Sync {
    fn name(&self) -> &'static str;

    async fn scan(&self) -> Vec<DiscoveredDevice>;
}
