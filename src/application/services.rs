//! Construction of the shared service graph.
//!
//! Every component is built once here and injected into its consumers;
//! nothing is reachable through a global.

use std::sync::Arc;

use crate::domain::{AppConfig, AppError, CloudSink, MessageStore, Probe, Reachability, Result};
use crate::infrastructure::{
    default_probes, HttpCloudSink, LocalStorage, MemoryCloudSink, StaticReachability,
    TcpReachability,
};

use super::discovery::DeviceDiscoveryAggregator;
use super::registry::ConnectionRegistry;
use super::router::MessageRouter;
use super::sync_service::CloudSyncScheduler;
use super::typing::TypingIndicatorManager;

/// Shared handles to every long-lived component.
#[derive(Clone)]
pub struct Services {
    pub registry: Arc<ConnectionRegistry>,
    pub store: Arc<dyn MessageStore>,
    pub scheduler: Arc<CloudSyncScheduler>,
    pub router: Arc<MessageRouter>,
    pub discovery: Arc<DeviceDiscoveryAggregator>,
}

impl Services {
    /// Build the production graph: on-disk store, configured cloud sink and
    /// the platform probes.
    ///
    /// # Errors
    /// Returns error if the data directory or database cannot be opened, or
    /// the HTTP client cannot be built.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let data_dir = config.data_dir();
        std::fs::create_dir_all(&data_dir).map_err(|e| {
            AppError::io(format!("Failed to create {}", data_dir.display()), e)
        })?;

        let store = Arc::new(LocalStorage::open(&config.storage_db_path())?);

        let (sink, reachability): (Arc<dyn CloudSink>, Arc<dyn Reachability>) =
            match config.cloud.endpoint.as_deref() {
                Some(endpoint) => {
                    tracing::info!(endpoint, "Using HTTP cloud sink");
                    (
                        Arc::new(HttpCloudSink::new(endpoint, &config.cloud)?),
                        Arc::new(TcpReachability::from_config(&config.cloud)),
                    )
                }
                // Nothing may be marked synced without a durable remote, so the
                // placeholder sink sits behind a permanently offline network.
                None => {
                    tracing::warn!(
                        "No cloud endpoint configured, messages stay unsynced until one is set"
                    );
                    (
                        Arc::new(MemoryCloudSink::new()),
                        Arc::new(StaticReachability::new(false)),
                    )
                }
            };

        Ok(Self::assemble(
            config,
            store,
            sink,
            reachability,
            default_probes(&config.discovery),
        ))
    }

    /// Wire the components around the given collaborators.
    #[must_use]
    pub fn assemble(
        config: &AppConfig,
        store: Arc<dyn MessageStore>,
        sink: Arc<dyn CloudSink>,
        reachability: Arc<dyn Reachability>,
        probes: Vec<Arc<dyn Probe>>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let typing = Arc::new(TypingIndicatorManager::new(
            Arc::clone(&registry),
            config.typing_timeout(),
        ));
        let scheduler = Arc::new(
            CloudSyncScheduler::new(Arc::clone(&store), sink, reachability)
                .with_warn_threshold(config.sync.warn_after_attempts),
        );
        let router = Arc::new(MessageRouter::new(
            Arc::clone(&registry),
            typing,
            Arc::clone(&store),
            Arc::clone(&scheduler),
        ));
        let discovery = Arc::new(
            DeviceDiscoveryAggregator::new(probes, &config.discovery)
                .with_registry(Arc::clone(&registry)),
        );

        Self {
            registry,
            store,
            scheduler,
            router,
            discovery,
        }
    }
}
