//! Application layer - use cases and orchestration.
//!
//! This layer contains session routing, typing state, cloud
//! reconciliation, device discovery and output formatting.

pub mod discovery;
pub mod formatter;
pub mod registry;
pub mod router;
pub mod services;
pub mod sync_service;
pub mod typing;

pub use discovery::{merge_devices, DeviceDiscoveryAggregator};
pub use formatter::{
    format_devices_table, format_json, format_messages_table, format_pending,
    format_sync_outcome, format_sync_status, OutputFormat,
};
pub use registry::{ConnectionRegistry, DeviceMeta, SessionInfo, SocketHandle};
pub use router::{MessageRouter, RouteOutcome};
pub use services::Services;
pub use sync_service::{CloudSyncScheduler, SyncOutcome, SyncTrigger};
pub use typing::TypingIndicatorManager;
