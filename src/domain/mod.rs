//! Domain layer - core types, wire protocol and ports.
//!
//! This layer contains pure domain models, error types and the traits
//! behind which storage, cloud and network collaborators sit.

pub mod error;
pub mod models;
pub mod ports;
pub mod protocol;
pub mod sync;

pub use error::{AppError, Result};
pub use models::{
    generic_name, is_generic_name, DeliveryState, DeviceStatus, DiscoveredDevice, Message,
    Recipient, SyncState, BROADCAST_MARKER,
};
pub use ports::{CloudSink, MessageStore, Probe, Reachability};
pub use protocol::{PayloadKind, WirePayload};
pub use sync::{AppConfig, DiscoveryConfig, DiscoveryMode, SyncStatus};
