//! Infrastructure layer - external adapters (database, cloud, network).
//!
//! This layer handles all I/O operations and external dependencies.

pub mod cloud;
pub mod config;
pub mod local_storage;
pub mod network;
pub mod probes;

pub use cloud::{HttpCloudSink, MemoryCloudSink, StaticReachability, TcpReachability};
pub use config::{config_file_path, load_config, render_config, write_default_config};
pub use local_storage::LocalStorage;
pub use network::{local_ip_or_loopback, local_ipv4};
pub use probes::default_probes;
