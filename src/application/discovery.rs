//! LAN device discovery.
//!
//! Fans out every configured probe concurrently, merges their partial
//! results by IP and keeps the latest merged list as the device directory.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::seq::IndexedRandom;
use rand::Rng;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    DeviceStatus, DiscoveredDevice, DiscoveryConfig, DiscoveryMode, Probe,
};
use crate::infrastructure::network::local_ip_or_loopback;

use super::registry::ConnectionRegistry;

const MODELS: &[&str] = &[
    "iPhone",
    "Galaxy S23",
    "Pixel 7",
    "MacBook Pro",
    "Surface Pro",
    "iPad Air",
    "ThinkPad X1",
    "Dell XPS",
    "ASUS ZenBook",
    "Chromebook",
    "iMac",
    "HP Spectre",
    "Lenovo Yoga",
    "Samsung Tab",
];

const OWNERS: &[&str] = &[
    "Alice", "Bob", "Charlie", "Diana", "Ethan", "Fiona", "George", "Hannah", "Ian", "Julia",
];

const PRIVATE_PREFIXES: &[[u8; 3]] = &[[192, 168, 1], [192, 168, 0], [10, 0, 0], [172, 16, 0]];

/// Confidence assigned to live sessions, which carry real identity data.
const SESSION_CONFIDENCE: u8 = 100;

/// Merge per-probe results keyed by IP.
///
/// The first non-generic name wins, a device is online if any probe saw it
/// online, `last_seen_at` is the latest report, the first known MAC is kept
/// and confidence is the highest reported.
#[must_use]
pub fn merge_devices(devices: impl IntoIterator<Item = DiscoveredDevice>) -> Vec<DiscoveredDevice> {
    let mut merged: Vec<DiscoveredDevice> = Vec::new();
    let mut index: HashMap<IpAddr, usize> = HashMap::new();

    for device in devices {
        let Some(&slot) = index.get(&device.ip) else {
            index.insert(device.ip, merged.len());
            merged.push(device);
            continue;
        };

        let existing = &mut merged[slot];
        if existing.has_generic_name() && !device.has_generic_name() {
            existing.display_name = device.display_name;
        }
        if device.status == DeviceStatus::Online {
            existing.status = DeviceStatus::Online;
        }
        if device.last_seen_at > existing.last_seen_at {
            existing.last_seen_at = device.last_seen_at;
        }
        if existing.mac.is_none() {
            existing.mac = device.mac;
        }
        existing.source_confidence = existing.source_confidence.max(device.source_confidence);
    }

    merged
}

/// Manufacture `count` plausible devices on private ranges.
#[must_use]
pub fn simulate(count: usize) -> Vec<DiscoveredDevice> {
    let mut rng = rand::rng();

    (0..count)
        .map(|_| {
            let owner = OWNERS.choose(&mut rng).copied().unwrap_or("Alex");
            let model = MODELS.choose(&mut rng).copied().unwrap_or("Laptop");
            let [a, b, c] = PRIVATE_PREFIXES
                .choose(&mut rng)
                .copied()
                .unwrap_or([192, 168, 1]);
            let ip = IpAddr::V4(Ipv4Addr::new(a, b, c, rng.random_range(2..=254)));

            let mut device =
                DiscoveredDevice::online(format!("sim-{}", short_uuid()), format!("{owner}'s {model}"), ip);
            if !rng.random_bool(0.8) {
                device.status = DeviceStatus::Offline;
                device.last_seen_at =
                    Utc::now() - chrono::Duration::seconds(rng.random_range(60..86_400));
            }
            device
        })
        .collect()
}

fn short_uuid() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

/// Concurrent multi-probe scanner and holder of the last scan result.
pub struct DeviceDiscoveryAggregator {
    probes: Vec<Arc<dyn Probe>>,
    mode: DiscoveryMode,
    probe_timeout: Duration,
    simulated_count: usize,
    registry: Option<Arc<ConnectionRegistry>>,
    devices: RwLock<Vec<DiscoveredDevice>>,
}

impl DeviceDiscoveryAggregator {
    #[must_use]
    pub fn new(probes: Vec<Arc<dyn Probe>>, config: &DiscoveryConfig) -> Self {
        Self {
            probes,
            mode: config.mode,
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
            simulated_count: config.simulated_count,
            registry: None,
            devices: RwLock::new(Vec::new()),
        }
    }

    /// Contribute live sessions with a known address to every scan.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ConnectionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Run a full discovery pass and replace the device list with its result.
    pub async fn scan(&self) -> Vec<DiscoveredDevice> {
        let devices = match self.mode {
            DiscoveryMode::Simulated => {
                let mut devices = vec![DiscoveredDevice::online(
                    format!("this-device-{}", short_uuid()),
                    "This Device",
                    local_ip_or_loopback(),
                )];
                devices.extend(simulate(self.simulated_count));
                devices
            }
            DiscoveryMode::Real => self.scan_network().await,
            DiscoveryMode::RealWithFallback => {
                let found = self.scan_network().await;
                if found.is_empty() {
                    tracing::info!(
                        count = self.simulated_count,
                        "No devices found on the network, using simulated devices"
                    );
                    simulate(self.simulated_count)
                } else {
                    found
                }
            }
        };

        tracing::info!(count = devices.len(), mode = ?self.mode, "Device scan completed");
        *self.devices.write().await = devices.clone();
        devices
    }

    /// Devices from the last scan.
    pub async fn devices(&self) -> Vec<DiscoveredDevice> {
        self.devices.read().await.clone()
    }

    async fn scan_network(&self) -> Vec<DiscoveredDevice> {
        let scans = self.probes.iter().map(|probe| {
            let probe = Arc::clone(probe);
            let limit = self.probe_timeout;
            async move {
                match tokio::time::timeout(limit, probe.scan()).await {
                    Ok(found) => {
                        tracing::debug!(probe = probe.name(), count = found.len(), "Probe finished");
                        found
                    }
                    Err(_) => {
                        tracing::warn!(probe = probe.name(), "Probe timed out");
                        Vec::new()
                    }
                }
            }
        });

        let probed = futures::future::join_all(scans).await;
        let sessions = self.session_devices().await;

        merge_devices(sessions.into_iter().chain(probed.into_iter().flatten()))
    }

    async fn session_devices(&self) -> Vec<DiscoveredDevice> {
        let Some(registry) = &self.registry else {
            return Vec::new();
        };

        registry
            .sessions()
            .await
            .into_iter()
            .filter_map(|session| {
                let ip = session.remote_ip.filter(|ip| !ip.is_loopback())?;
                let mut device =
                    DiscoveredDevice::online(session.device_id, session.device_name, ip)
                        .with_confidence(SESSION_CONFIDENCE);
                device.last_seen_at = session.last_seen_at;
                Some(device)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::registry::{DeviceMeta, SocketHandle};
    use async_trait::async_trait;

    struct FakeProbe {
        devices: Vec<DiscoveredDevice>,
        delay: Duration,
    }

    impl FakeProbe {
        fn returning(devices: Vec<DiscoveredDevice>) -> Arc<dyn Probe> {
            Arc::new(Self {
                devices,
                delay: Duration::ZERO,
            })
        }

        fn hanging() -> Arc<dyn Probe> {
            Arc::new(Self {
                devices: vec![device("Stuck", "10.0.0.99")],
                delay: Duration::from_secs(3600),
            })
        }
    }

    #[async_trait]
    impl Probe for FakeProbe {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn scan(&self) -> Vec<DiscoveredDevice> {
            tokio::time::sleep(self.delay).await;
            self.devices.clone()
        }
    }

    fn device(name: &str, ip: &str) -> DiscoveredDevice {
        DiscoveredDevice::online(format!("id-{name}"), name, ip.parse().unwrap())
    }

    fn config(mode: DiscoveryMode) -> DiscoveryConfig {
        DiscoveryConfig {
            mode,
            simulated_count: 3,
            ..DiscoveryConfig::default()
        }
    }

    #[test]
    fn test_merge_prefers_online_and_real_name() {
        let mut offline = device("Kitchen Speaker", "192.168.1.20");
        offline.status = DeviceStatus::Offline;
        offline.mac = Some("aa:bb:cc:dd:ee:ff".into());
        let generic = device("Device-20", "192.168.1.20").with_confidence(40);

        let merged = merge_devices(vec![generic, offline]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].display_name, "Kitchen Speaker");
        assert_eq!(merged[0].status, DeviceStatus::Online);
        assert_eq!(merged[0].mac.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(merged[0].source_confidence, Some(40));
    }

    #[test]
    fn test_merge_keeps_first_real_name_and_latest_seen() {
        let mut early = device("NAS", "192.168.1.5");
        early.last_seen_at = Utc::now() - chrono::Duration::hours(1);
        let late = device("Printer", "192.168.1.5");
        let latest = late.last_seen_at;

        let merged = merge_devices(vec![early, late, device("Phone", "192.168.1.6")]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].display_name, "NAS");
        assert_eq!(merged[0].last_seen_at, latest);
    }

    #[test]
    fn test_simulate_uses_private_ranges() {
        let devices = simulate(20);
        assert_eq!(devices.len(), 20);
        for device in devices {
            assert!(device.display_name.contains("'s "));
            match device.ip {
                IpAddr::V4(v4) => assert!(v4.is_private()),
                IpAddr::V6(_) => panic!("simulated devices are IPv4"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_does_not_block_others() {
        let aggregator = DeviceDiscoveryAggregator::new(
            vec![
                FakeProbe::hanging(),
                FakeProbe::returning(vec![device("Router", "192.168.1.1")]),
            ],
            &config(DiscoveryMode::Real),
        );

        let devices = aggregator.scan().await;

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].display_name, "Router");
        assert_eq!(aggregator.devices().await, devices);
    }

    #[tokio::test]
    async fn test_fallback_only_when_enabled() {
        let real = DeviceDiscoveryAggregator::new(
            vec![FakeProbe::returning(Vec::new())],
            &config(DiscoveryMode::Real),
        );
        assert!(real.scan().await.is_empty());

        let fallback = DeviceDiscoveryAggregator::new(
            vec![FakeProbe::returning(Vec::new())],
            &config(DiscoveryMode::RealWithFallback),
        );
        assert_eq!(fallback.scan().await.len(), 3);

        let found = DeviceDiscoveryAggregator::new(
            vec![FakeProbe::returning(vec![device("TV", "192.168.1.30")])],
            &config(DiscoveryMode::RealWithFallback),
        );
        assert_eq!(found.scan().await.len(), 1);
    }

    #[tokio::test]
    async fn test_simulated_mode_includes_this_device() {
        let aggregator = DeviceDiscoveryAggregator::new(
            vec![FakeProbe::returning(vec![device("TV", "192.168.1.30")])],
            &config(DiscoveryMode::Simulated),
        );

        let devices = aggregator.scan().await;

        assert_eq!(devices.len(), 4);
        assert_eq!(devices[0].display_name, "This Device");
        assert!(devices.iter().all(|d| d.display_name != "TV"));
    }

    #[tokio::test]
    async fn test_sessions_merge_with_probe_results() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (socket, _rx) = SocketHandle::channel();
        registry
            .register(
                "alice",
                socket,
                DeviceMeta::new(
                    Some("dev-1".into()),
                    Some("Alice's Laptop".into()),
                    Some("192.168.1.42".parse().unwrap()),
                ),
            )
            .await;

        let aggregator = DeviceDiscoveryAggregator::new(
            vec![FakeProbe::returning(vec![
                device("Device-42", "192.168.1.42").with_mac("00:11:22:33:44:55"),
            ])],
            &config(DiscoveryMode::Real),
        )
        .with_registry(registry);

        let devices = aggregator.scan().await;

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].display_name, "Alice's Laptop");
        assert_eq!(devices[0].source_confidence, Some(SESSION_CONFIDENCE));
        assert_eq!(devices[0].mac.as_deref(), Some("00:11:22:33:44:55"));
    }
}
