//! Domain models for chat messages and discovered devices.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved recipient value meaning "everyone connected except the sender".
pub const BROADCAST_MARKER: &str = "all";

/// Prefix of names produced by probes that have no real identity data.
pub const GENERIC_NAME_PREFIX: &str = "Device-";

/// Whether a message has reached the cloud store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Only stored locally.
    #[default]
    Unsynced,
    /// Committed to the cloud sink. Never reverts.
    Synced,
}

/// Delivery progress of a directed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryState {
    /// Wire/storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for DeliveryState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown delivery state: {s}")),
        }
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audience of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Recipient {
    /// Every connected identity except the sender.
    Broadcast,
    /// A single identity.
    Direct(String),
}

impl Recipient {
    /// Interpret an optional wire value; absent, empty and `all` mean broadcast.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("" | BROADCAST_MARKER) => Self::Broadcast,
            Some(identity) => Self::Direct(identity.to_string()),
        }
    }

    /// The directed identity, if any.
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        match self {
            Self::Broadcast => None,
            Self::Direct(identity) => Some(identity),
        }
    }

    /// Wire/storage representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.identity().unwrap_or(BROADCAST_MARKER)
    }
}

impl From<String> for Recipient {
    fn from(value: String) -> Self {
        Self::parse(Some(&value))
    }
}

impl From<Recipient> for String {
    fn from(value: Recipient) -> Self {
        value.as_str().to_string()
    }
}

/// A persisted chat message.
///
/// `id` is the idempotency key for local persistence and cloud upserts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub content: String,
    pub sender: String,
    pub recipient: Recipient,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sync_state: SyncState,
    /// Only tracked for directed messages.
    #[serde(default)]
    pub delivery_state: Option<DeliveryState>,
}

impl Message {
    /// Create an unsynced message. Directed messages start as `sent`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        sender: impl Into<String>,
        recipient: Recipient,
        created_at: DateTime<Utc>,
    ) -> Self {
        let delivery_state = match recipient {
            Recipient::Broadcast => None,
            Recipient::Direct(_) => Some(DeliveryState::Sent),
        };

        Self {
            id: id.into(),
            content: content.into(),
            sender: sender.into(),
            recipient,
            created_at,
            sync_state: SyncState::Unsynced,
            delivery_state,
        }
    }

    /// Whether this message targets a single identity.
    #[must_use]
    pub const fn is_directed(&self) -> bool {
        matches!(self.recipient, Recipient::Direct(_))
    }

    /// Whether this message has been committed to the cloud.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.sync_state == SyncState::Synced
    }
}

/// Reachability of a discovered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// A device seen on the local network during one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredDevice {
    pub id: String,
    #[serde(rename = "name")]
    pub display_name: String,
    pub ip: IpAddr,
    pub status: DeviceStatus,
    #[serde(rename = "lastSeen")]
    pub last_seen_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    /// 0-100, how much identity data the reporting probe had.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_confidence: Option<u8>,
}

impl DiscoveredDevice {
    /// An online device seen now.
    #[must_use]
    pub fn online(id: impl Into<String>, display_name: impl Into<String>, ip: IpAddr) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            ip,
            status: DeviceStatus::Online,
            last_seen_at: Utc::now(),
            mac: None,
            source_confidence: None,
        }
    }

    /// Attach a hardware address.
    #[must_use]
    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        self.mac = Some(mac.into());
        self
    }

    /// Attach a source confidence.
    #[must_use]
    pub const fn with_confidence(mut self, confidence: u8) -> Self {
        self.source_confidence = Some(confidence);
        self
    }

    /// Whether the display name is a placeholder.
    #[must_use]
    pub fn has_generic_name(&self) -> bool {
        is_generic_name(&self.display_name)
    }
}

/// Generic placeholder name for an address, e.g. `Device-42`.
#[must_use]
pub fn generic_name(ip: IpAddr) -> String {
    let suffix = match ip {
        IpAddr::V4(v4) => v4.octets()[3].to_string(),
        IpAddr::V6(v6) => format!("{:x}", v6.segments()[7]),
    };
    format!("{GENERIC_NAME_PREFIX}{suffix}")
}

/// Whether a name was produced by a probe without real identity data.
#[must_use]
pub fn is_generic_name(name: &str) -> bool {
    name.is_empty() || name.starts_with(GENERIC_NAME_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_parse() {
        assert_eq!(Recipient::parse(None), Recipient::Broadcast);
        assert_eq!(Recipient::parse(Some("all")), Recipient::Broadcast);
        assert_eq!(Recipient::parse(Some("  ")), Recipient::Broadcast);
        assert_eq!(
            Recipient::parse(Some("bob")),
            Recipient::Direct("bob".into())
        );
    }

    #[test]
    fn test_message_serializes_recipient_marker() {
        let msg = Message::new("m1", "hi", "alice", Recipient::Broadcast, Utc::now());
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["recipient"], "all");
        assert_eq!(json["syncState"], "unsynced");
        assert!(json["deliveryState"].is_null());
    }

    #[test]
    fn test_directed_message_starts_sent() {
        let msg = Message::new("m1", "hi", "alice", Recipient::parse(Some("bob")), Utc::now());
        assert!(msg.is_directed());
        assert_eq!(msg.delivery_state, Some(DeliveryState::Sent));
    }

    #[test]
    fn test_generic_names() {
        let ip: IpAddr = "192.168.1.42".parse().unwrap();
        assert_eq!(generic_name(ip), "Device-42");
        assert!(is_generic_name("Device-42"));
        assert!(!is_generic_name("Alice's Pixel 7"));
    }
}
