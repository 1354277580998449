//! Socket wire protocol.
//!
//! Every frame in either direction is a single JSON object discriminated
//! by `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::models::{DeliveryState, Message, Recipient};

/// Sender used for frames the server originates.
pub const SYSTEM_SENDER: &str = "system";

/// Content of a typing frame that ends a typing burst.
pub const TYPING_STOPPED: &str = "stopped";

/// Frame discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Message,
    Typing,
    Delivery,
    Status,
}

/// A socket frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePayload {
    #[serde(rename = "type")]
    pub kind: PayloadKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    /// Epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_status: Option<DeliveryState>,
}

impl WirePayload {
    /// Empty frame of the given kind.
    #[must_use]
    pub const fn new(kind: PayloadKind) -> Self {
        Self {
            kind,
            content: None,
            sender: None,
            id: None,
            recipient: None,
            timestamp: None,
            device_id: None,
            device_name: None,
            delivery_status: None,
        }
    }

    /// Server-originated status notice.
    #[must_use]
    pub fn status(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            sender: Some(SYSTEM_SENDER.to_string()),
            timestamp: Some(Utc::now().timestamp_millis()),
            ..Self::new(PayloadKind::Status)
        }
    }

    /// Server-originated delivery notification for `message_id`.
    #[must_use]
    pub fn delivery(message_id: &str, state: DeliveryState, to: Option<&str>) -> Self {
        Self {
            content: Some(state.as_str().to_string()),
            sender: Some(SYSTEM_SENDER.to_string()),
            id: Some(message_id.to_string()),
            recipient: to.map(str::to_string),
            timestamp: Some(Utc::now().timestamp_millis()),
            delivery_status: Some(state),
            ..Self::new(PayloadKind::Delivery)
        }
    }

    /// Synthetic end-of-typing frame for `sender`.
    #[must_use]
    pub fn typing_stopped(sender: &str, recipient: Option<&str>) -> Self {
        Self {
            content: Some(TYPING_STOPPED.to_string()),
            sender: Some(sender.to_string()),
            recipient: recipient.map(str::to_string),
            timestamp: Some(Utc::now().timestamp_millis()),
            ..Self::new(PayloadKind::Typing)
        }
    }

    /// Frame carrying a stored message.
    #[must_use]
    pub fn from_message(message: &Message) -> Self {
        Self {
            content: Some(message.content.clone()),
            sender: Some(message.sender.clone()),
            id: Some(message.id.clone()),
            recipient: Some(message.recipient.as_str().to_string()),
            timestamp: Some(message.created_at.timestamp_millis()),
            ..Self::new(PayloadKind::Message)
        }
    }

    /// Non-blank content, if any.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.is_empty())
    }

    /// Non-blank sender, if any.
    #[must_use]
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref().filter(|s| !s.is_empty())
    }

    /// Parsed audience of this frame.
    #[must_use]
    pub fn audience(&self) -> Recipient {
        Recipient::parse(self.recipient.as_deref())
    }

    /// Frame timestamp, defaulting to now.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.timestamp
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now)
    }

    /// Delivery state carried by a `delivery` frame or a `status` frame
    /// whose content names one.
    #[must_use]
    pub fn delivery_update(&self) -> Option<DeliveryState> {
        match self.kind {
            PayloadKind::Delivery => self
                .delivery_status
                .or_else(|| self.content.as_deref().and_then(|c| c.parse().ok())),
            PayloadKind::Status => self
                .content
                .as_deref()
                .and_then(|c| c.parse::<DeliveryState>().ok())
                .filter(|s| *s != DeliveryState::Sent),
            _ => None,
        }
    }

    /// Whether this is a typing frame that ends a burst.
    #[must_use]
    pub fn is_typing_stop(&self) -> bool {
        self.kind == PayloadKind::Typing && self.content.as_deref() == Some(TYPING_STOPPED)
    }
}
