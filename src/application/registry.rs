//! Live session registry.
//!
//! Maps each verified identity to the socket that currently owns it. The
//! registry is constructed once and shared by the router, the typing
//! manager and the discovery aggregator.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::domain::WirePayload;

/// Outbound half of a client connection.
///
/// Frames are queued on an unbounded channel drained by the connection's
/// writer task; the handle counts as open while that task is alive.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<WirePayload>,
}

impl SocketHandle {
    /// Create a handle and the receiver its writer task drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WirePayload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the underlying connection is still accepting frames.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue a frame; returns false if the connection is gone.
    pub fn send(&self, payload: WirePayload) -> bool {
        self.tx.send(payload).is_ok()
    }

    /// Same underlying connection.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// Device details supplied at handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceMeta {
    pub device_id: String,
    pub device_name: String,
    pub remote_ip: Option<IpAddr>,
}

impl DeviceMeta {
    #[must_use]
    pub fn new(
        device_id: Option<String>,
        device_name: Option<String>,
        remote_ip: Option<IpAddr>,
    ) -> Self {
        Self {
            device_id: device_id.unwrap_or_else(|| "unknown-device".to_string()),
            device_name: device_name.unwrap_or_else(|| "Unknown Device".to_string()),
            remote_ip,
        }
    }
}

/// A live, routable connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub identity: String,
    pub socket: SocketHandle,
    pub device: DeviceMeta,
    pub last_seen_at: DateTime<Utc>,
}

/// Serializable view of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub identity: String,
    pub device_id: String,
    pub device_name: String,
    pub remote_ip: Option<IpAddr>,
    pub last_seen_at: DateTime<Utc>,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            identity: session.identity.clone(),
            device_id: session.device.device_id.clone(),
            device_name: session.device.device_name.clone(),
            remote_ip: session.device.remote_ip,
            last_seen_at: session.last_seen_at,
        }
    }
}

/// Identity to socket map. At most one session per identity.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `identity`, superseding any previous session. The previous
    /// socket is returned, not closed.
    pub async fn register(
        &self,
        identity: &str,
        socket: SocketHandle,
        device: DeviceMeta,
    ) -> Option<Session> {
        let session = Session {
            identity: identity.to_string(),
            socket,
            device,
            last_seen_at: Utc::now(),
        };

        let previous = self
            .sessions
            .write()
            .await
            .insert(identity.to_string(), session);

        if previous.is_some() {
            tracing::info!(identity, "Session superseded by new handshake");
        } else {
            tracing::debug!(identity, "Session registered");
        }
        previous
    }

    /// Remove `identity` unconditionally.
    pub async fn unregister(&self, identity: &str) -> Option<Session> {
        self.sessions.write().await.remove(identity)
    }

    /// Remove `identity` only if it is still owned by `socket`. A superseded
    /// connection closing must not evict its replacement.
    pub async fn release(&self, identity: &str, socket: &SocketHandle) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(identity) {
            Some(session) if session.socket.same_as(socket) => {
                sessions.remove(identity);
                true
            }
            _ => false,
        }
    }

    /// Socket currently owning `identity`.
    pub async fn lookup(&self, identity: &str) -> Option<SocketHandle> {
        self.sessions
            .read()
            .await
            .get(identity)
            .map(|s| s.socket.clone())
    }

    /// Refresh `lastSeenAt` for `identity`.
    pub async fn touch(&self, identity: &str) {
        if let Some(session) = self.sessions.write().await.get_mut(identity) {
            session.last_seen_at = Utc::now();
        }
    }

    /// Send to every open socket except `exclude`. Returns recipients reached.
    pub async fn broadcast(&self, payload: &WirePayload, exclude: Option<&SocketHandle>) -> usize {
        let sessions = self.sessions.read().await;

        sessions
            .values()
            .filter(|s| exclude.is_none_or(|ex| !s.socket.same_as(ex)))
            .filter(|s| s.socket.is_open())
            .filter(|s| s.socket.send(payload.clone()))
            .count()
    }

    /// Snapshot of live sessions.
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .read()
            .await
            .values()
            .map(SessionInfo::from)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
