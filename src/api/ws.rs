//! WebSocket session lifecycle.
//!
//! Each connection gets a `SocketHandle` whose channel is drained by a
//! writer task; inbound text frames go to the router. The session is
//! released on close only if this connection still owns the identity.

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::application::{ConnectionRegistry, DeviceMeta, Services, SocketHandle};
use crate::domain::WirePayload;

const AUTH_REQUIRED: &str = "authentication_required";
const CONNECTED: &str = "connected";

/// Query parameters supplied when the socket is opened. `username` is the
/// identity verified by the external auth layer.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub username: Option<String>,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
}

impl Handshake {
    fn identity(&self) -> Option<String> {
        self.username
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
    }

    fn device(&self, remote_ip: IpAddr) -> DeviceMeta {
        DeviceMeta::new(
            self.device_id.clone(),
            self.device_name.clone(),
            Some(remote_ip),
        )
    }
}

pub async fn upgrade(
    ws: WebSocketUpgrade,
    Query(handshake): Query<Handshake>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(services): State<Services>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, handshake, addr.ip(), services))
}

async fn handle_socket(
    socket: WebSocket,
    handshake: Handshake,
    remote_ip: IpAddr,
    services: Services,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let Some(identity) = handshake.identity() else {
        tracing::info!(%remote_ip, "Socket opened without identity");
        if let Ok(text) = serde_json::to_string(&WirePayload::status(AUTH_REQUIRED)) {
            let _ = ws_tx.send(WsMessage::Text(text.into())).await;
        }
        let _ = ws_tx.close().await;
        return;
    };

    let (handle, mut outbound) = SocketHandle::channel();
    join(
        &services.registry,
        &identity,
        &handle,
        handshake.device(remote_ip),
    )
    .await;

    let mut send_task = tokio::spawn(async move {
        while let Some(payload) = outbound.recv().await {
            let text = match serde_json::to_string(&payload) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to encode frame");
                    continue;
                }
            };
            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let router = services.router.clone();
    let origin = handle.clone();
    let sender = identity.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = ws_rx.next().await {
            match frame {
                WsMessage::Text(text) => {
                    router.handle_text(&origin, Some(&sender), text.as_str()).await;
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    leave(&services.registry, &identity, &handle).await;
}

/// Register `socket` as `identity` and announce it.
pub async fn join(
    registry: &ConnectionRegistry,
    identity: &str,
    socket: &SocketHandle,
    device: DeviceMeta,
) {
    tracing::info!(
        identity,
        socket = %socket.id(),
        device = %device.device_name,
        "Client connected"
    );
    registry.register(identity, socket.clone(), device).await;

    socket.send(WirePayload::status(CONNECTED));
    registry
        .broadcast(
            &WirePayload::status(format!("{identity} has joined the chat")),
            Some(socket),
        )
        .await;
}

/// Release `identity` if `socket` still owns it and announce the departure.
/// Returns whether the session was released.
pub async fn leave(registry: &ConnectionRegistry, identity: &str, socket: &SocketHandle) -> bool {
    if !registry.release(identity, socket).await {
        tracing::debug!(identity, "Superseded connection closed");
        return false;
    }

    tracing::info!(identity, "Client disconnected");
    registry
        .broadcast(
            &WirePayload::status(format!("{identity} has left the chat")),
            Some(socket),
        )
        .await;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn contents(rx: &mut UnboundedReceiver<WirePayload>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.extend(frame.content);
        }
        out
    }

    #[test]
    fn test_handshake_identity() {
        let handshake = Handshake {
            username: Some("  ".into()),
            ..Handshake::default()
        };
        assert!(handshake.identity().is_none());

        let handshake = Handshake {
            username: Some("alice".into()),
            ..Handshake::default()
        };
        assert_eq!(handshake.identity().as_deref(), Some("alice"));
        let device = handshake.device("192.168.1.10".parse().unwrap());
        assert_eq!(device.device_name, "Unknown Device");
    }

    #[tokio::test]
    async fn test_join_and_leave_announcements() {
        let registry = ConnectionRegistry::new();
        let (alice, mut alice_rx) = SocketHandle::channel();
        let (bob, mut bob_rx) = SocketHandle::channel();

        join(&registry, "alice", &alice, DeviceMeta::default()).await;
        join(&registry, "bob", &bob, DeviceMeta::default()).await;

        assert_eq!(
            contents(&mut alice_rx),
            vec!["connected".to_string(), "bob has joined the chat".to_string()]
        );
        assert_eq!(contents(&mut bob_rx), vec!["connected".to_string()]);

        assert!(leave(&registry, "bob", &bob).await);
        assert_eq!(contents(&mut alice_rx), vec!["bob has left the chat".to_string()]);
    }

    #[tokio::test]
    async fn test_superseded_connection_does_not_evict() {
        let registry = ConnectionRegistry::new();
        let (old, _old_rx) = SocketHandle::channel();
        let (new, _new_rx) = SocketHandle::channel();

        join(&registry, "alice", &old, DeviceMeta::default()).await;
        join(&registry, "alice", &new, DeviceMeta::default()).await;

        assert!(!leave(&registry, "alice", &old).await);
        assert!(registry.lookup("alice").await.unwrap().same_as(&new));
    }
}
