//! Inbound socket event routing.
//!
//! Classifies each frame by its `type`, persists chat messages, delivers
//! them through the registry and reports the delivery outcome back to the
//! sender. Persistence and cloud failures are logged and never stop
//! delivery.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::{
    DeliveryState, Message, MessageStore, PayloadKind, Recipient, Result, SyncState, WirePayload,
};

use super::registry::{ConnectionRegistry, SocketHandle};
use super::sync_service::CloudSyncScheduler;
use super::typing::TypingIndicatorManager;

const INVALID_FORMAT: &str = "error: invalid message format";
const MISSING_FIELDS: &str = "error: message requires content and sender";
const MISSING_SENDER: &str = "error: sender is required";
const MISSING_ID: &str = "error: delivery update requires a message id";

/// What the router did with one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Malformed or incomplete frame; an error was sent to the origin.
    Rejected,
    /// Handed to the typing manager.
    Typing,
    /// Delivery state recorded; `forwarded` if the original sender was told.
    DeliveryUpdated {
        id: String,
        state: DeliveryState,
        forwarded: bool,
    },
    /// Group message fanned out to `recipients` sockets.
    Broadcast { id: String, recipients: usize },
    /// Directed message handed to the recipient's socket.
    Delivered { id: String },
    /// Directed message whose recipient had no live socket.
    Failed { id: String },
    /// Non-delivery status frame relayed without persistence.
    Relayed { recipients: usize },
}

/// Protocol state machine over the registry, typing manager and store.
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    typing: Arc<TypingIndicatorManager>,
    store: Arc<dyn MessageStore>,
    sync: Arc<CloudSyncScheduler>,
}

impl MessageRouter {
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        typing: Arc<TypingIndicatorManager>,
        store: Arc<dyn MessageStore>,
        sync: Arc<CloudSyncScheduler>,
    ) -> Self {
        Self {
            registry,
            typing,
            store,
            sync,
        }
    }

    /// Parse and route a raw text frame received on `origin`.
    pub async fn handle_text(
        &self,
        origin: &SocketHandle,
        identity: Option<&str>,
        raw: &str,
    ) -> RouteOutcome {
        match serde_json::from_str::<WirePayload>(raw) {
            Ok(payload) => self.handle_payload(origin, identity, payload).await,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid socket frame");
                origin.send(WirePayload::status(INVALID_FORMAT));
                RouteOutcome::Rejected
            }
        }
    }

    /// Route a decoded frame. `identity` is the verified identity of the
    /// session that owns `origin`, used when the frame omits a sender.
    pub async fn handle_payload(
        &self,
        origin: &SocketHandle,
        identity: Option<&str>,
        mut payload: WirePayload,
    ) -> RouteOutcome {
        if let Some(identity) = identity {
            self.registry.touch(identity).await;
            if payload.sender().is_none() {
                payload.sender = Some(identity.to_string());
            }
        }

        if let Some(state) = payload.delivery_update() {
            return self.update_delivery(origin, payload, state).await;
        }

        match payload.kind {
            PayloadKind::Typing => {
                let Some(sender) = payload.sender().map(str::to_string) else {
                    return reject(origin, MISSING_SENDER);
                };
                self.typing.signal(&sender, payload).await;
                RouteOutcome::Typing
            }
            PayloadKind::Message => self.route_message(origin, payload).await,
            PayloadKind::Status => self.relay_status(origin, payload).await,
            // A delivery frame without a recognizable state.
            PayloadKind::Delivery => reject(origin, INVALID_FORMAT),
        }
    }

    /// Persist a message received outside the socket path, then try the same
    /// immediate cloud push as socket-routed directed messages.
    ///
    /// # Errors
    /// Returns error if the message cannot be stored.
    pub async fn persist(&self, mut message: Message) -> Result<Message> {
        self.store.put(&message)?;
        tracing::info!(id = %message.id, sender = %message.sender, "Message stored");

        if message.is_directed() && self.sync.push_now(&message).await {
            message.sync_state = SyncState::Synced;
        }
        Ok(message)
    }

    async fn update_delivery(
        &self,
        origin: &SocketHandle,
        payload: WirePayload,
        state: DeliveryState,
    ) -> RouteOutcome {
        let Some(id) = payload.id.filter(|id| !id.is_empty()) else {
            return reject(origin, MISSING_ID);
        };

        match self.store.update_delivery_state(&id, state) {
            Ok(true) => tracing::debug!(id = %id, %state, "Delivery state updated"),
            Ok(false) => {
                tracing::debug!(id = %id, "Delivery update for unknown or broadcast message");
            }
            Err(e) => tracing::error!(id = %id, error = %e, "Failed to update delivery state"),
        }

        let original_sender = match self.store.get(&id) {
            Ok(found) => found.map(|m| m.sender),
            Err(e) => {
                tracing::error!(id = %id, error = %e, "Failed to load message for delivery update");
                None
            }
        };

        let mut forwarded = false;
        if let Some(sender) = original_sender
            .filter(|sender| payload.sender.as_deref() != Some(sender.as_str()))
        {
            if let Some(socket) = self.open_socket(&sender).await {
                forwarded = socket.send(WirePayload::delivery(&id, state, Some(&sender)));
            }
        }

        RouteOutcome::DeliveryUpdated {
            id,
            state,
            forwarded,
        }
    }

    async fn route_message(&self, origin: &SocketHandle, payload: WirePayload) -> RouteOutcome {
        let (Some(content), Some(sender)) = (payload.content(), payload.sender()) else {
            return reject(origin, MISSING_FIELDS);
        };

        let id = payload
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut message = Message::new(
            id.clone(),
            content,
            sender,
            payload.audience(),
            payload.created_at(),
        );

        if let Err(e) = self.store.put(&message) {
            tracing::error!(id = %id, error = %e, "Failed to persist message");
        }

        let Recipient::Direct(recipient) = message.recipient.clone() else {
            let recipients = self
                .registry
                .broadcast(&WirePayload::from_message(&message), Some(origin))
                .await;
            tracing::debug!(id = %id, recipients, "Broadcast message");
            return RouteOutcome::Broadcast { id, recipients };
        };

        let outcome = self.deliver_direct(origin, &mut message, &recipient).await;

        // Echo so the sender's client renders its own message.
        let mut echo = WirePayload::from_message(&message);
        echo.delivery_status = message.delivery_state;
        origin.send(echo);

        self.sync.push_now(&message).await;
        outcome
    }

    async fn deliver_direct(
        &self,
        origin: &SocketHandle,
        message: &mut Message,
        recipient: &str,
    ) -> RouteOutcome {
        let id = message.id.clone();
        let target = self.open_socket(recipient).await;

        let mut frame = WirePayload::from_message(message);
        frame.delivery_status = Some(DeliveryState::Sent);

        if target.is_some_and(|socket| socket.send(frame)) {
            tracing::debug!(id = %id, to = recipient, "Message delivered");
            origin.send(WirePayload::delivery(
                &id,
                DeliveryState::Delivered,
                Some(&message.sender),
            ));
            return RouteOutcome::Delivered { id };
        }

        tracing::info!(id = %id, to = recipient, "Recipient is not connected");
        message.delivery_state = Some(DeliveryState::Failed);
        if let Err(e) = self.store.update_delivery_state(&id, DeliveryState::Failed) {
            tracing::error!(id = %id, error = %e, "Failed to record failed delivery");
        }

        origin.send(WirePayload::delivery(
            &id,
            DeliveryState::Failed,
            Some(&message.sender),
        ));
        origin.send(WirePayload::status(format!(
            "User {recipient} is currently offline. Message will be delivered when they connect."
        )));

        RouteOutcome::Failed { id }
    }

    async fn relay_status(&self, origin: &SocketHandle, mut payload: WirePayload) -> RouteOutcome {
        if payload.content().is_none() || payload.sender().is_none() {
            return reject(origin, MISSING_FIELDS);
        }
        if payload.id.as_deref().is_none_or(str::is_empty) {
            payload.id = Some(Uuid::new_v4().to_string());
        }

        let recipients = match payload.audience() {
            Recipient::Broadcast => self.registry.broadcast(&payload, Some(origin)).await,
            Recipient::Direct(recipient) => self
                .open_socket(&recipient)
                .await
                .map_or(0, |socket| usize::from(socket.send(payload))),
        };

        RouteOutcome::Relayed { recipients }
    }

    async fn open_socket(&self, identity: &str) -> Option<SocketHandle> {
        self.registry
            .lookup(identity)
            .await
            .filter(SocketHandle::is_open)
    }
}

fn reject(origin: &SocketHandle, reason: &str) -> RouteOutcome {
    tracing::debug!(reason, "Rejected socket frame");
    origin.send(WirePayload::status(reason));
    RouteOutcome::Rejected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::registry::DeviceMeta;
    use chrono::Utc;
    use crate::infrastructure::{LocalStorage, MemoryCloudSink, StaticReachability};
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        router: MessageRouter,
        registry: Arc<ConnectionRegistry>,
        store: Arc<LocalStorage>,
        network: Arc<StaticReachability>,
    }

    fn harness(online: bool) -> Harness {
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(LocalStorage::open_in_memory().unwrap());
        let network = Arc::new(StaticReachability::new(online));
        let sync = Arc::new(CloudSyncScheduler::new(
            store.clone(),
            Arc::new(MemoryCloudSink::new()),
            network.clone(),
        ));
        let typing = Arc::new(TypingIndicatorManager::new(
            registry.clone(),
            Duration::from_secs(3),
        ));
        Harness {
            router: MessageRouter::new(registry.clone(), typing, store.clone(), sync),
            registry,
            store,
            network,
        }
    }

    async fn connect(
        registry: &ConnectionRegistry,
        identity: &str,
    ) -> (SocketHandle, UnboundedReceiver<WirePayload>) {
        let (socket, rx) = SocketHandle::channel();
        registry
            .register(identity, socket.clone(), DeviceMeta::default())
            .await;
        (socket, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<WirePayload>) -> Vec<WirePayload> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn deliveries(frames: &[WirePayload], state: DeliveryState) -> usize {
        frames
            .iter()
            .filter(|f| f.kind == PayloadKind::Delivery && f.delivery_status == Some(state))
            .count()
    }

    fn messages(frames: &[WirePayload]) -> usize {
        frames
            .iter()
            .filter(|f| f.kind == PayloadKind::Message)
            .count()
    }

    #[tokio::test]
    async fn test_direct_to_offline_recipient_fails() {
        let h = harness(false);
        let (alice, mut alice_rx) = connect(&h.registry, "alice").await;

        let outcome = h
            .router
            .handle_text(
                &alice,
                Some("alice"),
                r#"{"type":"message","id":"m1","sender":"alice","recipient":"bob","content":"hi"}"#,
            )
            .await;

        assert_eq!(outcome, RouteOutcome::Failed { id: "m1".into() });
        let frames = drain(&mut alice_rx);
        assert_eq!(deliveries(&frames, DeliveryState::Failed), 1);
        assert!(frames
            .iter()
            .any(|f| f.content().is_some_and(|c| c.contains("offline"))));

        let stored = h.store.get("m1").unwrap().unwrap();
        assert_eq!(stored.sync_state, SyncState::Unsynced);
        assert_eq!(stored.delivery_state, Some(DeliveryState::Failed));
    }

    #[tokio::test]
    async fn test_direct_to_connected_recipient() {
        let h = harness(false);
        let (alice, mut alice_rx) = connect(&h.registry, "alice").await;
        let (_bob, mut bob_rx) = connect(&h.registry, "bob").await;

        let payload = WirePayload {
            content: Some("hi".into()),
            sender: Some("alice".into()),
            recipient: Some("bob".into()),
            ..WirePayload::new(PayloadKind::Message)
        };
        let outcome = h.router.handle_payload(&alice, Some("alice"), payload).await;

        assert!(matches!(outcome, RouteOutcome::Delivered { .. }));
        let bob_frames = drain(&mut bob_rx);
        assert_eq!(messages(&bob_frames), 1);
        assert_eq!(bob_frames[0].delivery_status, Some(DeliveryState::Sent));

        let alice_frames = drain(&mut alice_rx);
        assert_eq!(deliveries(&alice_frames, DeliveryState::Delivered), 1);
        // Echo of the sender's own message.
        assert_eq!(messages(&alice_frames), 1);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone_but_sender() {
        let h = harness(false);
        let (alice, mut alice_rx) = connect(&h.registry, "alice").await;
        let (_bob, mut bob_rx) = connect(&h.registry, "bob").await;
        let (_carol, mut carol_rx) = connect(&h.registry, "carol").await;

        let outcome = h
            .router
            .handle_text(&alice, Some("alice"), r#"{"type":"message","content":"hello all"}"#)
            .await;

        assert!(matches!(outcome, RouteOutcome::Broadcast { recipients: 2, .. }));
        assert_eq!(messages(&drain(&mut bob_rx)), 1);
        assert_eq!(messages(&drain(&mut carol_rx)), 1);
        assert!(drain(&mut alice_rx).is_empty());

        let stored = h.store.list_all().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sender, "alice");
        assert_eq!(stored[0].delivery_state, None);
    }

    #[tokio::test]
    async fn test_invalid_frames_are_rejected_without_persisting() {
        let h = harness(false);
        let (alice, mut alice_rx) = connect(&h.registry, "alice").await;

        assert_eq!(
            h.router.handle_text(&alice, Some("alice"), "not json").await,
            RouteOutcome::Rejected
        );
        assert_eq!(
            h.router
                .handle_text(&alice, None, r#"{"type":"message","content":"x"}"#)
                .await,
            RouteOutcome::Rejected
        );
        assert_eq!(
            h.router
                .handle_text(&alice, Some("alice"), r#"{"type":"message","content":""}"#)
                .await,
            RouteOutcome::Rejected
        );

        let frames = drain(&mut alice_rx);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.kind == PayloadKind::Status));
        assert!(h.store.list_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_receipt_forwarded_to_original_sender() {
        let h = harness(false);
        let (alice, mut alice_rx) = connect(&h.registry, "alice").await;
        let (bob, _bob_rx) = connect(&h.registry, "bob").await;

        h.router
            .handle_text(
                &alice,
                Some("alice"),
                r#"{"type":"message","id":"m1","recipient":"bob","content":"hi"}"#,
            )
            .await;
        drain(&mut alice_rx);

        let outcome = h
            .router
            .handle_text(
                &bob,
                Some("bob"),
                r#"{"type":"delivery","id":"m1","deliveryStatus":"read"}"#,
            )
            .await;

        assert_eq!(
            outcome,
            RouteOutcome::DeliveryUpdated {
                id: "m1".into(),
                state: DeliveryState::Read,
                forwarded: true,
            }
        );
        assert_eq!(deliveries(&drain(&mut alice_rx), DeliveryState::Read), 1);
        assert_eq!(
            h.store.get("m1").unwrap().unwrap().delivery_state,
            Some(DeliveryState::Read)
        );
    }

    #[tokio::test]
    async fn test_read_receipt_on_broadcast_leaves_no_state() {
        let h = harness(false);
        let (alice, mut alice_rx) = connect(&h.registry, "alice").await;
        let (bob, _bob_rx) = connect(&h.registry, "bob").await;

        h.router
            .handle_text(
                &alice,
                Some("alice"),
                r#"{"type":"message","id":"g1","content":"hello all"}"#,
            )
            .await;

        let outcome = h
            .router
            .handle_text(
                &bob,
                Some("bob"),
                r#"{"type":"delivery","id":"g1","deliveryStatus":"read"}"#,
            )
            .await;

        assert!(matches!(
            outcome,
            RouteOutcome::DeliveryUpdated { forwarded: true, .. }
        ));
        assert_eq!(deliveries(&drain(&mut alice_rx), DeliveryState::Read), 1);
        let stored = h.store.get("g1").unwrap().unwrap();
        assert_eq!(stored.recipient, Recipient::Broadcast);
        assert_eq!(stored.delivery_state, None);
    }

    #[tokio::test]
    async fn test_self_update_is_not_forwarded() {
        let h = harness(false);
        let (alice, mut alice_rx) = connect(&h.registry, "alice").await;
        h.router
            .handle_text(
                &alice,
                Some("alice"),
                r#"{"type":"message","id":"m1","recipient":"bob","content":"hi"}"#,
            )
            .await;
        drain(&mut alice_rx);

        let outcome = h
            .router
            .handle_text(&alice, Some("alice"), r#"{"type":"status","id":"m1","content":"read"}"#)
            .await;

        assert!(matches!(
            outcome,
            RouteOutcome::DeliveryUpdated { forwarded: false, .. }
        ));
        assert!(drain(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn test_plain_status_is_relayed_not_persisted() {
        let h = harness(false);
        let (alice, _alice_rx) = connect(&h.registry, "alice").await;
        let (_bob, mut bob_rx) = connect(&h.registry, "bob").await;

        let outcome = h
            .router
            .handle_text(&alice, Some("alice"), r#"{"type":"status","content":"away"}"#)
            .await;

        assert_eq!(outcome, RouteOutcome::Relayed { recipients: 1 });
        assert_eq!(drain(&mut bob_rx).len(), 1);
        assert!(h.store.list_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_directed_message_synced_opportunistically_when_online() {
        let h = harness(true);
        let (alice, _alice_rx) = connect(&h.registry, "alice").await;
        let (_bob, _bob_rx) = connect(&h.registry, "bob").await;

        h.router
            .handle_text(
                &alice,
                Some("alice"),
                r#"{"type":"message","id":"d1","recipient":"bob","content":"hi"}"#,
            )
            .await;
        h.router
            .handle_text(
                &alice,
                Some("alice"),
                r#"{"type":"message","id":"b1","content":"hi all"}"#,
            )
            .await;

        assert!(h.store.get("d1").unwrap().unwrap().is_synced());
        assert!(!h.store.get("b1").unwrap().unwrap().is_synced());

        h.network.set_online(false);
        h.router
            .handle_text(
                &alice,
                Some("alice"),
                r#"{"type":"message","id":"d2","recipient":"bob","content":"again"}"#,
            )
            .await;
        assert!(!h.store.get("d2").unwrap().unwrap().is_synced());
    }

    #[tokio::test]
    async fn test_typing_is_not_persisted() {
        let h = harness(false);
        let (alice, _alice_rx) = connect(&h.registry, "alice").await;
        let (_bob, mut bob_rx) = connect(&h.registry, "bob").await;

        let outcome = h
            .router
            .handle_text(
                &alice,
                Some("alice"),
                r#"{"type":"typing","content":"typing","recipient":"bob"}"#,
            )
            .await;

        assert_eq!(outcome, RouteOutcome::Typing);
        assert_eq!(drain(&mut bob_rx).len(), 1);
        assert!(h.store.list_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persist_outside_socket_path() {
        let h = harness(true);

        let directed = Message::new("h1", "hi", "alice", Recipient::parse(Some("bob")), Utc::now());
        let stored = h.router.persist(directed).await.unwrap();
        assert!(stored.is_synced());

        let group = Message::new("h2", "hi all", "alice", Recipient::Broadcast, Utc::now());
        let stored = h.router.persist(group).await.unwrap();
        assert!(!stored.is_synced());
        assert_eq!(h.store.count_unsynced().unwrap(), 1);
    }
}
