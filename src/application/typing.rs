//! Typing indicators with automatic expiry.
//!
//! Each sender is either idle or typing. A typing signal arms a per-sender
//! expiry task; a repeated signal cancels that task before arming a new
//! one. When the task fires, or an explicit "stopped" arrives, the sender
//! returns to idle and a single "stopped" frame goes to the same audience.
//! Typing toward a different audience first stops the previous one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::domain::{Recipient, WirePayload};

use super::registry::{ConnectionRegistry, SocketHandle};

/// Armed expiry for one sender.
struct TypingTimer {
    generation: u64,
    audience: Recipient,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct TypingTable {
    timers: HashMap<String, TypingTimer>,
    next_generation: u64,
}

/// Debounced typing state per sender.
pub struct TypingIndicatorManager {
    registry: Arc<ConnectionRegistry>,
    timeout: Duration,
    table: Mutex<TypingTable>,
}

impl TypingIndicatorManager {
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, timeout: Duration) -> Self {
        Self {
            registry,
            timeout,
            table: Mutex::new(TypingTable::default()),
        }
    }

    /// Handle a typing frame from `sender`, forwarding it to its audience.
    pub async fn signal(self: &Arc<Self>, sender: &str, payload: WirePayload) {
        let audience = payload.audience();

        if payload.is_typing_stop() {
            let previous = self.table.lock().await.timers.remove(sender);
            if let Some(timer) = previous {
                timer.handle.abort();
                self.stop_elsewhere(sender, timer.audience, &audience).await;
            }
            tracing::debug!(sender, "Typing stopped");
            self.deliver(sender, &audience, payload).await;
            return;
        }

        let previous_audience = {
            let mut table = self.table.lock().await;
            let previous = table.timers.remove(sender).map(|previous| {
                previous.handle.abort();
                previous.audience
            });

            table.next_generation += 1;
            let generation = table.next_generation;
            let handle = self.arm(sender.to_string(), generation);
            table.timers.insert(
                sender.to_string(),
                TypingTimer {
                    generation,
                    audience: audience.clone(),
                    handle,
                },
            );
            previous
        };

        if let Some(previous) = previous_audience {
            self.stop_elsewhere(sender, previous, &audience).await;
        }

        tracing::debug!(sender, to = audience.as_str(), "Typing");
        self.deliver(sender, &audience, payload).await;
    }

    /// Whether `sender` is currently typing.
    pub async fn is_typing(&self, sender: &str) -> bool {
        self.table.lock().await.timers.contains_key(sender)
    }

    fn arm(self: &Arc<Self>, sender: String, generation: u64) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(manager.timeout).await;
            manager.expire(&sender, generation).await;
        })
    }

    /// Fires only if no newer signal re-armed the sender meanwhile.
    async fn expire(&self, sender: &str, generation: u64) {
        let audience = {
            let mut table = self.table.lock().await;
            match table.timers.get(sender) {
                Some(timer) if timer.generation == generation => {
                    table.timers.remove(sender).map(|t| t.audience)
                }
                _ => None,
            }
        };

        if let Some(audience) = audience {
            tracing::debug!(sender, "Typing expired");
            let stopped = WirePayload::typing_stopped(sender, audience.identity());
            self.deliver(sender, &audience, stopped).await;
        }
    }

    /// A sender switching audience leaves the old one with a "stopped".
    async fn stop_elsewhere(&self, sender: &str, previous: Recipient, current: &Recipient) {
        if previous == *current {
            return;
        }
        tracing::debug!(sender, from = previous.as_str(), "Typing moved to another audience");
        let stopped = WirePayload::typing_stopped(sender, previous.identity());
        self.deliver(sender, &previous, stopped).await;
    }

    async fn deliver(&self, sender: &str, audience: &Recipient, payload: WirePayload) {
        match audience {
            Recipient::Direct(recipient) => {
                if let Some(socket) = self.open_socket(recipient).await {
                    socket.send(payload);
                }
            }
            Recipient::Broadcast => {
                let exclude = self.registry.lookup(sender).await;
                self.registry.broadcast(&payload, exclude.as_ref()).await;
            }
        }
    }

    async fn open_socket(&self, identity: &str) -> Option<SocketHandle> {
        self.registry
            .lookup(identity)
            .await
            .filter(SocketHandle::is_open)
    }
}
