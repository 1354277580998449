//! HTTP handlers.

use std::net::IpAddr;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::application::{Services, SyncOutcome, SyncTrigger};
use crate::domain::{
    AppError, DiscoveredDevice, Message, Recipient, Result, SyncStatus,
};
use crate::infrastructure::local_ipv4;

/// Health check endpoint
pub async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    message: &'static str,
    count: usize,
}

/// Run a discovery pass, replacing the device list.
pub async fn scan(State(services): State<Services>) -> Json<ScanResponse> {
    let devices = services.discovery.scan().await;
    Json(ScanResponse {
        message: "Scan complete",
        count: devices.len(),
    })
}

/// Devices from the last scan.
pub async fn devices(State(services): State<Services>) -> Json<Vec<DiscoveredDevice>> {
    Json(services.discovery.devices().await)
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    message: String,
    count: usize,
}

pub async fn sync_to_cloud(State(services): State<Services>) -> Result<Json<SyncResponse>> {
    let outcome = services.scheduler.sync_to_cloud(SyncTrigger::Manual).await?;
    let count = match outcome {
        SyncOutcome::Synced { count } => count,
        SyncOutcome::NothingToSync | SyncOutcome::Offline => 0,
    };
    Ok(Json(SyncResponse {
        message: outcome.describe(),
        count,
    }))
}

/// Full remote message set; callers de-duplicate by id.
pub async fn sync_from_cloud(State(services): State<Services>) -> Result<Json<Vec<Message>>> {
    Ok(Json(services.scheduler.fetch_from_cloud().await?))
}

pub async fn sync_status(State(services): State<Services>) -> Json<SyncStatus> {
    Json(services.scheduler.status().await)
}

#[derive(Debug, Serialize)]
pub struct PendingResponse {
    count: usize,
}

pub async fn pending_sync(State(services): State<Services>) -> Result<Json<PendingResponse>> {
    Ok(Json(PendingResponse {
        count: services.scheduler.pending_count()?,
    }))
}

pub async fn list_messages(State(services): State<Services>) -> Result<Json<Vec<Message>>> {
    Ok(Json(services.store.list_all()?))
}

pub async fn get_message(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> Result<Json<Message>> {
    services
        .store
        .get(&id)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound {
            message: format!("Message {id} not found"),
        })
}

/// Request body for storing a message outside the socket path.
#[derive(Debug, Deserialize)]
pub struct NewMessage {
    id: Option<String>,
    content: Option<String>,
    sender: Option<String>,
    recipient: Option<String>,
    /// Epoch milliseconds.
    timestamp: Option<i64>,
}

impl NewMessage {
    fn into_message(self) -> Result<Message> {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        let (Some(id), Some(content), Some(sender)) = (
            non_empty(self.id),
            non_empty(self.content),
            non_empty(self.sender),
        ) else {
            return Err(AppError::validation("Invalid message format"));
        };

        let created_at = self
            .timestamp
            .and_then(chrono::DateTime::from_timestamp_millis)
            .unwrap_or_else(chrono::Utc::now);

        Ok(Message::new(
            id,
            content,
            sender,
            Recipient::parse(self.recipient.as_deref()),
            created_at,
        ))
    }
}

#[derive(Debug, Serialize)]
pub struct StoredResponse {
    message: &'static str,
    data: Message,
}

pub async fn create_message(
    State(services): State<Services>,
    Json(request): Json<NewMessage>,
) -> Result<(StatusCode, Json<StoredResponse>)> {
    let message = request.into_message()?;
    let stored = services.router.persist(message).await?;

    Ok((
        StatusCode::CREATED,
        Json(StoredResponse {
            message: "Message stored successfully",
            data: stored,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct LanResponse {
    status: &'static str,
    ip: Option<IpAddr>,
}

/// LAN connectivity of this host.
pub async fn network_lan() -> Json<LanResponse> {
    let ip = local_ipv4().map(IpAddr::V4);
    Json(LanResponse {
        status: if ip.is_some() {
            "connected"
        } else {
            "disconnected"
        },
        ip,
    })
}
