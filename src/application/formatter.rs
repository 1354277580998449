//! Terminal output for discovery, messages and sync results.
//!
//! Supports a table view for humans and JSON for programmatic use.

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;

use crate::domain::{DeliveryState, DeviceStatus, DiscoveredDevice, Message, SyncStatus};

use super::sync_service::SyncOutcome;

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Compact table listing.
    #[default]
    Table,
    /// JSON format for programmatic use.
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {s}. Use: table, json")),
        }
    }
}

/// Pretty JSON for any serializable value.
///
/// # Errors
/// Returns error if serialization fails.
pub fn format_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}

/// Formats a table listing of discovered devices.
pub fn format_devices_table(devices: &[DiscoveredDevice]) -> String {
    if devices.is_empty() {
        return "No devices found.".dimmed().to_string();
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Name", "IP", "Status", "MAC", "Conf.", "Last seen"]);

    for device in devices {
        let status = match device.status {
            DeviceStatus::Online => device.status.to_string().green().to_string(),
            DeviceStatus::Offline => device.status.to_string().red().to_string(),
        };

        table.add_row(vec![
            truncate(&device.display_name, 28),
            device.ip.to_string(),
            status,
            device.mac.clone().unwrap_or_else(|| "-".to_string()),
            device
                .source_confidence
                .map_or_else(|| "-".to_string(), |c| c.to_string()),
            device.last_seen_at.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }

    table.to_string()
}

/// Formats a table listing of stored messages.
pub fn format_messages_table(messages: &[Message]) -> String {
    if messages.is_empty() {
        return "No messages stored.".dimmed().to_string();
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["ID", "Sent", "From", "To", "Delivery", "Synced", "Content"]);

    for message in messages {
        let delivery = match message.delivery_state {
            None => "-".to_string(),
            Some(DeliveryState::Failed) => "failed".red().to_string(),
            Some(state) => state.to_string(),
        };
        let synced = if message.is_synced() {
            "yes".green().to_string()
        } else {
            "no".yellow().to_string()
        };

        table.add_row(vec![
            truncate(&message.id, 10),
            message.created_at.format("%Y-%m-%d %H:%M").to_string(),
            message.sender.clone(),
            message.recipient.as_str().to_string(),
            delivery,
            synced,
            truncate(&message.content, 35),
        ]);
    }

    table.to_string()
}

/// One-line summary of a to-cloud run.
pub fn format_sync_outcome(outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::Synced { .. } => format!("{} {}", "✓".green(), outcome.describe()),
        SyncOutcome::NothingToSync => outcome.describe().dimmed().to_string(),
        SyncOutcome::Offline => format!("{} {}", "!".yellow(), outcome.describe()),
    }
}

/// Formats the unsynced message count.
pub fn format_pending(count: usize) -> String {
    let value = if count == 0 {
        count.to_string().green()
    } else {
        count.to_string().yellow()
    };
    format!("{} {value}", "Pending sync:".bold())
}

/// Formats scheduler status for display.
pub fn format_sync_status(status: &SyncStatus) -> String {
    let last_sync = status.last_sync.map_or_else(
        || "never".to_string(),
        |dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    );

    let mut out = format!(
        "{}\n  Last sync: {}\n  Last batch: {}\n  Total synced: {}\n  Runs: {}",
        "☁ Sync status".bold(),
        last_sync.cyan(),
        status.last_synced_count.to_string().cyan(),
        status.total_synced.to_string().green(),
        status.runs.to_string().yellow()
    );
    if let Some(error) = &status.last_error {
        out.push_str(&format!("\n  Last error: {}", error.red()));
    }
    out
}

/// Truncates a string to max characters with ellipsis.
fn truncate(s: &str, max_len: usize) -> String {
    let s = s.lines().next().unwrap_or(s);
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}
