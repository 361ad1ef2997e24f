//! Notification record types shared by the store, reconciler and clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use seller_notify_protocol::{MESSAGE_EVENT, NEW_REQUEST_EVENT, REQUEST_UPDATE_EVENT, TEST_EVENT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewRequest,
    RequestUpdate,
    Message,
    Test,
    Other,
}

impl NotificationKind {
    /// Maps a live event name or push `type` field to a kind.
    pub fn from_event_name(name: &str) -> Self {
        match name.trim() {
            NEW_REQUEST_EVENT | "new_request" => NotificationKind::NewRequest,
            REQUEST_UPDATE_EVENT | "request_updated" => NotificationKind::RequestUpdate,
            MESSAGE_EVENT | "message" => NotificationKind::Message,
            TEST_EVENT | "test" => NotificationKind::Test,
            _ => NotificationKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::NewRequest => "new_request",
            NotificationKind::RequestUpdate => "request_update",
            NotificationKind::Message => "message",
            NotificationKind::Test => "test",
            NotificationKind::Other => "other",
        }
    }
}

/// One delivered notification, as stored and persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl NotificationRecord {
    /// Whether this id was generated locally because the event carried none.
    pub fn has_fallback_id(&self) -> bool {
        self.id.starts_with(crate::normalize::FALLBACK_ID_PREFIX)
    }
}
