//! Turns inbound events from either channel into [`NotificationRecord`]s.
//!
//! Both channels share one id rule so the store can dedup across them. New
//! requests are keyed by the request: `request.id`, then `requestId`, then
//! `id`. Every other kind is keyed by the event's own `id` first, falling back
//! to the request it refers to. Strings and numbers are both accepted. When none is present a `local-<ulid>` id is generated, and dedup
//! against the other channel is not possible for that event.
//!
//! Payloads are never validated strictly. Missing fields become placeholder
//! text and the record is still produced.

use chrono::{DateTime, Utc};
use serde_json::Value;
use ulid::Ulid;

use crate::types::{NotificationKind, NotificationRecord};

pub const FALLBACK_ID_PREFIX: &str = "local-";

pub const UNTITLED_REQUEST: &str = "Demande sans titre";
pub const UNKNOWN_CATEGORY: &str = "Catégorie non précisée";
pub const UNKNOWN_CITY: &str = "Ville inconnue";

/// Normalizes a live-channel event.
pub fn normalize_event(event: &str, data: &Value, now: DateTime<Utc>) -> NotificationRecord {
    let kind = NotificationKind::from_event_name(event);
    build_record(kind, data, now)
}

/// Normalizes a push payload. The kind comes from its `type` (or `event`)
/// field; a payload carrying a `request` object is treated as a new request.
pub fn normalize_push(data: &Value, now: DateTime<Utc>) -> NotificationRecord {
    let kind = text_field(data, "type")
        .or_else(|| text_field(data, "event"))
        .map(|name| NotificationKind::from_event_name(&name))
        .unwrap_or_else(|| {
            if data.get("request").map(Value::is_object).unwrap_or(false) {
                NotificationKind::NewRequest
            } else {
                NotificationKind::Other
            }
        });
    build_record(kind, data, now)
}

fn build_record(kind: NotificationKind, data: &Value, now: DateTime<Utc>) -> NotificationRecord {
    let (title, message) = match kind {
        NotificationKind::NewRequest => new_request_text(data),
        _ => generic_text(kind, data),
    };

    NotificationRecord {
        id: derive_id(kind, data),
        kind,
        title,
        message,
        payload: data.clone(),
        created_at: now,
        read: false,
    }
}

/// Domain id for the event, namespaced by kind except for new requests so an
/// update never collides with the original request notification.
pub fn derive_id(kind: NotificationKind, data: &Value) -> String {
    let own_id = text_field(data, "id");
    let request_id = data
        .get("request")
        .and_then(|request| text_field(request, "id").or_else(|| text_field(request, "_id")))
        .or_else(|| text_field(data, "requestId"));

    let domain_id = if kind == NotificationKind::NewRequest {
        request_id.or(own_id)
    } else {
        own_id.or(request_id)
    };

    match domain_id {
        Some(id) if kind == NotificationKind::NewRequest => id,
        Some(id) => format!("{}:{}", kind.as_str(), id),
        None => format!("{}{}", FALLBACK_ID_PREFIX, Ulid::new()),
    }
}

fn new_request_text(data: &Value) -> (String, String) {
    let request = data.get("request").unwrap_or(data);

    let title = text_field(request, "title")
        .or_else(|| text_field(data, "title"))
        .unwrap_or_else(|| UNTITLED_REQUEST.to_string());

    let category = text_field(request, "category").unwrap_or_else(|| UNKNOWN_CATEGORY.to_string());
    let category = match text_field(request, "subCategory") {
        Some(sub) => format!("{} › {}", category, sub),
        None => category,
    };

    let location = request.get("location");
    let city = location
        .and_then(|location| text_field(location, "city"))
        .unwrap_or_else(|| UNKNOWN_CITY.to_string());
    let distance = location
        .and_then(|location| location.get("distance"))
        .and_then(distance_km);

    let message = match distance {
        Some(km) => format!("{} · {} ({:.1} km)", category, city, km),
        None => format!("{} · {}", category, city),
    };

    (title, message)
}

fn generic_text(kind: NotificationKind, data: &Value) -> (String, String) {
    let title = text_field(data, "title").unwrap_or_else(|| default_title(kind).to_string());
    let message = text_field(data, "message")
        .or_else(|| text_field(data, "body"))
        .unwrap_or_default();
    (title, message)
}

fn default_title(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::NewRequest => "Nouvelle demande",
        NotificationKind::RequestUpdate => "Mise à jour de la demande",
        NotificationKind::Message => "Nouveau message",
        NotificationKind::Test => "Notification de test",
        NotificationKind::Other => "Notification",
    }
}

/// Non-empty string or number field, as text.
fn text_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn distance_km(value: &Value) -> Option<f64> {
    let km = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    km.filter(|km| km.is_finite() && *km >= 0.0)
}
