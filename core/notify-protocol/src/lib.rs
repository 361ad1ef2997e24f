//! Wire protocol for the seller notification channel.
//!
//! Frames are newline-delimited JSON objects tagged by `type`. This crate is
//! shared by the relay and its clients to prevent schema drift. The relay
//! remains the authority on validation; clients reuse the same types to build
//! valid frames.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_FRAME_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_TOKEN_LEN: usize = 4096;
pub const MAX_EVENT_NAME_LEN: usize = 64;

pub const AUTHORIZATION_HEADER: &str = "authorization";

pub const NEW_REQUEST_EVENT: &str = "new_request_notification";
pub const REQUEST_UPDATE_EVENT: &str = "request_update";
pub const MESSAGE_EVENT: &str = "new_message";
pub const TEST_EVENT: &str = "test_notification";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthCredential {
    pub token: String,
}

/// Frames sent by clients (subscribers and one-shot publishers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Handshake {
        protocol_version: u32,
        auth: AuthCredential,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default)]
        user_id: Option<String>,
    },
    Ping {
        nonce: u64,
    },
    Publish {
        event: String,
        #[serde(default)]
        data: Value,
    },
}

/// Frames sent by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    HandshakeAccepted { socket_id: String },
    HandshakeRejected { code: String, message: String },
    Pong { nonce: u64 },
    Event { event: String, data: Value },
    Published { delivered: usize },
    Error { code: String, message: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl From<ErrorInfo> for ServerFrame {
    fn from(err: ErrorInfo) -> Self {
        ServerFrame::Error {
            code: err.code,
            message: err.message,
        }
    }
}

impl ClientFrame {
    /// Builds a handshake carrying the token both as an auth credential and
    /// mirrored in an `authorization` header.
    pub fn handshake(token: &str, user_id: Option<&str>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(
            AUTHORIZATION_HEADER.to_string(),
            format!("Bearer {}", token),
        );
        ClientFrame::Handshake {
            protocol_version: PROTOCOL_VERSION,
            auth: AuthCredential {
                token: token.to_string(),
            },
            headers,
            user_id: user_id.map(str::to_string),
        }
    }

    pub fn validate(&self) -> Result<(), ErrorInfo> {
        match self {
            ClientFrame::Handshake {
                protocol_version,
                auth,
                ..
            } => {
                if *protocol_version != PROTOCOL_VERSION {
                    return Err(ErrorInfo::new(
                        "unsupported_version",
                        format!(
                            "protocol_version {} is not supported (expected {})",
                            protocol_version, PROTOCOL_VERSION
                        ),
                    ));
                }
                if auth.token.trim().is_empty() {
                    return Err(ErrorInfo::new("missing_token", "auth.token is required"));
                }
                if auth.token.len() > MAX_TOKEN_LEN {
                    return Err(ErrorInfo::new(
                        "invalid_token",
                        format!("auth.token must be {} bytes or fewer", MAX_TOKEN_LEN),
                    ));
                }
                Ok(())
            }
            ClientFrame::Ping { .. } => Ok(()),
            ClientFrame::Publish { event, .. } => validate_event_name(event),
        }
    }

    /// Token from the credential, falling back to the mirrored header.
    pub fn handshake_token(&self) -> Option<&str> {
        match self {
            ClientFrame::Handshake { auth, headers, .. } => {
                let token = auth.token.trim();
                if !token.is_empty() {
                    return Some(token);
                }
                headers
                    .get(AUTHORIZATION_HEADER)
                    .and_then(|value| value.strip_prefix("Bearer "))
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
            }
            _ => None,
        }
    }
}

fn validate_event_name(event: &str) -> Result<(), ErrorInfo> {
    if event.trim().is_empty() {
        return Err(ErrorInfo::new("invalid_event", "event is required"));
    }
    if event.len() > MAX_EVENT_NAME_LEN {
        return Err(ErrorInfo::new(
            "invalid_event",
            format!("event must be {} characters or fewer", MAX_EVENT_NAME_LEN),
        ));
    }
    if !event
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == ':')
    {
        return Err(ErrorInfo::new(
            "invalid_event",
            "event may only contain ASCII letters, digits, '_', '-' and ':'",
        ));
    }
    Ok(())
}

pub fn parse_client_frame(bytes: &[u8]) -> Result<ClientFrame, ErrorInfo> {
    let frame: ClientFrame = serde_json::from_slice(bytes).map_err(|err| {
        ErrorInfo::new("invalid_json", format!("frame is invalid JSON: {}", err))
    })?;
    frame.validate()?;
    Ok(frame)
}

pub fn parse_server_frame(bytes: &[u8]) -> Result<ServerFrame, ErrorInfo> {
    serde_json::from_slice(bytes)
        .map_err(|err| ErrorInfo::new("invalid_json", format!("frame is invalid JSON: {}", err)))
}

/// Serializes a frame followed by the newline delimiter.
pub fn encode_frame<T: Serialize>(frame: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut payload = serde_json::to_vec(frame)?;
    payload.push(b'\n');
    Ok(payload)
}

/// Location block of a new-request notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

/// Request summary carried by `new_request_notification`.
///
/// Every field is optional: receivers degrade missing fields to placeholder
/// text instead of rejecting the event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<RequestLocation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewRequestPayload {
    pub request: RequestSummary,
}
