//! Error types for seller-notify-core operations.
//!
//! Pipeline operations surface failures as data (connection state, logged
//! persistence warnings). These errors travel between internal layers and the
//! binaries, never up to the UI.

use std::path::PathBuf;

/// All errors that can occur inside seller-notify-core.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    // ─────────────────────────────────────────────────────────────────────
    // Storage Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Storage I/O error: {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage write rejected for key {key}: {reason}")]
    StorageUnavailable { key: String, reason: String },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Transport Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Transport is not connected")]
    NotConnected,

    #[error("Transport I/O error: {context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid server address: {0}")]
    InvalidAddress(String),

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },
}

/// Convenience type alias for Results using NotifyError.
pub type Result<T> = std::result::Result<T, NotifyError>;
