//! # seller-notify-core
//!
//! Real-time notification pipeline for marketplace sellers: a live socket
//! channel delivering "new request" events, a deduplicated notification store,
//! and a reconciler that merges the live channel with OS push delivery.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Transport I/O runs on a
//!   worker thread and publishes into a channel drained by the session owner.
//! - **Single consumer**: The store and connection state are mutated only by
//!   the thread that owns the [`NotificationSession`]. No locks guard them.
//! - **Graceful degradation**: Connection failures are data, persistence
//!   failures are logged, malformed events become placeholder records.
//! - **Session scoped**: Every login builds a fresh session; nothing carries
//!   over from one user to the next.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use seller_notify_core::*;
//!
//! let storage = StorageConfig::default();
//! let config = load_config(&storage);
//! let mut manager = SessionManager::new(
//!     move || TcpTransport::new(config.server_addr.clone(), TransportSettings::from(&config)),
//!     Arc::new(FileKeyValueStore::new(storage.data_dir())),
//!     alerter,
//!     Box::new(StaticPush::unavailable()),
//!     SessionOptions::from(&config),
//! );
//! manager.on_auth_changed(&AuthState::authenticated("token", "seller-1"));
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod normalize;
pub mod reconcile;
pub mod reconnect;
pub mod session;
pub mod storage;
pub mod store;
pub mod types;

pub use config::*;
pub use connection::{
    ConnectionEvent, ConnectionManager, ConnectionState, ConnectionStatus, Liveness, OpenRequest,
    TcpTransport, Transport, TransportEvent, TransportSettings, TransportSink,
};
pub use error::{NotifyError, Result};
pub use normalize::{normalize_event, normalize_push};
pub use reconcile::{Alerter, Delivery, PushDelivery, PushRegistration, Reconciler, StaticPush};
pub use reconnect::ReconnectPolicy;
pub use session::{AuthState, NotificationSession, SessionManager, SessionOptions};
pub use storage::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, StorageConfig};
pub use store::{AppendOutcome, NotificationStore};
pub use types::*;
