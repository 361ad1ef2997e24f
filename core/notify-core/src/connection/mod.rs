//! Live notification channel.
//!
//! # Architecture
//!
//! ```text
//! relay ──TCP──► transport worker thread ──mpsc──► ConnectionManager ──► ConnectionEvent
//!                 (handshake, reconnect)            (state machine,       (observer surface)
//!                                                    liveness probe)
//! ```
//!
//! The transport owns I/O and the reconnect policy. The manager owns the
//! state machine and runs on the session owner's thread; it is the single
//! consumer of transport events. Every `open` gets a fresh generation number,
//! so events still in flight from a closed channel are dropped.
//!
//! # Module Structure
//!
//! - [`state`]: `ConnectionState`, status enum, observer events
//! - [`transport`]: the `Transport` seam and the events it publishes
//! - [`manager`]: `ConnectionManager` state machine
//! - [`tcp`]: newline-delimited JSON over TCP

mod manager;
#[cfg(test)]
pub(crate) mod mock;
mod state;
mod tcp;
mod transport;

pub use manager::ConnectionManager;
pub use state::{ConnectionEvent, ConnectionState, ConnectionStatus, Liveness};
pub use tcp::{TcpTransport, TransportSettings};
pub use transport::{OpenRequest, Transport, TransportEvent, TransportMessage, TransportSink};
