use std::sync::mpsc::Sender;

use seller_notify_protocol::{ClientFrame, ServerFrame};

use crate::error::Result;

/// What the manager hands the transport when opening a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub token: String,
    pub user_id: Option<String>,
}

impl OpenRequest {
    pub fn handshake_frame(&self) -> ClientFrame {
        ClientFrame::handshake(&self.token, self.user_id.as_deref())
    }
}

/// Raw lifecycle and inbound traffic reported by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected { socket_id: String },
    /// The transport is about to retry after a loss or failed attempt.
    Reconnecting { attempt: u32 },
    Disconnected { reason: String },
    ConnectFailed { message: String },
    /// Credentials rejected. The transport has stopped and will not retry.
    AuthRejected { message: String },
    /// Retry budget exhausted. The transport has stopped.
    GaveUp { message: String },
    Frame(ServerFrame),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportMessage {
    pub generation: u64,
    pub event: TransportEvent,
}

/// Publishing half handed to a transport for one `open`.
#[derive(Debug, Clone)]
pub struct TransportSink {
    generation: u64,
    tx: Sender<TransportMessage>,
}

impl TransportSink {
    pub(crate) fn new(generation: u64, tx: Sender<TransportMessage>) -> Self {
        Self { generation, tx }
    }

    /// Returns false once the manager is gone; transports should stop then.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(TransportMessage {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// A bidirectional channel to the notification relay.
///
/// `open` starts the handshake and returns immediately; its outcome arrives
/// through the sink. Implementations own their reconnect policy and must stop
/// emitting after `close`.
pub trait Transport {
    fn open(&mut self, request: OpenRequest, sink: TransportSink) -> Result<()>;
    fn send(&mut self, frame: &ClientFrame) -> Result<()>;
    fn close(&mut self);
}
