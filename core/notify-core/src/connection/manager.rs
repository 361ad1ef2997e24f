use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::{Duration, Instant};

use seller_notify_protocol::{ClientFrame, ServerFrame};
use tracing::{debug, info, warn};

use super::state::{ConnectionEvent, ConnectionState, ConnectionStatus, Liveness};
use super::transport::{OpenRequest, Transport, TransportEvent, TransportMessage, TransportSink};

#[derive(Debug)]
struct PendingPing {
    nonce: u64,
    sent_at: Instant,
    overdue_logged: bool,
}

/// Owns the lifecycle of one live channel for an authenticated session.
///
/// Nothing here returns an error to the caller: failures become
/// [`ConnectionStatus::Error`] plus a `last_error` string.
pub struct ConnectionManager<T: Transport> {
    transport: T,
    state: ConnectionState,
    request: Option<OpenRequest>,
    generation: u64,
    tx: Sender<TransportMessage>,
    rx: Receiver<TransportMessage>,
    pong_window: Duration,
    next_nonce: u64,
    pending_ping: Option<PendingPing>,
    last_round_trip: Option<Duration>,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, pong_window: Duration) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            transport,
            state: ConnectionState::default(),
            request: None,
            generation: 0,
            tx,
            rx,
            pong_window,
            next_nonce: 1,
            pending_ping: None,
            last_round_trip: None,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status
    }

    /// Whether a channel is wanted (connect called, not torn down since).
    pub fn is_active(&self) -> bool {
        self.request.is_some()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Opens the channel with `token` as credential.
    ///
    /// No-op while connecting or connected with the same token. A different
    /// token tears the current channel down first.
    pub fn connect(&mut self, token: &str, user_id: Option<&str>) {
        let token = token.trim();
        if token.is_empty() {
            self.fail("session token is empty");
            return;
        }

        if let Some(current) = &self.request {
            let live = matches!(
                self.state.status,
                ConnectionStatus::Connecting | ConnectionStatus::Connected
            );
            if live && current.token == token {
                debug!(status = ?self.state.status, "connect ignored; channel already live");
                return;
            }
            self.teardown();
        }

        let request = OpenRequest {
            token: token.to_string(),
            user_id: user_id.map(str::to_string),
        };
        self.generation += 1;
        self.state = ConnectionState {
            status: ConnectionStatus::Connecting,
            last_error: None,
            socket_id: None,
        };
        self.request = Some(request.clone());

        let sink = TransportSink::new(self.generation, self.tx.clone());
        info!(generation = self.generation, "Opening notification channel");
        if let Err(err) = self.transport.open(request, sink) {
            warn!(error = %err, "Failed to open notification channel");
            self.fail(&err.to_string());
        }
    }

    /// Closes the channel immediately. No retry follows.
    pub fn disconnect(&mut self) {
        if self.request.is_none() && self.state.status == ConnectionStatus::Disconnected {
            return;
        }
        self.teardown();
        self.state = ConnectionState::default();
        info!("Notification channel closed");
    }

    fn teardown(&mut self) {
        self.transport.close();
        // Events already queued by the closed channel now carry a stale generation.
        self.generation += 1;
        self.request = None;
        self.pending_ping = None;
    }

    fn fail(&mut self, message: &str) {
        self.state.status = ConnectionStatus::Error;
        self.state.last_error = Some(message.to_string());
        self.state.socket_id = None;
    }

    /// Drains every queued transport event without blocking.
    pub fn poll(&mut self) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(message) => events.extend(self.apply(message)),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        events
    }

    /// Blocks up to `timeout` for the first event, then drains the rest.
    pub fn wait(&mut self, timeout: Duration) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();
        match self.rx.recv_timeout(timeout) {
            Ok(message) => events.extend(self.apply(message)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                return events
            }
        }
        events.extend(self.poll());
        events
    }

    fn apply(&mut self, message: TransportMessage) -> Option<ConnectionEvent> {
        if message.generation != self.generation {
            debug!(
                generation = message.generation,
                current = self.generation,
                "Dropping event from closed channel"
            );
            return None;
        }

        match message.event {
            TransportEvent::Connected { socket_id } => {
                info!(socket_id = %socket_id, "Notification channel connected");
                self.state = ConnectionState {
                    status: ConnectionStatus::Connected,
                    last_error: None,
                    socket_id: Some(socket_id.clone()),
                };
                self.send_ping();
                Some(ConnectionEvent::Connected { socket_id })
            }
            TransportEvent::Reconnecting { attempt } => {
                debug!(attempt, "Notification channel reconnecting");
                self.state.status = ConnectionStatus::Connecting;
                None
            }
            TransportEvent::Disconnected { reason } => {
                warn!(reason = %reason, "Notification channel lost");
                self.state.status = ConnectionStatus::Disconnected;
                self.state.socket_id = None;
                self.pending_ping = None;
                Some(ConnectionEvent::Disconnected { reason })
            }
            TransportEvent::ConnectFailed { message } => {
                warn!(error = %message, "Notification channel handshake failed");
                self.fail(&message);
                Some(ConnectionEvent::Error {
                    message,
                    fatal: false,
                })
            }
            TransportEvent::GaveUp { message } => {
                warn!(error = %message, "Notification channel gave up reconnecting");
                self.fail(&message);
                self.request = None;
                Some(ConnectionEvent::Error {
                    message,
                    fatal: false,
                })
            }
            TransportEvent::AuthRejected { message } => {
                warn!(error = %message, "Notification channel rejected credentials");
                self.teardown();
                self.fail(&message);
                Some(ConnectionEvent::Error {
                    message,
                    fatal: true,
                })
            }
            TransportEvent::Frame(frame) => self.apply_frame(frame),
        }
    }

    fn apply_frame(&mut self, frame: ServerFrame) -> Option<ConnectionEvent> {
        match frame {
            ServerFrame::Event { event, data } => Some(ConnectionEvent::Inbound { event, data }),
            ServerFrame::Pong { nonce } => match self.pending_ping.take() {
                Some(pending) if pending.nonce == nonce => {
                    let round_trip = pending.sent_at.elapsed();
                    self.last_round_trip = Some(round_trip);
                    debug!(round_trip_ms = round_trip.as_millis() as u64, "Liveness pong received");
                    Some(ConnectionEvent::Pong { round_trip })
                }
                other => {
                    debug!(nonce, "Unexpected pong ignored");
                    self.pending_ping = other;
                    None
                }
            },
            ServerFrame::Error { code, message } => {
                warn!(code = %code, message = %message, "Relay reported an error");
                Some(ConnectionEvent::Error {
                    message: format!("{}: {}", code, message),
                    fatal: false,
                })
            }
            other => {
                debug!(frame = ?other, "Ignoring unexpected frame");
                None
            }
        }
    }

    fn send_ping(&mut self) {
        let nonce = self.next_nonce;
        self.next_nonce += 1;
        self.last_round_trip = None;
        match self.transport.send(&ClientFrame::Ping { nonce }) {
            Ok(()) => {
                self.pending_ping = Some(PendingPing {
                    nonce,
                    sent_at: Instant::now(),
                    overdue_logged: false,
                });
            }
            Err(err) => {
                warn!(error = %err, "Failed to send liveness ping");
                self.pending_ping = None;
            }
        }
    }

    /// Reports the liveness probe. Logs once when the pong is overdue.
    pub fn check_liveness(&mut self) -> Liveness {
        if let Some(round_trip) = self.last_round_trip {
            return Liveness::Confirmed(round_trip);
        }
        let window = self.pong_window;
        match self.pending_ping.as_mut() {
            None => Liveness::Idle,
            Some(pending) if pending.sent_at.elapsed() > window => {
                if !pending.overdue_logged {
                    pending.overdue_logged = true;
                    warn!(
                        window_ms = window.as_millis() as u64,
                        "No pong within liveness window"
                    );
                }
                Liveness::Overdue
            }
            Some(_) => Liveness::Awaiting,
        }
    }
}

impl<T: Transport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        if self.request.is_some() {
            self.transport.close();
        }
    }
}
