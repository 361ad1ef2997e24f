//! Newline-delimited JSON transport over TCP.
//!
//! One worker thread per `open`. The worker connects, performs the handshake,
//! forwards server frames into the sink, and on loss retries according to the
//! [`ReconnectPolicy`]. A rejected handshake ends the worker for good.
//!
//! `close` flips a stop flag and shuts the socket down, which unblocks the
//! worker's read; the worker exits without emitting anything further.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use seller_notify_protocol::{
    encode_frame, parse_server_frame, ClientFrame, ServerFrame, MAX_FRAME_BYTES,
};
use tracing::{debug, warn};

use super::transport::{OpenRequest, Transport, TransportEvent, TransportSink};
use crate::config::NotifyConfig;
use crate::error::{NotifyError, Result};
use crate::reconnect::ReconnectPolicy;

const STOP_POLL_INTERVAL_MS: u64 = 50;

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub handshake_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self::from(&NotifyConfig::default())
    }
}

impl From<&NotifyConfig> for TransportSettings {
    fn from(config: &NotifyConfig) -> Self {
        Self {
            handshake_timeout: config.handshake_timeout(),
            reconnect: ReconnectPolicy::from(&config.reconnect),
        }
    }
}

type WriterSlot = Arc<Mutex<Option<TcpStream>>>;

struct Worker {
    stop: Arc<AtomicBool>,
    writer: WriterSlot,
}

pub struct TcpTransport {
    addr: String,
    settings: TransportSettings,
    worker: Option<Worker>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>, settings: TransportSettings) -> Self {
        Self {
            addr: addr.into(),
            settings,
            worker: None,
        }
    }
}

fn lock_slot(slot: &Mutex<Option<TcpStream>>) -> MutexGuard<'_, Option<TcpStream>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Transport for TcpTransport {
    fn open(&mut self, request: OpenRequest, sink: TransportSink) -> Result<()> {
        self.close();

        if self.addr.trim().is_empty() || !self.addr.contains(':') {
            return Err(NotifyError::InvalidAddress(self.addr.clone()));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let writer: WriterSlot = Arc::new(Mutex::new(None));
        let context = WorkerContext {
            addr: self.addr.clone(),
            request,
            sink,
            settings: self.settings.clone(),
            stop: Arc::clone(&stop),
            writer: Arc::clone(&writer),
        };

        thread::Builder::new()
            .name("notify-transport".to_string())
            .spawn(move || context.run())
            .map_err(|source| NotifyError::Transport {
                context: "spawning transport worker".to_string(),
                source,
            })?;

        self.worker = Some(Worker { stop, writer });
        Ok(())
    }

    fn send(&mut self, frame: &ClientFrame) -> Result<()> {
        let worker = self.worker.as_ref().ok_or(NotifyError::NotConnected)?;
        let payload = encode_frame(frame).map_err(|source| NotifyError::Json {
            context: "encoding client frame".to_string(),
            source,
        })?;

        let mut slot = lock_slot(&worker.writer);
        let stream = slot.as_mut().ok_or(NotifyError::NotConnected)?;
        stream
            .write_all(&payload)
            .and_then(|_| stream.flush())
            .map_err(|source| NotifyError::Transport {
                context: "writing client frame".to_string(),
                source,
            })
    }

    fn close(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::SeqCst);
            if let Some(stream) = lock_slot(&worker.writer).take() {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

enum EstablishError {
    Rejected(String),
    Failed(String),
}

struct Established {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    socket_id: String,
}

struct WorkerContext {
    addr: String,
    request: OpenRequest,
    sink: TransportSink,
    settings: TransportSettings,
    stop: Arc<AtomicBool>,
    writer: WriterSlot,
}

impl WorkerContext {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn run(self) {
        let mut attempt: u32 = 0;
        loop {
            if self.stopped() {
                return;
            }

            match self.establish() {
                Ok(established) => {
                    attempt = 0;
                    {
                        let mut slot = lock_slot(&self.writer);
                        if self.stopped() {
                            let _ = established.writer.shutdown(Shutdown::Both);
                            return;
                        }
                        *slot = Some(established.writer);
                    }

                    if !self.sink.emit(TransportEvent::Connected {
                        socket_id: established.socket_id,
                    }) {
                        self.release_writer();
                        return;
                    }

                    let reason = self.read_frames(established.reader);
                    self.release_writer();
                    if self.stopped() {
                        return;
                    }
                    if !self.sink.emit(TransportEvent::Disconnected { reason }) {
                        return;
                    }
                }
                Err(EstablishError::Rejected(message)) => {
                    if !self.stopped() {
                        self.sink.emit(TransportEvent::AuthRejected { message });
                    }
                    return;
                }
                Err(EstablishError::Failed(message)) => {
                    if self.stopped() {
                        return;
                    }
                    debug!(addr = %self.addr, error = %message, "Connect attempt failed");
                    if !self.sink.emit(TransportEvent::ConnectFailed { message }) {
                        return;
                    }
                }
            }

            attempt = attempt.saturating_add(1);
            if !self.settings.reconnect.allows(attempt) {
                self.sink.emit(TransportEvent::GaveUp {
                    message: format!("gave up after {} reconnect attempts", attempt - 1),
                });
                return;
            }
            let delay = self.settings.reconnect.next_delay(attempt);
            if !self.sleep_unless_stopped(delay) {
                return;
            }
            if !self.sink.emit(TransportEvent::Reconnecting { attempt }) {
                return;
            }
        }
    }

    fn establish(&self) -> std::result::Result<Established, EstablishError> {
        let timeout = self.settings.handshake_timeout;
        let addrs: Vec<SocketAddr> = self
            .addr
            .to_socket_addrs()
            .map_err(|err| EstablishError::Failed(format!("resolve {}: {}", self.addr, err)))?
            .collect();

        let mut last_error = None;
        let mut connected = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    connected = Some(stream);
                    break;
                }
                Err(err) => last_error = Some(err),
            }
        }
        let stream = connected.ok_or_else(|| {
            let detail = last_error
                .map(|err| err.to_string())
                .unwrap_or_else(|| "no addresses".to_string());
            EstablishError::Failed(format!("connect {}: {}", self.addr, detail))
        })?;

        let io_failed = |context: &str, err: io::Error| {
            EstablishError::Failed(format!("{}: {}", context, err))
        };
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|err| io_failed("set read timeout", err))?;
        stream
            .set_write_timeout(Some(timeout))
            .map_err(|err| io_failed("set write timeout", err))?;
        let _ = stream.set_nodelay(true);

        let mut writer = stream
            .try_clone()
            .map_err(|err| io_failed("clone stream", err))?;
        let payload = encode_frame(&self.request.handshake_frame())
            .map_err(|err| EstablishError::Failed(format!("encode handshake: {}", err)))?;
        writer
            .write_all(&payload)
            .and_then(|_| writer.flush())
            .map_err(|err| io_failed("send handshake", err))?;

        let mut reader = BufReader::new(stream);
        let line = match read_frame_line(&mut reader) {
            Ok(Some(line)) => line,
            Ok(None) => {
                return Err(EstablishError::Failed(
                    "server closed connection during handshake".to_string(),
                ))
            }
            Err(err) => return Err(io_failed("read handshake reply", err)),
        };

        match parse_server_frame(&line) {
            Ok(ServerFrame::HandshakeAccepted { socket_id }) => {
                reader
                    .get_ref()
                    .set_read_timeout(None)
                    .map_err(|err| io_failed("clear read timeout", err))?;
                Ok(Established {
                    reader,
                    writer,
                    socket_id,
                })
            }
            Ok(ServerFrame::HandshakeRejected { code, message }) => {
                Err(EstablishError::Rejected(format!("{}: {}", code, message)))
            }
            Ok(other) => Err(EstablishError::Failed(format!(
                "unexpected handshake reply: {:?}",
                other
            ))),
            Err(err) => Err(EstablishError::Failed(err.message)),
        }
    }

    fn read_frames(&self, mut reader: BufReader<TcpStream>) -> String {
        loop {
            match read_frame_line(&mut reader) {
                Ok(None) => return "server closed connection".to_string(),
                Ok(Some(line)) => {
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    match parse_server_frame(&line) {
                        Ok(frame) => {
                            if !self.sink.emit(TransportEvent::Frame(frame)) {
                                return "client dropped".to_string();
                            }
                        }
                        Err(err) => {
                            warn!(code = %err.code, message = %err.message, "Ignoring malformed server frame");
                        }
                    }
                }
                Err(err) => return format!("read failed: {}", err),
            }
        }
    }

    fn release_writer(&self) {
        if let Some(stream) = lock_slot(&self.writer).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Returns false if the transport was closed while waiting.
    fn sleep_unless_stopped(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if self.stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let slice = Duration::from_millis(STOP_POLL_INTERVAL_MS).min(deadline - now);
            thread::sleep(slice);
        }
    }
}

/// Reads one newline-terminated frame, bounded by [`MAX_FRAME_BYTES`].
fn read_frame_line<R: BufRead>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut buffer = Vec::new();
    let read = reader
        .by_ref()
        .take(MAX_FRAME_BYTES as u64 + 1)
        .read_until(b'\n', &mut buffer)?;
    if read == 0 {
        return Ok(None);
    }
    if buffer.last() == Some(&b'\n') {
        buffer.pop();
    } else if buffer.len() > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame exceeded maximum size",
        ));
    }
    Ok(Some(buffer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_frame_line_splits_on_newline() {
        let mut reader = BufReader::new(&b"{\"a\":1}\n{\"b\":2}\n"[..]);
        assert_eq!(
            read_frame_line(&mut reader).unwrap().unwrap(),
            b"{\"a\":1}".to_vec()
        );
        assert_eq!(
            read_frame_line(&mut reader).unwrap().unwrap(),
            b"{\"b\":2}".to_vec()
        );
        assert!(read_frame_line(&mut reader).unwrap().is_none());
    }

    #[test]
    fn read_frame_line_rejects_oversized_frames() {
        let oversized = vec![b'x'; MAX_FRAME_BYTES + 10];
        let mut reader = BufReader::new(oversized.as_slice());
        let err = read_frame_line(&mut reader).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn open_rejects_address_without_port() {
        let (tx, _rx) = std::sync::mpsc::channel();
        let mut transport = TcpTransport::new("localhost", TransportSettings::default());
        let result = transport.open(
            OpenRequest {
                token: "t".to_string(),
                user_id: None,
            },
            TransportSink::new(1, tx),
        );
        assert!(matches!(result, Err(NotifyError::InvalidAddress(_))));
    }

    #[test]
    fn send_before_open_is_not_connected() {
        let mut transport = TcpTransport::new("127.0.0.1:1", TransportSettings::default());
        assert!(matches!(
            transport.send(&ClientFrame::Ping { nonce: 1 }),
            Err(NotifyError::NotConnected)
        ));
    }
}
