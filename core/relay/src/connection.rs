//! Per-connection handling. The first frame decides the role: a handshake
//! makes the connection a subscriber, a publish makes it a one-shot
//! publisher.

use std::io::{BufRead, BufReader, Read};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use seller_notify_protocol::{
    parse_client_frame, ClientFrame, ErrorInfo, ServerFrame, MAX_FRAME_BYTES,
};
use tracing::{debug, info, warn};

use crate::auth::Authorizer;
use crate::hub::{write_frame, Hub, SharedWriter};

const FIRST_FRAME_TIMEOUT_SECS: u64 = 10;
const WRITE_TIMEOUT_SECS: u64 = 5;

enum ReadOutcome {
    Frame(ClientFrame),
    /// Recoverable: the line was consumed, the stream is still aligned.
    Invalid(ErrorInfo),
    Closed,
}

fn read_frame(reader: &mut BufReader<TcpStream>) -> ReadOutcome {
    let mut line = Vec::new();
    let limit = MAX_FRAME_BYTES as u64 + 1;
    match reader.by_ref().take(limit).read_until(b'\n', &mut line) {
        Ok(0) => return ReadOutcome::Closed,
        Ok(_) => {}
        Err(err) => {
            debug!(error = %err, "Read failed");
            return ReadOutcome::Closed;
        }
    }

    if line.last() != Some(&b'\n') {
        if line.len() > MAX_FRAME_BYTES {
            warn!("Frame exceeded maximum size; closing");
        }
        return ReadOutcome::Closed;
    }
    line.pop();

    if line.iter().all(|b| b.is_ascii_whitespace()) {
        return ReadOutcome::Invalid(ErrorInfo::new("empty_frame", "frame was empty"));
    }
    match parse_client_frame(&line) {
        Ok(frame) => ReadOutcome::Frame(frame),
        Err(err) => ReadOutcome::Invalid(err),
    }
}

fn reply(writer: &SharedWriter, frame: ServerFrame) -> bool {
    match write_frame(writer, &frame) {
        Ok(()) => true,
        Err(err) => {
            debug!(error = %err, "Reply failed");
            false
        }
    }
}

pub fn handle_connection(stream: TcpStream, hub: Arc<Hub>, auth: Arc<Authorizer>) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let _ = stream.set_read_timeout(Some(Duration::from_secs(FIRST_FRAME_TIMEOUT_SECS)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(WRITE_TIMEOUT_SECS)));

    let mut reader = match stream.try_clone() {
        Ok(read_half) => BufReader::new(read_half),
        Err(err) => {
            warn!(peer = %peer, error = %err, "Failed to clone connection");
            return;
        }
    };
    let writer: SharedWriter = Arc::new(Mutex::new(stream));

    let first = match read_frame(&mut reader) {
        ReadOutcome::Frame(frame) => frame,
        ReadOutcome::Invalid(err) => {
            warn!(peer = %peer, code = %err.code, message = %err.message, "Rejected first frame");
            reply(&writer, err.into());
            return;
        }
        ReadOutcome::Closed => return,
    };

    match first {
        frame @ ClientFrame::Handshake { .. } => {
            serve_subscriber(&peer, frame, reader, writer, &hub, &auth)
        }
        ClientFrame::Publish { event, data } => {
            let delivered = hub.broadcast(&event, &data);
            reply(&writer, ServerFrame::Published { delivered });
        }
        ClientFrame::Ping { .. } => {
            reply(
                &writer,
                ErrorInfo::new("handshake_required", "first frame must be a handshake").into(),
            );
        }
    }
}

fn serve_subscriber(
    peer: &str,
    handshake: ClientFrame,
    mut reader: BufReader<TcpStream>,
    writer: SharedWriter,
    hub: &Hub,
    auth: &Authorizer,
) {
    let user_id = match auth.authorize(&handshake) {
        Ok(user_id) => user_id,
        Err(err) => {
            warn!(peer = %peer, code = %err.code, "Handshake rejected");
            reply(
                &writer,
                ServerFrame::HandshakeRejected {
                    code: err.code,
                    message: err.message,
                },
            );
            return;
        }
    };

    let Some(socket_id) = accept_subscriber(&writer, hub, &user_id) else {
        return;
    };
    info!(peer = %peer, user_id = %user_id, socket_id = %socket_id, "Subscriber connected");

    // Subscribers may stay idle indefinitely.
    let _ = reader.get_ref().set_read_timeout(None);

    loop {
        let keep_going = match read_frame(&mut reader) {
            ReadOutcome::Frame(ClientFrame::Ping { nonce }) => {
                reply(&writer, ServerFrame::Pong { nonce })
            }
            ReadOutcome::Frame(ClientFrame::Publish { event, data }) => {
                let delivered = hub.broadcast(&event, &data);
                reply(&writer, ServerFrame::Published { delivered })
            }
            ReadOutcome::Frame(ClientFrame::Handshake { .. }) => reply(
                &writer,
                ErrorInfo::new("already_connected", "handshake already completed").into(),
            ),
            ReadOutcome::Invalid(err) => reply(&writer, err.into()),
            ReadOutcome::Closed => false,
        };
        if !keep_going {
            break;
        }
    }

    hub.unregister(&socket_id);
    info!(user_id = %user_id, socket_id = %socket_id, "Subscriber disconnected");
}

/// Replies `handshake_accepted` and then registers the subscriber, so the
/// reply is always the first frame the client reads.
fn accept_subscriber(writer: &SharedWriter, hub: &Hub, user_id: &str) -> Option<String> {
    let socket_id = Hub::new_socket_id();
    let accepted = ServerFrame::HandshakeAccepted {
        socket_id: socket_id.clone(),
    };
    if !reply(writer, accepted) {
        return None;
    }
    hub.register(&socket_id, user_id, Arc::clone(writer));
    Some(socket_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use seller_notify_protocol::parse_server_frame;
    use serde_json::json;
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        (server, client)
    }

    #[test]
    fn accepted_reply_precedes_concurrent_events() {
        let hub = Arc::new(Hub::new());
        let stop = Arc::new(AtomicBool::new(false));
        let publisher = {
            let hub = Arc::clone(&hub);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    hub.broadcast("test_notification", &json!({}));
                }
            })
        };

        for _ in 0..20 {
            let (server, client) = socket_pair();
            let writer: SharedWriter = Arc::new(Mutex::new(server));
            let socket_id = accept_subscriber(&writer, &hub, "seller-a").unwrap();

            let mut reader = BufReader::new(client);
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            match parse_server_frame(line.trim_end().as_bytes()).unwrap() {
                ServerFrame::HandshakeAccepted { socket_id: sent } => assert_eq!(sent, socket_id),
                other => panic!("expected handshake_accepted first, got {:?}", other),
            }
            assert!(hub.is_registered(&socket_id));
            hub.unregister(&socket_id);
        }

        stop.store(true, Ordering::Relaxed);
        publisher.join().unwrap();
    }

    #[test]
    fn failed_accept_leaves_hub_untouched() {
        let hub = Hub::new();
        let (server, client) = socket_pair();
        drop(client);
        server.shutdown(std::net::Shutdown::Write).unwrap();
        let writer: SharedWriter = Arc::new(Mutex::new(server));

        assert!(accept_subscriber(&writer, &hub, "seller-a").is_none());
        assert_eq!(hub.subscriber_count(), 0);
    }
}
