use seller_notify_core::{
    Alerter, ConnectionEvent, ConnectionManager, ConnectionStatus, MemoryKeyValueStore,
    NotificationRecord, NotificationSession, NotificationStore, Reconciler, ReconnectPolicy,
    StaticPush, TcpTransport, TransportSettings,
};
use seller_notify_protocol::{
    encode_frame, parse_server_frame, ClientFrame, ServerFrame, NEW_REQUEST_EVENT,
};
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct RelayGuard {
    child: Child,
    addr: String,
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_relay(allow: &[&str]) -> RelayGuard {
    let mut command = Command::new(env!("CARGO_BIN_EXE_seller-notify-relay"));
    command.args(["--addr", "127.0.0.1:0"]);
    for entry in allow {
        command.args(["--allow", entry]);
    }
    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn seller-notify-relay");

    let stdout = child.stdout.take().expect("relay stdout");
    let mut line = String::new();
    BufReader::new(stdout)
        .read_line(&mut line)
        .expect("Failed to read relay banner");
    let addr = line
        .trim()
        .strip_prefix("listening on ")
        .unwrap_or_else(|| panic!("unexpected banner {:?}", line))
        .to_string();
    RelayGuard { child, addr }
}

struct Client {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Client {
    fn connect(addr: &str) -> Self {
        let stream = TcpStream::connect(addr).expect("Failed to connect to relay");
        stream
            .set_read_timeout(Some(Duration::from_secs(3)))
            .unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        Self { stream, reader }
    }

    fn send(&mut self, frame: &ClientFrame) {
        self.stream.write_all(&encode_frame(frame).unwrap()).unwrap();
        self.stream.flush().unwrap();
    }

    fn send_raw(&mut self, line: &str) {
        self.stream.write_all(line.as_bytes()).unwrap();
        self.stream.write_all(b"\n").unwrap();
    }

    fn recv(&mut self) -> Option<ServerFrame> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(parse_server_frame(line.trim_end().as_bytes()).expect("valid frame")),
        }
    }
}

fn publish(addr: &str, event: &str, data: serde_json::Value) -> ServerFrame {
    let mut publisher = Client::connect(addr);
    publisher.send(&ClientFrame::Publish {
        event: event.to_string(),
        data,
    });
    publisher.recv().expect("publish reply")
}

#[test]
fn relay_handshake_ping_and_fanout() {
    let relay = spawn_relay(&["tok-a=seller-a"]);

    let mut subscriber = Client::connect(&relay.addr);
    subscriber.send(&ClientFrame::handshake("tok-a", Some("seller-a")));
    match subscriber.recv() {
        Some(ServerFrame::HandshakeAccepted { socket_id }) => assert!(socket_id.starts_with("sock-")),
        other => panic!("unexpected handshake reply {:?}", other),
    }

    subscriber.send(&ClientFrame::Ping { nonce: 42 });
    assert_eq!(subscriber.recv(), Some(ServerFrame::Pong { nonce: 42 }));

    subscriber.send_raw("{not json");
    assert!(matches!(
        subscriber.recv(),
        Some(ServerFrame::Error { code, .. }) if code == "invalid_json"
    ));

    let reply = publish(
        &relay.addr,
        NEW_REQUEST_EVENT,
        json!({"request": {"id": "r1", "title": "Lamp"}}),
    );
    assert_eq!(reply, ServerFrame::Published { delivered: 1 });

    match subscriber.recv() {
        Some(ServerFrame::Event { event, data }) => {
            assert_eq!(event, NEW_REQUEST_EVENT);
            assert_eq!(data["request"]["id"], "r1");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn relay_rejects_unknown_token() {
    let relay = spawn_relay(&["tok-a=seller-a"]);

    let mut subscriber = Client::connect(&relay.addr);
    subscriber.send(&ClientFrame::handshake("tok-x", None));
    assert!(matches!(
        subscriber.recv(),
        Some(ServerFrame::HandshakeRejected { code, .. }) if code == "unauthorized"
    ));
    assert_eq!(subscriber.recv(), None, "connection should be closed");

    let reply = publish(&relay.addr, "test_notification", json!({}));
    assert_eq!(reply, ServerFrame::Published { delivered: 0 });
}

#[test]
fn relay_requires_handshake_before_ping() {
    let relay = spawn_relay(&[]);

    let mut client = Client::connect(&relay.addr);
    client.send(&ClientFrame::Ping { nonce: 1 });
    assert!(matches!(
        client.recv(),
        Some(ServerFrame::Error { code, .. }) if code == "handshake_required"
    ));
}

#[derive(Default)]
struct RecordingAlerter {
    alerts: Mutex<Vec<String>>,
}

impl Alerter for RecordingAlerter {
    fn alert(&self, record: &NotificationRecord) {
        self.alerts.lock().unwrap().push(record.title.clone());
    }
}

#[test]
fn session_receives_published_request_through_relay() {
    let relay = spawn_relay(&["tok-a=seller-a"]);

    let settings = TransportSettings {
        handshake_timeout: Duration::from_secs(2),
        reconnect: ReconnectPolicy {
            step: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            jitter: Duration::ZERO,
            max_attempts: Some(10),
        },
    };
    let alerter = Arc::new(RecordingAlerter::default());
    let mut reconciler = Reconciler::new(alerter.clone());
    reconciler.initialize_push(&mut StaticPush::unavailable());
    let mut session = NotificationSession::new(
        "seller-a",
        ConnectionManager::new(
            TcpTransport::new(relay.addr.clone(), settings),
            Duration::from_secs(1),
        ),
        NotificationStore::load(Arc::new(MemoryKeyValueStore::new()), "k", 50),
        reconciler,
    );
    session.connect("tok-a");

    let deadline = Instant::now() + Duration::from_secs(5);
    while session.connection_state().status != ConnectionStatus::Connected {
        assert!(Instant::now() < deadline, "never connected");
        session.wait(Duration::from_millis(50));
    }

    let reply = publish(
        &relay.addr,
        NEW_REQUEST_EVENT,
        json!({
            "request": {
                "id": "req-7",
                "title": "Plombier",
                "category": "Maison",
                "location": {"city": "Lyon", "distance": 3.2}
            }
        }),
    );
    assert_eq!(reply, ServerFrame::Published { delivered: 1 });

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let events = session.wait(Duration::from_millis(50));
        if events
            .iter()
            .any(|event| matches!(event, ConnectionEvent::Inbound { .. }))
        {
            break;
        }
        assert!(Instant::now() < deadline, "event never arrived");
    }

    let record = session.store().get("req-7").expect("stored record");
    assert_eq!(record.title, "Plombier");
    assert!(!record.read);
    assert_eq!(session.store().unread_count(), 1);
    assert_eq!(*alerter.alerts.lock().unwrap(), vec!["Plombier".to_string()]);

    session.shutdown();
}
