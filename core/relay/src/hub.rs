//! Subscriber registry and event fan-out.

use std::collections::HashMap;
use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard};

use seller_notify_protocol::{encode_frame, ServerFrame};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Write half of a subscriber connection, shared between its own thread
/// (pongs, replies) and publishers.
pub type SharedWriter = Arc<Mutex<TcpStream>>;

struct Subscriber {
    user_id: String,
    writer: SharedWriter,
}

#[derive(Default)]
struct HubInner {
    subscribers: HashMap<String, Subscriber>,
    by_user: HashMap<String, String>,
}

/// One live subscriber per seller. Registering a second connection for the
/// same seller closes the first.
#[derive(Default)]
pub struct Hub {
    inner: Mutex<HubInner>,
}

pub fn write_frame(writer: &SharedWriter, frame: &ServerFrame) -> std::io::Result<()> {
    let payload = encode_frame(frame).map_err(std::io::Error::other)?;
    let mut stream = lock(writer);
    stream.write_all(&payload)?;
    stream.flush()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_socket_id() -> String {
        format!("sock-{}", ulid::Ulid::new())
    }

    /// Adds a subscriber under `socket_id`. Only register once the handshake
    /// reply has been written, so no event can precede it on the wire.
    pub fn register(&self, socket_id: &str, user_id: &str, writer: SharedWriter) {
        let socket_id = socket_id.to_string();
        let mut inner = lock(&self.inner);

        if let Some(previous) = inner.by_user.insert(user_id.to_string(), socket_id.clone()) {
            if let Some(old) = inner.subscribers.remove(&previous) {
                info!(user_id = %user_id, socket_id = %previous, "Evicting older connection");
                let _ = lock(&old.writer).shutdown(Shutdown::Both);
            }
        }

        inner.subscribers.insert(
            socket_id.clone(),
            Subscriber {
                user_id: user_id.to_string(),
                writer,
            },
        );
    }

    pub fn unregister(&self, socket_id: &str) {
        let mut inner = lock(&self.inner);
        if let Some(subscriber) = inner.subscribers.remove(socket_id) {
            if inner.by_user.get(&subscriber.user_id).map(String::as_str) == Some(socket_id) {
                inner.by_user.remove(&subscriber.user_id);
            }
            debug!(socket_id = %socket_id, user_id = %subscriber.user_id, "Subscriber removed");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).subscribers.len()
    }

    pub fn is_registered(&self, socket_id: &str) -> bool {
        lock(&self.inner).subscribers.contains_key(socket_id)
    }

    /// Sends an `event` frame to every subscriber. Subscribers whose socket
    /// fails are dropped. Returns how many received it.
    pub fn broadcast(&self, event: &str, data: &Value) -> usize {
        let targets: Vec<(String, SharedWriter)> = lock(&self.inner)
            .subscribers
            .iter()
            .map(|(socket_id, subscriber)| (socket_id.clone(), Arc::clone(&subscriber.writer)))
            .collect();

        let frame = ServerFrame::Event {
            event: event.to_string(),
            data: data.clone(),
        };
        let mut delivered = 0;
        for (socket_id, writer) in targets {
            match write_frame(&writer, &frame) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(socket_id = %socket_id, error = %err, "Dropping unreachable subscriber");
                    self.unregister(&socket_id);
                }
            }
        }
        info!(event = %event, delivered, "Event broadcast");
        delivered
    }
}
