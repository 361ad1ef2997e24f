//! One-shot publisher: connect, send a single `publish` frame, read the
//! relay's reply, disconnect.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use chrono::Utc;
use seller_notify_core::{load_config, StorageConfig};
use seller_notify_protocol::{
    encode_frame, parse_server_frame, ClientFrame, NewRequestPayload, RequestLocation,
    RequestSummary, ServerFrame, MAX_FRAME_BYTES,
};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::CliError;

pub struct PublishArgs {
    pub server: Option<String>,
    pub event: String,
    pub data: Option<String>,
    pub request_id: Option<String>,
    pub title: Option<String>,
    pub category: Option<String>,
    pub sub_category: Option<String>,
    pub city: Option<String>,
    pub distance: Option<f64>,
}

impl PublishArgs {
    /// Raw `--data` wins; otherwise a request summary is assembled from the
    /// individual flags.
    fn payload(&self) -> Result<Value, CliError> {
        if let Some(raw) = &self.data {
            return Ok(serde_json::from_str(raw)?);
        }

        let location = if self.city.is_some() || self.distance.is_some() {
            Some(RequestLocation {
                city: self.city.clone(),
                distance: self.distance,
            })
        } else {
            None
        };
        let payload = NewRequestPayload {
            request: RequestSummary {
                id: Some(
                    self.request_id
                        .clone()
                        .unwrap_or_else(|| format!("req-{}", Utc::now().timestamp_millis())),
                ),
                title: self.title.clone(),
                category: self.category.clone(),
                sub_category: self.sub_category.clone(),
                location,
            },
        };
        Ok(serde_json::to_value(payload)?)
    }
}

pub fn run(storage: &StorageConfig, args: PublishArgs) -> Result<(), CliError> {
    let config = load_config(storage);
    let addr = args.server.clone().unwrap_or(config.server_addr.clone());
    let frame = ClientFrame::Publish {
        event: args.event.clone(),
        data: args.payload()?,
    };
    frame.validate().map_err(|err| CliError::Relay {
        code: err.code,
        message: err.message,
    })?;

    let delivered = send_publish(&addr, &frame, config.handshake_timeout())?;
    println!("{} delivered to {} subscriber(s)", args.event, delivered);
    Ok(())
}

fn send_publish(addr: &str, frame: &ClientFrame, timeout: Duration) -> Result<usize, CliError> {
    let socket_addr = addr
        .to_socket_addrs()
        .map_err(|err| CliError::io(&format!("resolving {}", addr), err))?
        .next()
        .ok_or_else(|| CliError::InvalidArgs(format!("{} did not resolve", addr)))?;

    let mut stream = TcpStream::connect_timeout(&socket_addr, timeout)
        .map_err(|err| CliError::io(&format!("connecting to {}", addr), err))?;
    stream
        .set_read_timeout(Some(timeout))
        .and_then(|_| stream.set_write_timeout(Some(timeout)))
        .map_err(|err| CliError::io("configuring socket", err))?;

    debug!(addr = %addr, "Publishing event");
    stream
        .write_all(&encode_frame(frame)?)
        .and_then(|_| stream.flush())
        .map_err(|err| CliError::io("writing publish frame", err))?;

    let mut reader = BufReader::new(stream).take(MAX_FRAME_BYTES as u64 + 1);
    let mut line = Vec::new();
    let read = reader
        .read_until(b'\n', &mut line)
        .map_err(|err| CliError::io("reading relay reply", err))?;
    if read == 0 {
        return Err(CliError::UnexpectedReply(
            "relay closed the connection without replying".to_string(),
        ));
    }
    if line.last() == Some(&b'\n') {
        line.pop();
    }

    let reply = parse_server_frame(&line).map_err(|err| CliError::Relay {
        code: err.code,
        message: err.message,
    })?;
    match reply {
        ServerFrame::Published { delivered } => {
            info!(delivered, "Event published");
            Ok(delivered)
        }
        ServerFrame::Error { code, message } => Err(CliError::Relay { code, message }),
        other => Err(CliError::UnexpectedReply(format!("{:?}", other))),
    }
}
