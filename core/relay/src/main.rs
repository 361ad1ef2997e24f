//! seller-notify-relay: minimal notification relay.
//!
//! Sellers connect and complete a handshake; publishers send a single
//! `publish` frame which is fanned out to every connected seller as an
//! `event` frame. Newline-delimited JSON over TCP, one thread per connection.
//!
//! The bound address is printed on stdout once listening, so callers can
//! bind to port 0.

use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use seller_notify_core::debug_logging_enabled;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod auth;
mod connection;
mod hub;

use auth::{parse_allow_entry, Authorizer};
use hub::Hub;

const DEFAULT_ADDR: &str = "127.0.0.1:7400";

#[derive(Parser)]
#[command(name = "seller-notify-relay")]
#[command(about = "Fan out seller notifications to connected clients")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = DEFAULT_ADDR)]
    addr: String,

    /// Accepted session token and the seller it belongs to (repeatable).
    /// Without any, every non-empty token is accepted.
    #[arg(long = "allow", value_name = "TOKEN=USER", value_parser = parse_allow_entry)]
    allow: Vec<(String, String)>,
}

fn main() {
    init_logging();
    let args = Args::parse();

    let listener = match TcpListener::bind(&args.addr) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, addr = %args.addr, "Failed to bind relay socket");
            std::process::exit(1);
        }
    };
    let local_addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, "Failed to read bound address");
            std::process::exit(1);
        }
    };

    let auth = Arc::new(Authorizer::new(args.allow));
    let hub = Arc::new(Hub::new());
    info!(addr = %local_addr, open = auth.is_open(), "Relay started");
    println!("listening on {}", local_addr);

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let hub = Arc::clone(&hub);
                let auth = Arc::clone(&auth);
                let spawned = thread::Builder::new()
                    .name("relay-conn".to_string())
                    .spawn(move || connection::handle_connection(stream, hub, auth));
                if let Err(err) = spawned {
                    warn!(error = %err, "Failed to spawn connection thread");
                }
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept relay connection");
            }
        }
    }
}

fn init_logging() {
    let filter = if debug_logging_enabled() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
