//! seller-notify: command-line client for marketplace seller notifications.
//!
//! ## Subcommands
//!
//! - `listen`: Hold a live channel to the relay and store incoming notifications
//! - `list`: Show the stored notifications for a seller
//! - `read`: Mark one (or every) notification as read
//! - `clear`: Drop a seller's notification history
//! - `publish`: Send a one-off event through the relay (manual testing)

mod error;
mod inbox;
mod listen;
mod logging;
mod publish;

use clap::{Parser, Subcommand};
use seller_notify_core::StorageConfig;
use seller_notify_protocol::NEW_REQUEST_EVENT;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "seller-notify")]
#[command(about = "Live notification client for marketplace sellers")]
#[command(version)]
struct Cli {
    /// Data directory (default: ~/.seller-notify)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the relay and receive notifications until the channel ends
    Listen {
        /// Seller user id
        #[arg(long)]
        user: String,

        /// Session token presented to the relay
        #[arg(long)]
        token: String,

        /// Relay address (host:port), overrides config.toml
        #[arg(long)]
        server: Option<String>,

        /// Treat OS push as initialized with this token (suppresses live alerts)
        #[arg(long, value_name = "TOKEN")]
        push_token: Option<String>,
    },

    /// List stored notifications, newest first
    List {
        #[arg(long)]
        user: String,

        /// Only show unread notifications
        #[arg(long)]
        unread: bool,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Mark a notification as read
    Read {
        #[arg(long)]
        user: String,

        /// Notification id
        #[arg(value_name = "ID", required_unless_present = "all")]
        id: Option<String>,

        /// Mark every notification as read
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },

    /// Delete all stored notifications for a seller
    Clear {
        #[arg(long)]
        user: String,
    },

    /// Publish an event to every connected seller
    Publish {
        /// Relay address (host:port), overrides config.toml
        #[arg(long)]
        server: Option<String>,

        /// Event name
        #[arg(long, default_value = NEW_REQUEST_EVENT)]
        event: String,

        /// Raw JSON payload; replaces the request flags below
        #[arg(long, value_name = "JSON")]
        data: Option<String>,

        #[arg(long)]
        request_id: Option<String>,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        sub_category: Option<String>,

        #[arg(long)]
        city: Option<String>,

        /// Distance in kilometres
        #[arg(long)]
        distance: Option<f64>,
    },
}

fn main() {
    let cli = Cli::parse();
    let storage = cli
        .root
        .map(StorageConfig::with_root)
        .unwrap_or_default();
    let _logging_guard = logging::init(&storage.logs_dir());

    let result = match cli.command {
        Commands::Listen {
            user,
            token,
            server,
            push_token,
        } => listen::run(
            &storage,
            listen::ListenArgs {
                user,
                token,
                server,
                push_token,
            },
        ),
        Commands::List { user, unread, json } => inbox::list(&storage, &user, unread, json),
        Commands::Read { user, id, all } => inbox::read(&storage, &user, id.as_deref(), all),
        Commands::Clear { user } => inbox::clear(&storage, &user),
        Commands::Publish {
            server,
            event,
            data,
            request_id,
            title,
            category,
            sub_category,
            city,
            distance,
        } => publish::run(
            &storage,
            publish::PublishArgs {
                server,
                event,
                data,
                request_id,
                title,
                category,
                sub_category,
                city,
                distance,
            },
        ),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "seller-notify failed");
        std::process::exit(1);
    }
}
