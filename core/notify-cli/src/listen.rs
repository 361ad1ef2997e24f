use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use seller_notify_core::{
    load_config, Alerter, AuthState, ConnectionEvent, FileKeyValueStore, NotificationRecord,
    PushDelivery, SessionManager, SessionOptions, StaticPush, StorageConfig, TcpTransport,
    TransportSettings,
};
use tracing::info;

use crate::error::CliError;

const WAIT_INTERVAL_MS: u64 = 500;

pub struct ListenArgs {
    pub user: String,
    pub token: String,
    pub server: Option<String>,
    pub push_token: Option<String>,
}

/// Prints alerts as single lines on stdout.
struct TerminalAlerter;

impl Alerter for TerminalAlerter {
    fn alert(&self, record: &NotificationRecord) {
        println!("{}", alert_line(record));
    }
}

fn alert_line(record: &NotificationRecord) -> String {
    format!(
        "[{}] {} | {}: {}",
        record.created_at.with_timezone(&Local).format("%H:%M:%S"),
        record.kind.as_str(),
        record.title,
        record.message
    )
}

pub fn run(storage: &StorageConfig, args: ListenArgs) -> Result<(), CliError> {
    if args.user.trim().is_empty() || args.token.trim().is_empty() {
        return Err(CliError::InvalidArgs(
            "--user and --token must not be empty".to_string(),
        ));
    }

    let mut config = load_config(storage);
    if let Some(server) = args.server {
        config.server_addr = server;
    }
    let addr = config.server_addr.clone();
    let settings = TransportSettings::from(&config);
    let push: Box<dyn PushDelivery> = match args.push_token.as_deref() {
        Some(token) => Box::new(StaticPush::available(token)),
        None => Box::new(StaticPush::unavailable()),
    };

    let mut manager = SessionManager::new(
        move || TcpTransport::new(addr.clone(), settings.clone()),
        Arc::new(FileKeyValueStore::new(storage.data_dir())),
        Arc::new(TerminalAlerter),
        push,
        SessionOptions::from(&config),
    );
    manager.on_auth_changed(&AuthState::authenticated(&args.token, &args.user));

    if let Some(session) = manager.session() {
        println!(
            "{} stored notification(s), {} unread; connecting to {}",
            session.store().len(),
            session.store().unread_count(),
            config.server_addr
        );
    }

    loop {
        let events = manager.wait(Duration::from_millis(WAIT_INTERVAL_MS));
        for event in &events {
            if let ConnectionEvent::Connected { socket_id } = event {
                println!("connected ({})", socket_id);
            }
        }

        let Some(session) = manager.session_mut() else {
            return Err(CliError::ChannelClosed(
                "credentials rejected by relay".to_string(),
            ));
        };
        session.connection_mut().check_liveness();

        if !session.connection().is_active() {
            let reason = session
                .connection_state()
                .connection_error()
                .unwrap_or("connection closed")
                .to_string();
            session.shutdown();
            info!(reason = %reason, "Listener stopping");
            return Err(CliError::ChannelClosed(reason));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use seller_notify_core::NotificationKind;
    use serde_json::json;

    #[test]
    fn alert_line_shows_kind_title_and_message() {
        let record = NotificationRecord {
            id: "r1".to_string(),
            kind: NotificationKind::NewRequest,
            title: "Lamp".to_string(),
            message: "Lighting · Lyon".to_string(),
            payload: json!({}),
            created_at: Utc::now(),
            read: false,
        };

        let line = alert_line(&record);
        assert!(line.contains("new_request"));
        assert!(line.ends_with("Lamp: Lighting · Lyon"));
    }

    #[test]
    fn empty_credentials_are_rejected_before_connecting() {
        let temp = tempfile::tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        let result = run(
            &storage,
            ListenArgs {
                user: "seller-1".to_string(),
                token: "  ".to_string(),
                server: Some("127.0.0.1:1".to_string()),
                push_token: None,
            },
        );
        assert!(matches!(result, Err(CliError::InvalidArgs(_))));
    }
}
