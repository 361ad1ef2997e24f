//! Offline access to a seller's stored notifications.

use std::sync::Arc;

use chrono::Local;
use serde::Serialize;
use seller_notify_core::{
    load_config, session::storage_key, FileKeyValueStore, NotificationRecord, NotificationStore,
    StorageConfig,
};

use crate::error::CliError;

#[derive(Serialize)]
struct InboxView<'a> {
    unread: usize,
    notifications: Vec<&'a NotificationRecord>,
}

fn open_store(storage: &StorageConfig, user: &str) -> Result<NotificationStore, CliError> {
    if user.trim().is_empty() {
        return Err(CliError::InvalidArgs("--user must not be empty".to_string()));
    }
    let config = load_config(storage);
    Ok(NotificationStore::load(
        Arc::new(FileKeyValueStore::new(storage.data_dir())),
        &storage_key(user),
        config.max_records,
    ))
}

fn render(store: &NotificationStore, unread_only: bool, json: bool) -> Result<String, CliError> {
    let notifications: Vec<&NotificationRecord> = store
        .iter()
        .filter(|record| !unread_only || !record.read)
        .collect();

    if json {
        let view = InboxView {
            unread: store.unread_count(),
            notifications,
        };
        return Ok(serde_json::to_string_pretty(&view)?);
    }

    if notifications.is_empty() {
        return Ok("No notifications.".to_string());
    }

    let mut out = format!("{} unread\n", store.unread_count());
    for record in notifications {
        let marker = if record.read { ' ' } else { '*' };
        out.push_str(&format!(
            "{} {}  {}  {}\n    {}\n",
            marker,
            record.id,
            record
                .created_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M"),
            record.title,
            record.message
        ));
    }
    Ok(out.trim_end().to_string())
}

pub fn list(storage: &StorageConfig, user: &str, unread_only: bool, json: bool) -> Result<(), CliError> {
    let store = open_store(storage, user)?;
    println!("{}", render(&store, unread_only, json)?);
    Ok(())
}

pub fn read(storage: &StorageConfig, user: &str, id: Option<&str>, all: bool) -> Result<(), CliError> {
    let mut store = open_store(storage, user)?;
    if all {
        let marked = store.mark_all_as_read();
        println!("Marked {} notification(s) as read", marked);
        return Ok(());
    }

    let id = id.ok_or_else(|| CliError::InvalidArgs("an id or --all is required".to_string()))?;
    if !store.contains(id) {
        return Err(CliError::NotFound(id.to_string()));
    }
    if store.mark_as_read(id) {
        println!("Marked {} as read", id);
    } else {
        println!("{} was already read", id);
    }
    Ok(())
}

pub fn clear(storage: &StorageConfig, user: &str) -> Result<(), CliError> {
    let mut store = open_store(storage, user)?;
    let removed = store.len();
    store.clear_all();
    println!("Removed {} notification(s)", removed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use seller_notify_core::NotificationKind;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn record(id: &str, title: &str) -> NotificationRecord {
        NotificationRecord {
            id: id.to_string(),
            kind: NotificationKind::NewRequest,
            title: title.to_string(),
            message: "Lighting".to_string(),
            payload: json!({}),
            created_at: Utc::now(),
            read: false,
        }
    }

    fn seeded(temp: &TempDir) -> StorageConfig {
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        let mut store = open_store(&storage, "seller-1").unwrap();
        store.append(record("r1", "Lamp"));
        store.append(record("r2", "Desk"));
        storage
    }

    #[test]
    fn read_marks_one_and_persists() {
        let temp = TempDir::new().unwrap();
        let storage = seeded(&temp);

        read(&storage, "seller-1", Some("r1"), false).unwrap();

        let store = open_store(&storage, "seller-1").unwrap();
        assert!(store.get("r1").unwrap().read);
        assert!(!store.get("r2").unwrap().read);
        assert_eq!(store.unread_count(), 1);
    }

    #[test]
    fn read_unknown_id_is_not_found() {
        let temp = TempDir::new().unwrap();
        let storage = seeded(&temp);

        let err = read(&storage, "seller-1", Some("missing"), false).unwrap_err();
        assert!(matches!(err, CliError::NotFound(id) if id == "missing"));
    }

    #[test]
    fn read_all_then_clear() {
        let temp = TempDir::new().unwrap();
        let storage = seeded(&temp);

        read(&storage, "seller-1", None, true).unwrap();
        assert_eq!(open_store(&storage, "seller-1").unwrap().unread_count(), 0);

        clear(&storage, "seller-1").unwrap();
        assert!(open_store(&storage, "seller-1").unwrap().is_empty());
    }

    #[test]
    fn histories_are_separate_per_seller() {
        let temp = TempDir::new().unwrap();
        let storage = seeded(&temp);

        assert!(open_store(&storage, "seller-2").unwrap().is_empty());
        assert_eq!(open_store(&storage, "seller-1").unwrap().len(), 2);
    }

    #[test]
    fn json_view_lists_newest_first() {
        let temp = TempDir::new().unwrap();
        let storage = seeded(&temp);
        let store = open_store(&storage, "seller-1").unwrap();

        let rendered: Value = serde_json::from_str(&render(&store, false, true).unwrap()).unwrap();
        assert_eq!(rendered["unread"], 2);
        assert_eq!(rendered["notifications"][0]["id"], "r2");
        assert_eq!(rendered["notifications"][1]["id"], "r1");
        assert_eq!(rendered["notifications"][0]["type"], "new_request");
    }

    #[test]
    fn text_view_filters_unread() {
        let temp = TempDir::new().unwrap();
        let storage = seeded(&temp);
        let mut store = open_store(&storage, "seller-1").unwrap();
        store.mark_as_read("r2");

        let text = render(&store, true, false).unwrap();
        assert!(text.contains("* r1"));
        assert!(!text.contains("r2"));
    }

    #[test]
    fn empty_user_is_rejected() {
        let temp = TempDir::new().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        assert!(matches!(
            list(&storage, " ", false, false),
            Err(CliError::InvalidArgs(_))
        ));
    }
}
