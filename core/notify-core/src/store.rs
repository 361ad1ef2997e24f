//! Ordered, deduplicated notification store.
//!
//! The single source of truth for what the seller sees, whichever channel
//! delivered it. Records are keyed by id in a map; a separate deque keeps
//! insertion order, newest first. The store never re-sorts by `created_at`,
//! so client/server clock skew cannot make the list jump around.
//!
//! # Bounded History
//!
//! At most `max_records` are kept; the oldest are evicted first. Evicted ids
//! are remembered (up to another `max_records` of them) and still count as
//! duplicates, so a late re-delivery cannot resurrect a record as unread.
//!
//! # Snapshot Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "notifications": [ { ... newest ... }, { ... oldest ... } ],
//!   "evicted": [ "oldest-evicted-id", ... ]
//! }
//! ```
//!
//! # Persistence Failures
//!
//! Every mutation writes a full snapshot through the [`KeyValueStore`].
//! Read and write failures are logged and swallowed; the in-memory store stays
//! authoritative for the running session.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DEFAULT_MAX_RECORDS;
use crate::storage::KeyValueStore;
use crate::types::NotificationRecord;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreSnapshot {
    version: u32,
    notifications: Vec<NotificationRecord>,
    #[serde(default)]
    evicted: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    Duplicate,
}

struct Persistence {
    backend: Arc<dyn KeyValueStore>,
    key: String,
}

pub struct NotificationStore {
    order: VecDeque<String>,
    records: HashMap<String, NotificationRecord>,
    unread: usize,
    max_records: usize,
    evicted_order: VecDeque<String>,
    evicted: HashSet<String>,
    persistence: Option<Persistence>,
}

impl NotificationStore {
    pub fn new_in_memory() -> Self {
        Self::with_capacity_limit(DEFAULT_MAX_RECORDS)
    }

    pub fn with_capacity_limit(max_records: usize) -> Self {
        Self {
            order: VecDeque::new(),
            records: HashMap::new(),
            unread: 0,
            max_records: max_records.max(1),
            evicted_order: VecDeque::new(),
            evicted: HashSet::new(),
            persistence: None,
        }
    }

    /// Creates a store bound to `key` in `backend` and loads its snapshot.
    pub fn load(backend: Arc<dyn KeyValueStore>, key: &str, max_records: usize) -> Self {
        let mut store = Self::with_capacity_limit(max_records);
        store.persistence = Some(Persistence {
            backend,
            key: key.to_string(),
        });
        store.load_from_persistence();
        store
    }

    /// Replaces the in-memory contents with the persisted snapshot.
    ///
    /// Missing, empty, corrupt or unsupported snapshots leave the store empty.
    pub fn load_from_persistence(&mut self) {
        let Some(persistence) = &self.persistence else {
            return;
        };

        let content = match persistence.backend.get_item(&persistence.key) {
            Ok(Some(content)) => content,
            Ok(None) => return,
            Err(err) => {
                warn!(key = %persistence.key, error = %err, "Failed to read notification snapshot");
                return;
            }
        };

        if content.trim().is_empty() {
            return;
        }

        let snapshot = match serde_json::from_str::<StoreSnapshot>(&content) {
            Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => snapshot,
            Ok(snapshot) => {
                warn!(
                    key = %persistence.key,
                    version = snapshot.version,
                    expected = SNAPSHOT_VERSION,
                    "Unsupported notification snapshot version, starting empty"
                );
                return;
            }
            Err(err) => {
                warn!(key = %persistence.key, error = %err, "Corrupt notification snapshot, starting empty");
                return;
            }
        };

        self.order.clear();
        self.records.clear();
        self.unread = 0;
        self.evicted_order.clear();
        self.evicted.clear();
        for id in snapshot.evicted {
            self.remember_evicted(id);
        }
        // Snapshot is newest-first; first occurrence of an id wins.
        let mut overflow = Vec::new();
        for record in snapshot.notifications {
            if self.records.contains_key(&record.id) {
                continue;
            }
            if self.order.len() >= self.max_records {
                overflow.push(record.id);
                continue;
            }
            if !record.read {
                self.unread += 1;
            }
            self.order.push_back(record.id.clone());
            self.records.insert(record.id.clone(), record);
        }
        // Overflow is newest-first; remember the oldest first so it is also
        // forgotten first.
        for id in overflow.into_iter().rev() {
            self.remember_evicted(id);
        }
        self.evicted.retain(|id| !self.records.contains_key(id));
        self.evicted_order.retain(|id| self.evicted.contains(id));
        debug!(count = self.order.len(), unread = self.unread, "Loaded notification snapshot");
        self.check_unread();
    }

    /// Writes the full snapshot. Failures are logged, never returned.
    pub fn persist(&self) {
        let Some(persistence) = &self.persistence else {
            return;
        };

        let snapshot = StoreSnapshot {
            version: SNAPSHOT_VERSION,
            notifications: self.iter().cloned().collect(),
            evicted: self.evicted_order.iter().cloned().collect(),
        };
        let content = match serde_json::to_string(&snapshot) {
            Ok(content) => content,
            Err(err) => {
                warn!(error = %err, "Failed to serialize notification snapshot");
                return;
            }
        };
        if let Err(err) = persistence.backend.set_item(&persistence.key, &content) {
            warn!(key = %persistence.key, error = %err, "Failed to persist notifications");
        }
    }

    /// Inserts `record` at the head unless its id is already present.
    ///
    /// A duplicate never touches the stored record, so a re-delivery cannot
    /// flip `read` back to false.
    pub fn append(&mut self, record: NotificationRecord) -> AppendOutcome {
        if self.records.contains_key(&record.id) || self.evicted.contains(&record.id) {
            debug!(id = %record.id, "Duplicate notification ignored");
            return AppendOutcome::Duplicate;
        }

        if !record.read {
            self.unread += 1;
        }
        self.order.push_front(record.id.clone());
        self.records.insert(record.id.clone(), record);
        self.evict_overflow();
        self.check_unread();
        self.persist();
        AppendOutcome::Inserted
    }

    /// Returns true when a record transitioned from unread to read.
    pub fn mark_as_read(&mut self, id: &str) -> bool {
        let changed = match self.records.get_mut(id) {
            Some(record) if !record.read => {
                record.read = true;
                self.unread -= 1;
                true
            }
            _ => false,
        };
        if changed {
            self.check_unread();
            self.persist();
        }
        changed
    }

    /// Marks every record read. Returns how many changed.
    pub fn mark_all_as_read(&mut self) -> usize {
        let mut changed = 0;
        for record in self.records.values_mut().filter(|record| !record.read) {
            record.read = true;
            changed += 1;
        }
        self.unread = 0;
        if changed > 0 {
            self.check_unread();
            self.persist();
        }
        changed
    }

    pub fn clear_all(&mut self) {
        self.order.clear();
        self.records.clear();
        self.unread = 0;
        self.persist();
    }

    pub fn get(&self, id: &str) -> Option<&NotificationRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Records newest first.
    pub fn iter(&self) -> impl Iterator<Item = &NotificationRecord> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.unread
    }

    fn evict_overflow(&mut self) {
        while self.order.len() > self.max_records {
            let Some(id) = self.order.pop_back() else {
                break;
            };
            if let Some(evicted) = self.records.remove(&id) {
                if !evicted.read {
                    self.unread -= 1;
                }
                debug!(id = %id, "Evicted oldest notification");
            }
            self.remember_evicted(id);
        }
    }

    fn remember_evicted(&mut self, id: String) {
        if !self.evicted.insert(id.clone()) {
            return;
        }
        self.evicted_order.push_back(id);
        while self.evicted_order.len() > self.max_records {
            if let Some(forgotten) = self.evicted_order.pop_front() {
                self.evicted.remove(&forgotten);
            }
        }
    }

    fn check_unread(&self) {
        debug_assert_eq!(
            self.unread,
            self.records.values().filter(|record| !record.read).count(),
            "unread counter drifted from record set"
        );
        debug_assert_eq!(self.order.len(), self.records.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKeyValueStore;
    use crate::types::NotificationKind;
    use chrono::Utc;
    use serde_json::Value;

    fn record(id: &str) -> NotificationRecord {
        NotificationRecord {
            id: id.to_string(),
            kind: NotificationKind::NewRequest,
            title: format!("Request {}", id),
            message: String::new(),
            payload: Value::Null,
            created_at: Utc::now(),
            read: false,
        }
    }

    fn counted_unread(store: &NotificationStore) -> usize {
        store.iter().filter(|record| !record.read).count()
    }

    fn ids(store: &NotificationStore) -> Vec<&str> {
        store.iter().map(|record| record.id.as_str()).collect()
    }

    #[test]
    fn append_is_idempotent_and_keeps_read_state() {
        let mut store = NotificationStore::new_in_memory();
        assert_eq!(store.append(record("r1")), AppendOutcome::Inserted);
        assert!(store.mark_as_read("r1"));

        assert_eq!(store.append(record("r1")), AppendOutcome::Duplicate);
        assert_eq!(store.len(), 1);
        assert!(store.get("r1").unwrap().read);
        assert_eq!(store.unread_count(), counted_unread(&store));
    }

    #[test]
    fn duplicate_does_not_overwrite_content() {
        let mut store = NotificationStore::new_in_memory();
        store.append(record("r1"));
        let mut redelivered = record("r1");
        redelivered.title = "Changed".to_string();
        store.append(redelivered);
        assert_eq!(store.get("r1").unwrap().title, "Request r1");
    }

    #[test]
    fn iteration_is_newest_first() {
        let mut store = NotificationStore::new_in_memory();
        store.append(record("a"));
        store.append(record("b"));
        store.append(record("c"));
        assert_eq!(ids(&store), vec!["c", "b", "a"]);
    }

    #[test]
    fn order_ignores_created_at_skew() {
        let mut store = NotificationStore::new_in_memory();
        let mut late = record("from-fast-clock");
        late.created_at = Utc::now() + chrono::Duration::hours(2);
        store.append(late);
        store.append(record("next"));
        assert_eq!(ids(&store), vec!["next", "from-fast-clock"]);
    }

    #[test]
    fn unread_counter_tracks_every_operation() {
        let mut store = NotificationStore::new_in_memory();
        let check = |store: &NotificationStore| {
            assert_eq!(store.unread_count(), counted_unread(store));
        };

        store.append(record("a"));
        check(&store);
        store.append(record("b"));
        check(&store);
        store.append(record("a"));
        check(&store);
        store.mark_as_read("a");
        check(&store);
        store.mark_as_read("a");
        check(&store);
        store.mark_as_read("missing");
        check(&store);
        let mut already_read = record("c");
        already_read.read = true;
        store.append(already_read);
        check(&store);
        assert_eq!(store.unread_count(), 1);
        store.clear_all();
        check(&store);
        assert_eq!(store.unread_count(), 0);
    }

    #[test]
    fn mark_as_read_is_monotonic() {
        let mut store = NotificationStore::new_in_memory();
        store.append(record("a"));
        assert!(store.mark_as_read("a"));
        assert!(!store.mark_as_read("a"));
        store.append(record("a"));
        store.mark_all_as_read();
        assert!(store.get("a").unwrap().read);
    }

    #[test]
    fn mark_all_as_read_zeroes_counter() {
        let mut store = NotificationStore::new_in_memory();
        store.append(record("a"));
        store.append(record("b"));
        store.mark_as_read("a");
        assert_eq!(store.mark_all_as_read(), 1);
        assert_eq!(store.unread_count(), 0);
        assert_eq!(store.unread_count(), counted_unread(&store));
    }

    #[test]
    fn clear_all_with_mixed_read_state() {
        let mut store = NotificationStore::new_in_memory();
        for id in ["1", "2", "3", "4", "5"] {
            store.append(record(id));
        }
        store.mark_as_read("1");
        store.mark_as_read("2");
        assert_eq!(store.unread_count(), 3);

        store.clear_all();
        assert!(store.is_empty());
        assert_eq!(store.unread_count(), 0);
    }

    #[test]
    fn overflow_evicts_oldest() {
        let mut store = NotificationStore::with_capacity_limit(2);
        store.append(record("a"));
        store.append(record("b"));
        store.mark_as_read("b");
        store.append(record("c"));
        assert_eq!(ids(&store), vec!["c", "b"]);
        assert_eq!(store.unread_count(), 1);
        assert_eq!(store.unread_count(), counted_unread(&store));
    }

    #[test]
    fn evicted_ids_stay_duplicates() {
        let mut store = NotificationStore::with_capacity_limit(2);
        store.append(record("a"));
        store.mark_as_read("a");
        store.append(record("b"));
        store.append(record("c"));
        assert!(!store.contains("a"));

        assert_eq!(store.append(record("a")), AppendOutcome::Duplicate);
        assert_eq!(ids(&store), vec!["c", "b"]);
        assert_eq!(store.unread_count(), 2);
        assert_eq!(store.unread_count(), counted_unread(&store));
    }

    #[test]
    fn evicted_memory_is_bounded() {
        let mut store = NotificationStore::with_capacity_limit(2);
        for id in ["a", "b", "c", "d", "e"] {
            store.append(record(id));
        }
        // "c" and "b" are remembered; "a" has been forgotten.
        assert_eq!(store.append(record("b")), AppendOutcome::Duplicate);
        assert_eq!(store.append(record("a")), AppendOutcome::Inserted);
    }

    #[test]
    fn evicted_ids_survive_reload() {
        let backend: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        {
            let mut store = NotificationStore::load(Arc::clone(&backend), "k", 2);
            store.append(record("a"));
            store.append(record("b"));
            store.append(record("c"));
        }

        let mut store = NotificationStore::load(backend, "k", 2);
        assert_eq!(ids(&store), vec!["c", "b"]);
        assert_eq!(store.append(record("a")), AppendOutcome::Duplicate);
    }

    #[test]
    fn snapshot_overflow_on_load_is_remembered() {
        let backend: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        {
            let mut store = NotificationStore::load(Arc::clone(&backend), "k", 10);
            for id in ["a", "b", "c"] {
                store.append(record(id));
            }
        }

        let mut store = NotificationStore::load(backend, "k", 2);
        assert_eq!(ids(&store), vec!["c", "b"]);
        assert_eq!(store.append(record("a")), AppendOutcome::Duplicate);
    }

    #[test]
    fn persistence_round_trip_keeps_order_and_read_state() {
        let backend: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        {
            let mut store = NotificationStore::load(Arc::clone(&backend), "notifications_s1", 10);
            store.append(record("a"));
            store.append(record("b"));
            store.mark_as_read("a");
        }

        let store = NotificationStore::load(backend, "notifications_s1", 10);
        assert_eq!(ids(&store), vec!["b", "a"]);
        assert!(store.get("a").unwrap().read);
        assert_eq!(store.unread_count(), 1);
    }

    #[test]
    fn clear_all_is_persisted() {
        let backend: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        let mut store = NotificationStore::load(Arc::clone(&backend), "k", 10);
        store.append(record("a"));
        store.clear_all();

        let reloaded = NotificationStore::load(backend, "k", 10);
        assert!(reloaded.is_empty());
    }

    #[test]
    fn corrupt_snapshot_loads_empty() {
        let backend = Arc::new(MemoryKeyValueStore::new());
        backend.set_item("k", "{not json").unwrap();
        let store = NotificationStore::load(backend, "k", 10);
        assert!(store.is_empty());
    }

    #[test]
    fn unsupported_version_loads_empty() {
        let backend = Arc::new(MemoryKeyValueStore::new());
        backend
            .set_item("k", r#"{"version":99,"notifications":[]}"#)
            .unwrap();
        let store = NotificationStore::load(backend, "k", 10);
        assert!(store.is_empty());
    }

    #[test]
    fn snapshot_duplicates_keep_first_occurrence() {
        let backend = Arc::new(MemoryKeyValueStore::new());
        let mut newer = record("a");
        newer.read = true;
        let snapshot = StoreSnapshot {
            version: SNAPSHOT_VERSION,
            notifications: vec![newer, record("a"), record("b")],
            evicted: Vec::new(),
        };
        backend
            .set_item("k", &serde_json::to_string(&snapshot).unwrap())
            .unwrap();

        let store = NotificationStore::load(backend, "k", 10);
        assert_eq!(ids(&store), vec!["a", "b"]);
        assert!(store.get("a").unwrap().read);
        assert_eq!(store.unread_count(), 1);
    }

    #[test]
    fn write_failures_are_swallowed() {
        let backend = Arc::new(MemoryKeyValueStore::new());
        backend.set_failing(true);
        let mut store = NotificationStore::load(backend.clone(), "k", 10);

        assert_eq!(store.append(record("a")), AppendOutcome::Inserted);
        assert!(store.mark_as_read("a"));
        assert_eq!(store.len(), 1);
        assert_eq!(backend.get_item("k").unwrap(), None);
    }
}
