//! Session-scoped notification context.
//!
//! A [`NotificationSession`] bundles one user's channel, store and reconciler.
//! [`SessionManager`] follows the auth collaborator: every identity or token
//! change builds a brand-new session and drops the old one, so one seller's
//! notifications can never leak into the next seller's session.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::config::{NotifyConfig, DEFAULT_MAX_RECORDS, DEFAULT_PONG_WINDOW_MS};
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionState, Transport};
use crate::reconcile::{Alerter, Delivery, PushDelivery, Reconciler};
use crate::storage::KeyValueStore;
use crate::store::NotificationStore;

/// Snapshot of the auth collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub session_token: Option<String>,
    pub user_id: Option<String>,
    pub is_authenticated: bool,
}

impl AuthState {
    pub fn authenticated(token: &str, user_id: &str) -> Self {
        Self {
            session_token: Some(token.to_string()),
            user_id: Some(user_id.to_string()),
            is_authenticated: true,
        }
    }

    pub fn logged_out() -> Self {
        Self::default()
    }

    /// `(user_id, token)` when the triple describes a usable session.
    pub fn identity(&self) -> Option<(&str, &str)> {
        if !self.is_authenticated {
            return None;
        }
        let user = self.user_id.as_deref().map(str::trim).filter(|v| !v.is_empty())?;
        let token = self
            .session_token
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())?;
        Some((user, token))
    }
}

/// Persistence key holding one user's notification snapshot.
pub fn storage_key(user_id: &str) -> String {
    format!("notifications_{}", user_id)
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub max_records: usize,
    pub pong_window: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_records: DEFAULT_MAX_RECORDS,
            pong_window: Duration::from_millis(DEFAULT_PONG_WINDOW_MS),
        }
    }
}

impl From<&NotifyConfig> for SessionOptions {
    fn from(config: &NotifyConfig) -> Self {
        Self {
            max_records: config.max_records,
            pong_window: config.pong_window(),
        }
    }
}

pub struct NotificationSession<T: Transport> {
    user_id: String,
    connection: ConnectionManager<T>,
    store: NotificationStore,
    reconciler: Reconciler,
}

impl<T: Transport> NotificationSession<T> {
    pub fn new(
        user_id: &str,
        connection: ConnectionManager<T>,
        store: NotificationStore,
        reconciler: Reconciler,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            connection,
            store,
            reconciler,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn store(&self) -> &NotificationStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut NotificationStore {
        &mut self.store
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut ConnectionManager<T> {
        &mut self.connection
    }

    pub fn connection_state(&self) -> &ConnectionState {
        self.connection.state()
    }

    /// True when the UI should fetch from REST because no live channel exists.
    pub fn needs_fallback(&self) -> bool {
        !self.connection.state().is_connected()
    }

    pub fn connect(&mut self, token: &str) {
        let user_id = self.user_id.clone();
        self.connection.connect(token, Some(&user_id));
    }

    /// Drains queued channel events and routes inbound ones to the store.
    pub fn pump(&mut self) -> Vec<ConnectionEvent> {
        let events = self.connection.poll();
        self.route(&events);
        events
    }

    /// Like [`pump`](Self::pump) but blocks up to `timeout` for the first event.
    pub fn wait(&mut self, timeout: Duration) -> Vec<ConnectionEvent> {
        let events = self.connection.wait(timeout);
        self.route(&events);
        events
    }

    fn route(&mut self, events: &[ConnectionEvent]) {
        for event in events {
            if let ConnectionEvent::Inbound { event, data } = event {
                self.reconciler.on_live_event(&mut self.store, event, data);
            }
        }
    }

    pub fn on_push_received(&mut self, data: &Value) -> Delivery {
        self.reconciler.on_push_received(&mut self.store, data)
    }

    pub fn on_push_opened(&mut self, data: &Value) -> Delivery {
        self.reconciler.on_push_opened(&mut self.store, data)
    }

    pub fn shutdown(&mut self) {
        self.connection.disconnect();
    }
}

/// Owns the current session and rebuilds it on auth changes.
pub struct SessionManager<T, F>
where
    T: Transport,
    F: FnMut() -> T,
{
    make_transport: F,
    storage: Arc<dyn KeyValueStore>,
    alerter: Arc<dyn Alerter>,
    push: Box<dyn PushDelivery>,
    options: SessionOptions,
    current: Option<(String, String, NotificationSession<T>)>,
}

impl<T, F> SessionManager<T, F>
where
    T: Transport,
    F: FnMut() -> T,
{
    pub fn new(
        make_transport: F,
        storage: Arc<dyn KeyValueStore>,
        alerter: Arc<dyn Alerter>,
        push: Box<dyn PushDelivery>,
        options: SessionOptions,
    ) -> Self {
        Self {
            make_transport,
            storage,
            alerter,
            push,
            options,
            current: None,
        }
    }

    pub fn session(&self) -> Option<&NotificationSession<T>> {
        self.current.as_ref().map(|(_, _, session)| session)
    }

    pub fn session_mut(&mut self) -> Option<&mut NotificationSession<T>> {
        self.current.as_mut().map(|(_, _, session)| session)
    }

    /// Applies an auth change: tear down, rebuild, or leave as is.
    pub fn on_auth_changed(&mut self, auth: &AuthState) {
        let Some((user_id, token)) = auth.identity() else {
            if self.current.is_some() {
                info!("Signed out; closing notification session");
            }
            self.end_session();
            return;
        };

        if let Some((current_user, current_token, _)) = &self.current {
            if current_user == user_id && current_token == token {
                return;
            }
        }

        self.end_session();
        self.start_session(user_id, token);
    }

    fn start_session(&mut self, user_id: &str, token: &str) {
        let store = NotificationStore::load(
            Arc::clone(&self.storage),
            &storage_key(user_id),
            self.options.max_records,
        );
        let mut reconciler = Reconciler::new(Arc::clone(&self.alerter));
        reconciler.initialize_push(self.push.as_mut());
        let connection = ConnectionManager::new((self.make_transport)(), self.options.pong_window);

        let mut session = NotificationSession::new(user_id, connection, store, reconciler);
        info!(
            user_id = %user_id,
            stored = session.store().len(),
            unread = session.store().unread_count(),
            "Starting notification session"
        );
        session.connect(token);
        self.current = Some((user_id.to_string(), token.to_string(), session));
    }

    fn end_session(&mut self) {
        if let Some((user_id, _, mut session)) = self.current.take() {
            session.shutdown();
            info!(user_id = %user_id, "Notification session ended");
        }
    }

    /// Drains the current session. A fatal channel error (rejected
    /// credentials) destroys the session.
    pub fn pump(&mut self) -> Vec<ConnectionEvent> {
        let events = match self.session_mut() {
            Some(session) => session.pump(),
            None => return Vec::new(),
        };
        self.drop_on_fatal(&events);
        events
    }

    pub fn wait(&mut self, timeout: Duration) -> Vec<ConnectionEvent> {
        let events = match self.session_mut() {
            Some(session) => session.wait(timeout),
            None => {
                std::thread::sleep(timeout);
                return Vec::new();
            }
        };
        self.drop_on_fatal(&events);
        events
    }

    fn drop_on_fatal(&mut self, events: &[ConnectionEvent]) {
        let fatal = events
            .iter()
            .any(|event| matches!(event, ConnectionEvent::Error { fatal: true, .. }));
        if fatal {
            warn!("Authentication failed; ending notification session");
            self.end_session();
        }
    }
}
