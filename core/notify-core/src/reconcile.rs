//! Merges the live channel with OS push delivery.
//!
//! Both channels can deliver the same domain event: a request posted while
//! the app is backgrounded arrives by push, then again on the live channel
//! when the app resumes. Every arrival is normalized with the same id rule and
//! routed through [`NotificationStore::append`], whose id dedup guarantees one
//! stored record per event regardless of arrival order.
//!
//! # Alerting
//!
//! | Channel | Push active | New record | Visible alert |
//! |---------|-------------|------------|---------------|
//! | live    | no          | yes        | yes           |
//! | live    | yes         | yes        | no (OS push already alerted) |
//! | push    | any         | yes        | no            |
//! | any     | any         | duplicate  | no            |
//!
//! "Push active" means push *initialization* succeeded for the session, not
//! that a push was delivered for this particular event.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::normalize::{normalize_event, normalize_push};
use crate::store::{AppendOutcome, NotificationStore};
use crate::types::NotificationRecord;

/// Visible in-app alert (banner, toast, terminal line).
pub trait Alerter: Send + Sync {
    fn alert(&self, record: &NotificationRecord);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushRegistration {
    pub success: bool,
    pub token: Option<String>,
}

/// OS push-notification collaborator.
pub trait PushDelivery {
    fn initialize(&mut self) -> PushRegistration;
}

/// Push collaborator with a fixed outcome, for platforms without push and
/// for tests.
#[derive(Debug, Clone)]
pub struct StaticPush {
    registration: PushRegistration,
}

impl StaticPush {
    pub fn unavailable() -> Self {
        Self {
            registration: PushRegistration::default(),
        }
    }

    pub fn available(token: &str) -> Self {
        Self {
            registration: PushRegistration {
                success: true,
                token: Some(token.to_string()),
            },
        }
    }
}

impl PushDelivery for StaticPush {
    fn initialize(&mut self) -> PushRegistration {
        self.registration.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Stored { alerted: bool },
    Duplicate,
}

pub struct Reconciler {
    registration: PushRegistration,
    alerter: Arc<dyn Alerter>,
}

impl Reconciler {
    pub fn new(alerter: Arc<dyn Alerter>) -> Self {
        Self {
            registration: PushRegistration::default(),
            alerter,
        }
    }

    /// Initializes push for this session. Returns whether push is active.
    pub fn initialize_push(&mut self, push: &mut dyn PushDelivery) -> bool {
        self.registration = push.initialize();
        if self.registration.success {
            info!("Push delivery active; live channel alerts suppressed");
        } else {
            warn!("Push delivery unavailable; live channel raises alerts");
        }
        self.registration.success
    }

    pub fn push_active(&self) -> bool {
        self.registration.success
    }

    pub fn push_token(&self) -> Option<&str> {
        self.registration.token.as_deref()
    }

    pub fn on_live_event(
        &self,
        store: &mut NotificationStore,
        event: &str,
        data: &Value,
    ) -> Delivery {
        let record = normalize_event(event, data, Utc::now());
        match store.append(record.clone()) {
            AppendOutcome::Duplicate => {
                debug!(id = %record.id, "Live event already delivered");
                Delivery::Duplicate
            }
            AppendOutcome::Inserted => {
                let alerted = !self.push_active();
                if alerted {
                    self.alerter.alert(&record);
                }
                debug!(id = %record.id, kind = record.kind.as_str(), alerted, "Live event stored");
                Delivery::Stored { alerted }
            }
        }
    }

    /// A push notification arrived. The OS already showed it, so no alert.
    pub fn on_push_received(&self, store: &mut NotificationStore, data: &Value) -> Delivery {
        let record = normalize_push(data, Utc::now());
        let id = record.id.clone();
        match store.append(record) {
            AppendOutcome::Duplicate => {
                debug!(id = %id, "Push already delivered");
                Delivery::Duplicate
            }
            AppendOutcome::Inserted => {
                debug!(id = %id, "Push stored");
                Delivery::Stored { alerted: false }
            }
        }
    }

    /// The user tapped a push notification: store it if new, then mark read.
    pub fn on_push_opened(&self, store: &mut NotificationStore, data: &Value) -> Delivery {
        let record = normalize_push(data, Utc::now());
        let id = record.id.clone();
        let delivery = match store.append(record) {
            AppendOutcome::Duplicate => Delivery::Duplicate,
            AppendOutcome::Inserted => Delivery::Stored { alerted: false },
        };
        store.mark_as_read(&id);
        delivery
    }
}
