//! Common test utilities and fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use inbox_cleanup::error::{CleanupError, ProviderErrorKind, Result};
use inbox_cleanup::models::Message;
use inbox_cleanup::store::MailStore;
use mockall::mock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

/// Fixed reference time used across integration tests
pub fn as_of() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
}

/// Create a test message received `days_ago` days before [`as_of`]
pub fn create_test_message(id: &str, sender: &str, subject: &str, days_ago: i64) -> Message {
    Message {
        id: id.to_string(),
        sender: sender.to_string(),
        subject: subject.to_string(),
        body_snippet: String::new(),
        received_at: as_of() - Duration::days(days_ago),
        size_estimate: Some(2048),
        is_starred: false,
        is_trashed: false,
        existing_labels: BTreeSet::from(["INBOX".to_string()]),
        list_unsubscribe: None,
    }
}

/// Create a newsletter carrying a List-Unsubscribe header
pub fn create_newsletter_message(id: &str, sender: &str, days_ago: i64) -> Message {
    let mut message = create_test_message(id, sender, "Our latest picks for you", days_ago);
    message.list_unsubscribe = Some(format!("<https://{}/unsubscribe?id={}>", domain_of(sender), id));
    message.body_snippet = "Don't want these? Unsubscribe here.".to_string();
    message
}

fn domain_of(sender: &str) -> &str {
    sender.rsplit_once('@').map(|(_, d)| d).unwrap_or("example.com")
}

mock! {
    pub MailStore {}

    #[async_trait::async_trait]
    impl MailStore for MailStore {
        async fn list_messages(&self, query: &str) -> Result<Vec<Message>>;
        async fn apply_label(&self, message_id: &str, label_name: &str) -> Result<()>;
        async fn trash_message(&self, message_id: &str) -> Result<()>;
        async fn star_message(&self, message_id: &str) -> Result<()>;
    }
}

/// Calls observed by [`InMemoryMailStore`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallCounts {
    pub list: usize,
    pub label: usize,
    pub trash: usize,
    pub star: usize,
}

impl CallCounts {
    pub fn mutations(&self) -> usize {
        self.label + self.trash + self.star
    }
}

/// Mailbox kept in memory; every mutation is applied to the stored snapshot
#[derive(Default)]
pub struct InMemoryMailStore {
    messages: Mutex<BTreeMap<String, Message>>,
    order: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, ProviderErrorKind>>,
    calls: Mutex<CallCounts>,
}

impl InMemoryMailStore {
    pub fn new(messages: Vec<Message>) -> Self {
        let store = Self::default();
        for message in messages {
            store.order.lock().unwrap().push(message.id.clone());
            store.messages.lock().unwrap().insert(message.id.clone(), message);
        }
        store
    }

    /// Make every mutation on `message_id` fail with `kind`
    pub fn fail_on(&self, message_id: &str, kind: ProviderErrorKind) {
        self.failures
            .lock()
            .unwrap()
            .insert(message_id.to_string(), kind);
    }

    pub fn message(&self, id: &str) -> Message {
        self.messages.lock().unwrap()[id].clone()
    }

    pub fn calls(&self) -> CallCounts {
        self.calls.lock().unwrap().clone()
    }

    fn mutate(&self, message_id: &str, apply: impl FnOnce(&mut Message)) -> Result<()> {
        if let Some(kind) = self.failures.lock().unwrap().get(message_id) {
            return Err(match kind {
                ProviderErrorKind::Transient => CleanupError::transient("HTTP 503"),
                ProviderErrorKind::Permanent => CleanupError::permanent("HTTP 404"),
                ProviderErrorKind::AuthExpired => CleanupError::auth_expired("HTTP 401"),
            });
        }
        let mut messages = self.messages.lock().unwrap();
        let message = messages
            .get_mut(message_id)
            .ok_or_else(|| CleanupError::permanent(format!("{} not found", message_id)))?;
        apply(message);
        Ok(())
    }
}

#[async_trait]
impl MailStore for InMemoryMailStore {
    async fn list_messages(&self, _query: &str) -> Result<Vec<Message>> {
        self.calls.lock().unwrap().list += 1;
        let messages = self.messages.lock().unwrap();
        Ok(self
            .order
            .lock()
            .unwrap()
            .iter()
            .filter_map(|id| messages.get(id).cloned())
            .collect())
    }

    async fn apply_label(&self, message_id: &str, label_name: &str) -> Result<()> {
        self.calls.lock().unwrap().label += 1;
        self.mutate(message_id, |m| {
            m.existing_labels.insert(label_name.to_string());
        })
    }

    async fn trash_message(&self, message_id: &str) -> Result<()> {
        self.calls.lock().unwrap().trash += 1;
        self.mutate(message_id, |m| m.is_trashed = true)
    }

    async fn star_message(&self, message_id: &str) -> Result<()> {
        self.calls.lock().unwrap().star += 1;
        self.mutate(message_id, |m| m.is_starred = true)
    }
}
