//! Gmail-backed [`MailStore`] with bounded retries at the API boundary

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use google_gmail1::api::{Label, Message as GmailMessage, ModifyMessageRequest};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::auth::{GmailHub, LABELS_SCOPE, MODIFY_SCOPE};
use crate::config::{RetryConfig, ScanConfig};
use crate::error::{CleanupError, Result};
use crate::models::Message;
use crate::store::MailStore;

const STARRED: &str = "STARRED";
const TRASH: &str = "TRASH";

/// Metadata fetches in flight at once while listing
const FETCH_CONCURRENCY: usize = 10;

/// Gmail caps a single list page at 500 ids
const MAX_PAGE_SIZE: usize = 500;

#[derive(Default)]
struct LabelCache {
    loaded: bool,
    /// lowercase name -> id
    by_name: HashMap<String, String>,
    /// id -> display name
    by_id: HashMap<String, String>,
}

impl LabelCache {
    fn insert(&mut self, id: String, name: String) {
        self.by_name.insert(name.to_lowercase(), id.clone());
        self.by_id.insert(id, name);
    }
}

pub struct GmailMailStore {
    hub: GmailHub,
    retry: RetryConfig,
    max_results: usize,
    labels: Mutex<LabelCache>,
}

impl GmailMailStore {
    pub fn new(hub: GmailHub, scan: &ScanConfig, retry: RetryConfig) -> Self {
        Self {
            hub,
            retry,
            max_results: scan.max_results,
            labels: Mutex::new(LabelCache::default()),
        }
    }

    async fn load_labels(&self, cache: &mut LabelCache) -> Result<()> {
        if cache.loaded {
            return Ok(());
        }

        let (_, response) = retry_transient(&self.retry, "list_labels", || async {
            self.hub
                .users()
                .labels_list("me")
                .add_scope(LABELS_SCOPE)
                .doit()
                .await
                .map_err(CleanupError::from)
        })
        .await?;

        for label in response.labels.unwrap_or_default() {
            if let (Some(id), Some(name)) = (label.id, label.name) {
                cache.insert(id, name);
            }
        }
        cache.loaded = true;
        debug!("Loaded {} labels into cache", cache.by_id.len());
        Ok(())
    }

    /// Resolve a label name to its id, creating the label when missing
    async fn label_id(&self, name: &str) -> Result<String> {
        let mut cache = self.labels.lock().await;
        self.load_labels(&mut cache).await?;

        if let Some(id) = cache.by_name.get(&name.to_lowercase()) {
            return Ok(id.clone());
        }

        let (_, created) = retry_transient(&self.retry, "create_label", || async {
            let label = Label {
                name: Some(name.to_string()),
                message_list_visibility: Some("show".to_string()),
                label_list_visibility: Some("labelShow".to_string()),
                ..Default::default()
            };
            self.hub
                .users()
                .labels_create(label, "me")
                .add_scope(LABELS_SCOPE)
                .doit()
                .await
                .map_err(CleanupError::from)
        })
        .await?;

        let id = created
            .id
            .ok_or_else(|| CleanupError::permanent(format!("Created label '{}' has no id", name)))?;
        tracing::info!("Created label '{}'", name);
        cache.insert(id.clone(), name.to_string());
        Ok(id)
    }

    async fn list_ids(&self, query: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        while ids.len() < self.max_results {
            let page_size = (self.max_results - ids.len()).min(MAX_PAGE_SIZE) as u32;
            let token = page_token.clone();

            let (_, response) = retry_transient(&self.retry, "list_messages", || {
                let token = token.clone();
                async move {
                    let mut call = self
                        .hub
                        .users()
                        .messages_list("me")
                        .q(query)
                        .max_results(page_size);
                    if let Some(token) = token.as_deref() {
                        call = call.page_token(token);
                    }
                    call.add_scope(MODIFY_SCOPE).doit().await.map_err(CleanupError::from)
                }
            })
            .await?;

            ids.extend(
                response
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| m.id),
            );

            page_token = response.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        ids.truncate(self.max_results);
        Ok(ids)
    }

    async fn fetch_message(&self, id: String, label_names: &HashMap<String, String>) -> Result<Message> {
        let (_, raw) = retry_transient(&self.retry, "get_message", || async {
            self.hub
                .users()
                .messages_get("me", &id)
                .format("metadata")
                .add_metadata_headers("From")
                .add_metadata_headers("Subject")
                .add_metadata_headers("Date")
                .add_metadata_headers("List-Unsubscribe")
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await
                .map_err(CleanupError::from)
        })
        .await?;

        Ok(parse_message(raw, label_names))
    }

    async fn modify(&self, operation: &str, message_id: &str, add_label_id: String) -> Result<()> {
        retry_transient(&self.retry, operation, || {
            let request = ModifyMessageRequest {
                add_label_ids: Some(vec![add_label_id.clone()]),
                remove_label_ids: None,
            };
            async move {
                self.hub
                    .users()
                    .messages_modify(request, "me", message_id)
                    .add_scope(MODIFY_SCOPE)
                    .doit()
                    .await
                    .map_err(CleanupError::from)
            }
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MailStore for GmailMailStore {
    async fn list_messages(&self, query: &str) -> Result<Vec<Message>> {
        let label_names = {
            let mut cache = self.labels.lock().await;
            self.load_labels(&mut cache).await?;
            cache.by_id.clone()
        };

        let ids = self.list_ids(query).await?;
        debug!("Fetching metadata for {} messages", ids.len());

        let label_names = &label_names;
        stream::iter(ids)
            .map(|id| self.fetch_message(id, label_names))
            .buffered(FETCH_CONCURRENCY)
            .try_collect()
            .await
    }

    async fn apply_label(&self, message_id: &str, label_name: &str) -> Result<()> {
        let label_id = self.label_id(label_name).await?;
        self.modify("apply_label", message_id, label_id).await
    }

    async fn trash_message(&self, message_id: &str) -> Result<()> {
        retry_transient(&self.retry, "trash_message", || async {
            self.hub
                .users()
                .messages_trash("me", message_id)
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await
                .map_err(CleanupError::from)
        })
        .await?;
        Ok(())
    }

    async fn star_message(&self, message_id: &str) -> Result<()> {
        self.modify("star_message", message_id, STARRED.to_string()).await
    }
}

/// Retry `operation` with exponential backoff while it fails transiently.
///
/// At most `max_retries` retries follow the first attempt. A server
/// Retry-After hint replaces the computed delay. Permanent and auth errors
/// return immediately.
pub async fn retry_transient<T, F, Fut>(retry: &RetryConfig, operation_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(retry.initial_delay_ms))
        .with_max_interval(Duration::from_secs(retry.max_delay_secs))
        .with_max_elapsed_time(None)
        .build();
    let max_retries = retry.max_retries;
    let mut attempts = 0u32;

    backoff::future::retry_notify(
        policy,
        || {
            attempts += 1;
            let attempt = attempts;
            let call = operation();
            async move {
                call.await.map_err(|e| {
                    if !e.is_transient() || attempt > max_retries {
                        return backoff::Error::permanent(e);
                    }
                    match e.retry_after() {
                        Some(wait) => backoff::Error::retry_after(e, wait),
                        None => backoff::Error::transient(e),
                    }
                })
            }
        },
        |e: CleanupError, wait: Duration| {
            warn!("{} failed: {}. Retrying in {:?}...", operation_name, e, wait);
        },
    )
    .await
}

/// Convert Gmail metadata into a message snapshot.
///
/// `label_names` maps label ids to display names; system labels map to
/// themselves.
pub fn parse_message(raw: GmailMessage, label_names: &HashMap<String, String>) -> Message {
    let label_ids = raw.label_ids.unwrap_or_default();
    let is_starred = label_ids.iter().any(|l| l == STARRED);
    let is_trashed = label_ids.iter().any(|l| l == TRASH);
    let existing_labels: BTreeSet<String> = label_ids
        .into_iter()
        .map(|id| label_names.get(&id).cloned().unwrap_or(id))
        .collect();

    let mut sender = String::new();
    let mut subject = String::new();
    let mut date_header = None;
    let mut list_unsubscribe = None;

    let headers = raw
        .payload
        .and_then(|p| p.headers)
        .unwrap_or_default();
    for header in headers {
        if let (Some(name), Some(value)) = (header.name, header.value) {
            match name.to_lowercase().as_str() {
                "from" => sender = value,
                "subject" => subject = value,
                "date" => date_header = Some(value),
                "list-unsubscribe" => list_unsubscribe = Some(value),
                _ => {}
            }
        }
    }

    let received_at = raw
        .internal_date
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .or_else(|| date_header.as_deref().and_then(parse_date))
        .unwrap_or_else(|| {
            debug!("No usable date on message, treating it as new");
            Utc::now()
        });

    Message {
        id: raw.id.unwrap_or_default(),
        sender,
        subject,
        body_snippet: raw.snippet.unwrap_or_default(),
        received_at,
        size_estimate: raw.size_estimate.and_then(|s| u64::try_from(s).ok()),
        is_starred,
        is_trashed,
        existing_labels,
        list_unsubscribe,
    }
}

/// RFC 2822 with an RFC 3339 fallback
fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use google_gmail1::api::{MessagePart, MessagePartHeader};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay_ms: 1,
            max_delay_secs: 1,
        }
    }

    fn header(name: &str, value: &str) -> MessagePartHeader {
        MessagePartHeader {
            name: Some(name.to_string()),
            value: Some(value.to_string()),
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient() {
        let calls = AtomicU32::new(0);
        let result = retry_transient(&fast_retry(3), "op", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CleanupError::transient("503"))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_transient(&fast_retry(2), "op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CleanupError::transient("timeout"))
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_and_auth_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_transient(&fast_retry(5), "op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CleanupError::permanent("404"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_transient(&fast_retry(5), "op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CleanupError::auth_expired("401"))
        })
        .await;
        assert!(result.unwrap_err().is_auth_expired());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parse_message() {
        let raw = GmailMessage {
            id: Some("abc".to_string()),
            snippet: Some("Click to unsubscribe".to_string()),
            size_estimate: Some(4321),
            internal_date: Some(1_700_000_000_000),
            label_ids: Some(vec!["INBOX".to_string(), "STARRED".to_string(), "Label_7".to_string()]),
            payload: Some(MessagePart {
                headers: Some(vec![
                    header("From", "News <news@site.com>"),
                    header("Subject", "Weekly Digest"),
                    header("List-Unsubscribe", "<https://site.com/u>"),
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let names = HashMap::from([("Label_7".to_string(), "Newsletters".to_string())]);

        let msg = parse_message(raw, &names);
        assert_eq!(msg.id, "abc");
        assert_eq!(msg.sender, "News <news@site.com>");
        assert_eq!(msg.subject, "Weekly Digest");
        assert_eq!(msg.size_estimate, Some(4321));
        assert!(msg.is_starred);
        assert!(!msg.is_trashed);
        assert!(msg.existing_labels.contains("Newsletters"));
        assert!(msg.existing_labels.contains("INBOX"));
        assert_eq!(msg.list_unsubscribe.as_deref(), Some("<https://site.com/u>"));
        assert_eq!(msg.received_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_parse_message_falls_back_to_date_header() {
        let raw = GmailMessage {
            id: Some("x".to_string()),
            payload: Some(MessagePart {
                headers: Some(vec![header("Date", "Tue, 1 Jul 2003 10:52:37 +0200")]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let msg = parse_message(raw, &HashMap::new());
        assert_eq!(msg.received_at.to_rfc3339(), "2003-07-01T08:52:37+00:00");
        assert!(msg.sender.is_empty());
        assert_eq!(msg.size_estimate, None);
    }
}
