//! Mail store capability consumed by the cleanup pipeline
//!
//! The core only needs four operations. Implementations classify their own
//! failures into [`ProviderErrorKind`](crate::error::ProviderErrorKind):
//!
//! - `Transient`: network failures, timeouts, HTTP 429 and 5xx. Retrying is the
//!   store's business; the core records whatever error finally surfaces.
//! - `AuthExpired`: HTTP 401 or a failed token refresh. The run aborts.
//! - `Permanent`: everything else (not found, permission denied, bad request).

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::models::Message;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailStore: Send + Sync {
    /// List messages matching a provider query. The result is finite and
    /// fully materialized; pagination is handled inside the store.
    async fn list_messages(&self, query: &str) -> Result<Vec<Message>>;

    /// Apply a label by name, creating it on the provider if needed
    async fn apply_label(&self, message_id: &str, label_name: &str) -> Result<()>;

    async fn trash_message(&self, message_id: &str) -> Result<()>;

    async fn star_message(&self, message_id: &str) -> Result<()>;
}

#[async_trait]
impl<T: MailStore + ?Sized> MailStore for Arc<T> {
    async fn list_messages(&self, query: &str) -> Result<Vec<Message>> {
        (**self).list_messages(query).await
    }

    async fn apply_label(&self, message_id: &str, label_name: &str) -> Result<()> {
        (**self).apply_label(message_id, label_name).await
    }

    async fn trash_message(&self, message_id: &str) -> Result<()> {
        (**self).trash_message(message_id).await
    }

    async fn star_message(&self, message_id: &str) -> Result<()> {
        (**self).star_message(message_id).await
    }
}
