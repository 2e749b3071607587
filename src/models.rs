use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Category assigned when no category rule matches
pub const UNCATEGORIZED: &str = "uncategorized";

/// Read-only snapshot of a mailbox message as supplied by the mail store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    /// Raw `From` value, either `addr@host` or `Name <addr@host>`
    pub sender: String,
    pub subject: String,
    pub body_snippet: String,
    pub received_at: DateTime<Utc>,
    pub size_estimate: Option<u64>,
    pub is_starred: bool,
    pub is_trashed: bool,
    pub existing_labels: BTreeSet<String>,
    /// Raw `List-Unsubscribe` header, when the provider exposes it
    #[serde(default)]
    pub list_unsubscribe: Option<String>,
}

impl Message {
    /// Lowercased bare address of the sender
    pub fn sender_address(&self) -> String {
        match parse_email_header(&self.sender) {
            Some((_, email)) => email.to_lowercase(),
            None => self.sender.trim().to_lowercase(),
        }
    }

    /// Lowercased domain of the sender address, empty if there is none
    pub fn sender_domain(&self) -> String {
        self.sender_address()
            .rsplit_once('@')
            .map(|(_, domain)| domain.to_string())
            .unwrap_or_default()
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.existing_labels
            .iter()
            .any(|l| l.eq_ignore_ascii_case(label))
    }
}

/// Derived per-message classification, computed once and never mutated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub message_id: String,
    /// 0 means not priority
    pub priority_score: u32,
    pub category: String,
    pub is_newsletter: bool,
    pub unsubscribe_link: Option<String>,
}

impl ClassificationResult {
    /// Priority messages are never destructively acted upon
    pub fn is_priority(&self) -> bool {
        self.priority_score > 0
    }

    pub fn is_categorized(&self) -> bool {
        self.category != UNCATEGORIZED
    }
}

/// Parse email header in "Name <email@example.com>" format
pub fn parse_email_header(header: &str) -> Option<(String, String)> {
    let start = header.find('<')?;
    let end = header[start..].find('>')? + start;
    let name = header[..start].trim().trim_matches('"').to_string();
    let email = header[start + 1..end].trim().to_string();
    Some((name, email))
}
