//! Normalized keys used to detect near-identical copies of a message

use crate::models::Message;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size bucket width in bytes
pub const SIZE_BUCKET_BYTES: u64 = 1024;

/// Leading reply/forward markers, possibly repeated ("Re: Fwd: re:")
static REPLY_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*(re|fwd?)\s*:").unwrap());

/// Duplicate-detection key: `subject|sender-address|size-bucket`
///
/// The sender part is the bare address, so a display name never splits copies.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageFingerprint(String);

impl MessageFingerprint {
    pub fn of(message: &Message) -> Self {
        Self(format!(
            "{}|{}|{}",
            normalize_subject(&message.subject),
            normalize_text(&message.sender_address()),
            size_bucket(message.size_estimate)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strip reply/forward prefixes, then whitespace and case
pub fn normalize_subject(subject: &str) -> String {
    let mut rest = subject;
    while let Some(m) = REPLY_PREFIX.find(rest) {
        rest = &rest[m.end()..];
    }
    normalize_text(rest)
}

/// Lowercase with every whitespace character removed
pub fn normalize_text(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// 1KB buckets; unknown sizes share their own bucket
pub fn size_bucket(size_estimate: Option<u64>) -> String {
    match size_estimate {
        Some(size) => (size / SIZE_BUCKET_BYTES).to_string(),
        None => "none".to_string(),
    }
}
