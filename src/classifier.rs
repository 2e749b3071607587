//! Rule-based message classification: priority, category, newsletter detection

use crate::error::{CleanupError, Result};
use crate::models::{ClassificationResult, Message, UNCATEGORIZED};
use crate::rules::RuleSet;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

/// How far (in bytes) a link may sit from an "unsubscribe" marker in the body
const UNSUBSCRIBE_PROXIMITY: usize = 200;

static HEADER_HTTP_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"<(https?://[^>]+)>").unwrap());

static HEADER_MAILTO_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"<(mailto:[^>]+)>").unwrap());

static BODY_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r#"https?://[^\s<>"'()\[\]]+"#).unwrap());

static UNSUBSCRIBE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(unsubscribe|opt.?out|manage.?preferences)").unwrap()
});

/// Classifies messages against a borrowed rule set
pub struct Classifier<'r> {
    rules: &'r RuleSet,
}

impl<'r> Classifier<'r> {
    pub fn new(rules: &'r RuleSet) -> Self {
        Self { rules }
    }

    /// Classify a single message.
    ///
    /// Fails only for malformed records (no id or no sender); every
    /// well-formed message yields a result.
    pub fn classify(&self, message: &Message) -> Result<ClassificationResult> {
        if message.id.trim().is_empty() {
            return Err(CleanupError::ClassificationError {
                message_id: message.id.clone(),
                reason: "missing message id".to_string(),
            });
        }
        if message.sender.trim().is_empty() {
            return Err(CleanupError::ClassificationError {
                message_id: message.id.clone(),
                reason: "missing sender".to_string(),
            });
        }

        Ok(ClassificationResult {
            message_id: message.id.clone(),
            priority_score: self.priority_score(message),
            category: self.detect_category(message),
            is_newsletter: self.is_newsletter(message),
            unsubscribe_link: extract_unsubscribe_link(message),
        })
    }

    /// Sender bonus plus capped keyword bonus
    pub fn priority_score(&self, message: &Message) -> u32 {
        let scoring = &self.rules.scoring;
        let mut score = 0;

        if self.is_priority_sender(message) {
            score += scoring.sender_weight;
        }

        let subject = message.subject.to_lowercase();
        let body = message.body_snippet.to_lowercase();

        // Distinct after lowercasing, so "Invoice" and "invoice" count once
        let keywords: BTreeSet<String> = self
            .rules
            .priority_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        let hits = keywords
            .iter()
            .filter(|k| subject.contains(k.as_str()) || body.contains(k.as_str()))
            .count() as u32;

        score + hits.saturating_mul(scoring.keyword_weight).min(scoring.keyword_cap)
    }

    /// Full-address match, or domain match including subdomains
    pub fn is_priority_sender(&self, message: &Message) -> bool {
        let address = message.sender_address();
        let domain = message.sender_domain();

        self.rules.priority_senders.iter().any(|entry| {
            let entry = entry.trim().to_lowercase();
            if entry.is_empty() {
                return false;
            }
            if address == entry {
                return true;
            }
            let entry_domain = entry.trim_start_matches('@');
            if entry_domain.contains('@') || domain.is_empty() {
                return false;
            }
            domain == entry_domain || domain.ends_with(&format!(".{}", entry_domain))
        })
    }

    /// First category rule with a term in the sender or subject
    pub fn detect_category(&self, message: &Message) -> String {
        let combined = format!(
            "{} {}",
            message.subject.to_lowercase(),
            message.sender.to_lowercase()
        );

        self.rules
            .category_rules
            .iter()
            .find(|rule| {
                rule.terms
                    .iter()
                    .map(|t| t.trim().to_lowercase())
                    .any(|t| !t.is_empty() && combined.contains(&t))
            })
            .map(|rule| rule.name.clone())
            .unwrap_or_else(|| UNCATEGORIZED.to_string())
    }

    pub fn is_newsletter(&self, message: &Message) -> bool {
        if message
            .list_unsubscribe
            .as_deref()
            .is_some_and(|h| !h.trim().is_empty())
        {
            return true;
        }

        if message.body_snippet.to_lowercase().contains("unsubscribe") {
            return true;
        }

        self.is_bulk_sender(message)
    }

    pub fn is_bulk_sender(&self, message: &Message) -> bool {
        let sender = message.sender.to_lowercase();
        self.rules
            .bulk_sender_markers
            .iter()
            .map(|m| m.trim().to_lowercase())
            .any(|m| !m.is_empty() && sender.contains(&m))
    }
}

/// Convenience wrapper for one-off classification
pub fn classify(message: &Message, rules: &RuleSet) -> Result<ClassificationResult> {
    Classifier::new(rules).classify(message)
}

/// Find an unsubscribe link, preferring the `List-Unsubscribe` header.
///
/// Header order is http before mailto. Without a header, each unsubscribe
/// marker in the body is tried in turn: a URL containing the marker, else the
/// nearest URL following it, else the nearest URL preceding it, always within
/// a short distance.
pub fn extract_unsubscribe_link(message: &Message) -> Option<String> {
    if let Some(header) = message.list_unsubscribe.as_deref() {
        if let Some(caps) = HEADER_HTTP_LINK.captures(header) {
            return Some(caps[1].trim().to_string());
        }
        if let Some(caps) = HEADER_MAILTO_LINK.captures(header) {
            return Some(caps[1].trim().to_string());
        }
    }

    let body = &message.body_snippet;
    let urls: Vec<regex::Match> = BODY_URL.find_iter(body).collect();
    if urls.is_empty() {
        return None;
    }

    UNSUBSCRIBE_MARKER
        .find_iter(body)
        .find_map(|marker| {
            let containing = urls
                .iter()
                .find(|u| u.start() <= marker.start() && u.end() >= marker.end());
            let following = urls.iter().find(|u| {
                u.start() >= marker.end() && u.start() - marker.end() <= UNSUBSCRIBE_PROXIMITY
            });
            let preceding = urls.iter().rev().find(|u| {
                u.end() <= marker.start() && marker.start() - u.end() <= UNSUBSCRIBE_PROXIMITY
            });
            containing.or(following).or(preceding)
        })
        .map(|url| {
            url.as_str()
                .trim_end_matches(|c| matches!(c, '.' | ',' | ';' | ':' | '!' | '?'))
                .to_string()
        })
}
