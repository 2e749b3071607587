//! User-configurable rule set consumed by the classifier and planner
//!
//! Rules are plain immutable data passed explicitly into every pure function,
//! so different configurations can be exercised side by side in tests.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{CleanupError, Result};

/// Points awarded by the classifier when computing a priority score
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringPolicy {
    #[serde(default = "default_sender_weight")]
    pub sender_weight: u32,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: u32,
    /// Upper bound on the total contributed by keyword matches
    #[serde(default = "default_keyword_cap")]
    pub keyword_cap: u32,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            sender_weight: default_sender_weight(),
            keyword_weight: default_keyword_weight(),
            keyword_cap: default_keyword_cap(),
        }
    }
}

/// One entry of the ordered category table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    pub terms: Vec<String>,
}

impl CategoryRule {
    pub fn new(name: &str, terms: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            terms: terms.iter().map(|t| t.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default = "default_delete_older_than_days")]
    pub delete_older_than_days: u32,
    #[serde(default = "default_priority_keywords")]
    pub priority_keywords: BTreeSet<String>,
    #[serde(default)]
    pub priority_senders: BTreeSet<String>,
    /// Evaluated in declared order, first match wins
    #[serde(default = "default_category_rules")]
    pub category_rules: Vec<CategoryRule>,
    /// Max trash operations per commit run
    #[serde(default = "default_safety_cap", alias = "max_trash_per_run")]
    pub safety_cap_per_run: usize,
    /// Sender substrings that mark bulk mail
    #[serde(default = "default_bulk_sender_markers")]
    pub bulk_sender_markers: Vec<String>,
    #[serde(default)]
    pub scoring: ScoringPolicy,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            delete_older_than_days: default_delete_older_than_days(),
            priority_keywords: default_priority_keywords(),
            priority_senders: BTreeSet::new(),
            category_rules: default_category_rules(),
            safety_cap_per_run: default_safety_cap(),
            bulk_sender_markers: default_bulk_sender_markers(),
            scoring: ScoringPolicy::default(),
        }
    }
}

impl RuleSet {
    /// Lowercase and trim every match term so lookups can compare directly
    pub fn normalized(mut self) -> Self {
        let clean = |s: &String| s.trim().to_lowercase();

        self.priority_keywords = self.priority_keywords.iter().map(clean).collect();
        self.priority_senders = self.priority_senders.iter().map(clean).collect();
        self.bulk_sender_markers = self.bulk_sender_markers.iter().map(clean).collect();
        for rule in &mut self.category_rules {
            rule.name = rule.name.trim().to_string();
            rule.terms = rule.terms.iter().map(clean).collect();
        }
        self
    }

    /// Copy with the age threshold replaced (CLI `--days`)
    pub fn with_delete_older_than_days(mut self, days: u32) -> Self {
        self.delete_older_than_days = days;
        self
    }

    /// Reject rule sets that would silently disable protection or match everything
    pub fn validate(&self) -> Result<()> {
        if self.priority_keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(CleanupError::ConfigError(
                "rules.priority_keywords cannot contain empty strings".to_string(),
            ));
        }

        if self.priority_senders.iter().any(|s| s.trim().is_empty()) {
            return Err(CleanupError::ConfigError(
                "rules.priority_senders cannot contain empty strings".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        for rule in &self.category_rules {
            let name = rule.name.trim();
            if name.is_empty() {
                return Err(CleanupError::ConfigError(
                    "rules.category_rules entries must have a name".to_string(),
                ));
            }
            if name.eq_ignore_ascii_case(crate::models::UNCATEGORIZED) {
                return Err(CleanupError::ConfigError(format!(
                    "rules.category_rules cannot use the reserved name '{}'",
                    name
                )));
            }
            if !seen.insert(name.to_lowercase()) {
                return Err(CleanupError::ConfigError(format!(
                    "rules.category_rules has duplicate category '{}'",
                    name
                )));
            }
            if rule.terms.is_empty() || rule.terms.iter().any(|t| t.trim().is_empty()) {
                return Err(CleanupError::ConfigError(format!(
                    "rules.category_rules '{}' needs at least one non-empty term",
                    name
                )));
            }
        }

        if self.bulk_sender_markers.iter().any(|m| m.trim().is_empty()) {
            return Err(CleanupError::ConfigError(
                "rules.bulk_sender_markers cannot contain empty strings".to_string(),
            ));
        }

        if self.scoring.sender_weight == 0 || self.scoring.keyword_weight == 0 {
            return Err(CleanupError::ConfigError(
                "rules.scoring weights must be greater than 0".to_string(),
            ));
        }
        if self.scoring.keyword_cap < self.scoring.keyword_weight {
            return Err(CleanupError::ConfigError(
                "rules.scoring.keyword_cap must be at least keyword_weight".to_string(),
            ));
        }

        tracing::debug!("Rule set validation passed");
        Ok(())
    }
}

fn default_delete_older_than_days() -> u32 {
    90
}

fn default_safety_cap() -> usize {
    100
}

fn default_sender_weight() -> u32 {
    10
}

fn default_keyword_weight() -> u32 {
    5
}

fn default_keyword_cap() -> u32 {
    20
}

fn default_priority_keywords() -> BTreeSet<String> {
    [
        "job offer",
        "job opportunity",
        "interview",
        "we'd like to offer",
        "hiring",
        "salary",
        "annual compensation",
        "offer letter",
        "contract offer",
        "invoice",
        "payment due",
        "urgent",
        "deadline",
        "action required",
        "account suspended",
        "verify your",
        "security alert",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_category_rules() -> Vec<CategoryRule> {
    vec![
        CategoryRule::new(
            "Shopping",
            &["receipt", "order confirmation", "your order", "purchase", "shipment", "tracking number"],
        ),
        CategoryRule::new(
            "Store Promos",
            &[
                "% off", "off today", "sale ends", "flash sale", "clearance", "shop now",
                "limited time", "exclusive offer", "special offer", "today only", "deal of",
                "free shipping", "new arrivals", "back in stock", "just for you", "don't miss",
                "save up to", "extra savings", "coupon", "promo code", "discount code",
            ],
        ),
        CategoryRule::new(
            "Dev Tools",
            &["github", "gitlab", "jira", "bitbucket", "jenkins", "pull request", "commit"],
        ),
        CategoryRule::new(
            "Newsletters",
            &["newsletter", "weekly digest", "monthly update", "our latest"],
        ),
        CategoryRule::new(
            "Billing & Payments",
            &[
                "charged", "subscription", "billing", "your bill", "auto-renew",
                "renewal notice", "payment received", "payment confirmed", "your plan",
            ],
        ),
        CategoryRule::new(
            "Finance",
            &["statement", "transaction", "bank", "credit card", "paypal", "wire transfer"],
        ),
    ]
}

fn default_bulk_sender_markers() -> Vec<String> {
    [
        "noreply",
        "no-reply",
        "donotreply",
        "do-not-reply",
        "newsletter",
        "notifications",
        "notify@",
        "mailer@",
        "bounce",
        "marketing@",
        "promo@",
        "news@",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
