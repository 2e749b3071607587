//! Turns classifications and duplicate groups into an ordered action plan
//!
//! Planning is pure: it reads the message snapshot and produces data. Nothing
//! here talks to the mail store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::duplicates::DuplicateGroup;
use crate::models::{ClassificationResult, Message};
use crate::rules::RuleSet;

pub const REASON_PRIORITY: &str = "priority";
pub const REASON_DUPLICATE: &str = "duplicate";
pub const REASON_OLD: &str = "old";
pub const REASON_CATEGORY: &str = "category";
pub const REASON_NEWSLETTER: &str = "newsletter";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Trash,
    Label,
    Star,
    /// Informational only, never mutates the mailbox
    UnsubscribeFlag,
}

impl ActionKind {
    pub fn is_destructive(self) -> bool {
        matches!(self, ActionKind::Trash)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::Trash => "trash",
            ActionKind::Label => "label",
            ActionKind::Star => "star",
            ActionKind::UnsubscribeFlag => "unsubscribe-flag",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub message_id: String,
    pub kind: ActionKind,
    pub reason: String,
    /// Label name for `Label`, unsubscribe link for `UnsubscribeFlag`
    pub payload: Option<String>,
}

impl PlannedAction {
    fn new(message_id: &str, kind: ActionKind, reason: &str, payload: Option<String>) -> Self {
        Self {
            message_id: message_id.to_string(),
            kind,
            reason: reason.to_string(),
            payload,
        }
    }
}

/// Restricts the planner to one decision category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ActionFilter {
    #[default]
    All,
    /// Star priority messages
    Protect,
    /// Trash non-survivor duplicates
    Duplicates,
    /// Trash messages past the age threshold
    DeleteOld,
    /// Apply category labels
    Organize,
    /// Flag newsletters with an unsubscribe link
    Unsubscribe,
}

impl ActionFilter {
    fn allows(self, decision: ActionFilter) -> bool {
        self == ActionFilter::All || self == decision
    }
}

impl fmt::Display for ActionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionFilter::All => "all",
            ActionFilter::Protect => "protect",
            ActionFilter::Duplicates => "duplicates",
            ActionFilter::DeleteOld => "delete-old",
            ActionFilter::Organize => "organize",
            ActionFilter::Unsubscribe => "unsubscribe",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub actions: Vec<PlannedAction>,
    /// Trash actions pushed past the safety cap, oldest first
    pub deferred: Vec<PlannedAction>,
}

impl ActionPlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind == kind).count()
    }

    pub fn actions_for<'a>(&'a self, message_id: &'a str) -> impl Iterator<Item = &'a PlannedAction> + 'a {
        self.actions.iter().filter(move |a| a.message_id == message_id)
    }
}

/// Build the action plan for one run.
///
/// Messages are visited in input order. Messages without a classification
/// (skipped as malformed) receive no actions.
pub fn plan(
    messages: &[Message],
    classifications: &HashMap<String, ClassificationResult>,
    groups: &[DuplicateGroup],
    rules: &RuleSet,
    as_of: DateTime<Utc>,
    filter: ActionFilter,
) -> ActionPlan {
    let duplicate_candidates: HashSet<&str> = groups
        .iter()
        .flat_map(|g| g.trash_candidates(classifications))
        .map(String::as_str)
        .collect();
    let max_age = Duration::days(i64::from(rules.delete_older_than_days));

    let mut actions = Vec::new();

    for message in messages {
        let Some(classification) = classifications.get(&message.id) else {
            continue;
        };
        if message.is_trashed {
            continue;
        }

        if classification.is_priority() {
            if filter.allows(ActionFilter::Protect) && !message.is_starred {
                actions.push(PlannedAction::new(&message.id, ActionKind::Star, REASON_PRIORITY, None));
            }
            continue;
        }

        let is_duplicate = duplicate_candidates.contains(message.id.as_str());
        let is_old = as_of.signed_duration_since(message.received_at) > max_age;

        let trash_reason = if is_duplicate && filter.allows(ActionFilter::Duplicates) {
            Some(REASON_DUPLICATE)
        } else if is_old && filter.allows(ActionFilter::DeleteOld) {
            Some(REASON_OLD)
        } else {
            None
        };
        if let Some(reason) = trash_reason {
            actions.push(PlannedAction::new(&message.id, ActionKind::Trash, reason, None));
        }

        if classification.is_categorized()
            && filter.allows(ActionFilter::Organize)
            && !message.has_label(&classification.category)
        {
            actions.push(PlannedAction::new(
                &message.id,
                ActionKind::Label,
                REASON_CATEGORY,
                Some(classification.category.clone()),
            ));
        }

        if classification.is_newsletter && filter.allows(ActionFilter::Unsubscribe) {
            if let Some(link) = &classification.unsubscribe_link {
                actions.push(PlannedAction::new(
                    &message.id,
                    ActionKind::UnsubscribeFlag,
                    REASON_NEWSLETTER,
                    Some(link.clone()),
                ));
            }
        }
    }

    let plan = apply_safety_cap(actions, messages, rules.safety_cap_per_run);

    tracing::debug!(
        "Planned {} actions ({} trash, {} label, {} star, {} unsubscribe), {} deferred",
        plan.actions.len(),
        plan.count(ActionKind::Trash),
        plan.count(ActionKind::Label),
        plan.count(ActionKind::Star),
        plan.count(ActionKind::UnsubscribeFlag),
        plan.deferred.len()
    );

    plan
}

/// Keep the `cap` oldest trash actions and move the rest to `deferred`
fn apply_safety_cap(actions: Vec<PlannedAction>, messages: &[Message], cap: usize) -> ActionPlan {
    let trash_total = actions.iter().filter(|a| a.kind.is_destructive()).count();
    if trash_total <= cap {
        return ActionPlan {
            actions,
            deferred: Vec::new(),
        };
    }

    let received: HashMap<&str, DateTime<Utc>> = messages
        .iter()
        .map(|m| (m.id.as_str(), m.received_at))
        .collect();

    let mut trash_order: Vec<(DateTime<Utc>, &str)> = actions
        .iter()
        .filter(|a| a.kind.is_destructive())
        .map(|a| {
            let at = received
                .get(a.message_id.as_str())
                .copied()
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            (at, a.message_id.as_str())
        })
        .collect();
    trash_order.sort();

    let rank: HashMap<String, usize> = trash_order
        .iter()
        .enumerate()
        .map(|(i, (_, id))| (id.to_string(), i))
        .collect();

    let mut kept = Vec::with_capacity(actions.len());
    let mut deferred = Vec::new();
    for action in actions {
        let position = rank.get(&action.message_id).copied().unwrap_or(0);
        if action.kind.is_destructive() && position >= cap {
            deferred.push((position, action));
        } else {
            kept.push(action);
        }
    }
    deferred.sort_by_key(|(position, _)| *position);

    tracing::info!(
        "Safety cap of {} reached, deferring {} trash actions to a later run",
        cap,
        deferred.len()
    );

    ActionPlan {
        actions: kept,
        deferred: deferred.into_iter().map(|(_, a)| a).collect(),
    }
}
