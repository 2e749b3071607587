//! Single entry point chaining validate, list, classify, group, plan, execute

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::classifier::Classifier;
use crate::duplicates::group_duplicates;
use crate::error::{CleanupError, Result};
use crate::executor::{ExecutionEngine, ExecutionMode, ExecutionReport, SkippedMessage};
use crate::models::{ClassificationResult, Message};
use crate::planner::{plan, ActionFilter, ActionPlan};
use crate::rules::RuleSet;
use crate::store::MailStore;

pub const DEFAULT_QUERY: &str = "in:inbox";

/// Per-run options supplied by the caller
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: ExecutionMode,
    pub filter: ActionFilter,
    /// Overrides `RuleSet::delete_older_than_days` for this run only
    pub delete_older_than_days: Option<u32>,
    /// Reference time for age decisions; `None` means now
    pub as_of: Option<DateTime<Utc>>,
    pub query: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::DryRun,
            filter: ActionFilter::All,
            delete_older_than_days: None,
            as_of: None,
            query: DEFAULT_QUERY.to_string(),
        }
    }
}

/// Result of the pure stages, before anything is executed
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub messages: Vec<Message>,
    pub classifications: HashMap<String, ClassificationResult>,
    pub skipped: Vec<SkippedMessage>,
    pub plan: ActionPlan,
}

/// Classify, group and plan over an already-listed snapshot
pub fn prepare(
    messages: Vec<Message>,
    rules: &RuleSet,
    as_of: DateTime<Utc>,
    filter: ActionFilter,
) -> PreparedRun {
    let classifier = Classifier::new(rules);
    let mut classifications = HashMap::with_capacity(messages.len());
    let mut skipped = Vec::new();
    let mut classified = Vec::with_capacity(messages.len());

    for message in messages {
        match classifier.classify(&message) {
            Ok(result) => {
                classifications.insert(result.message_id.clone(), result);
                classified.push(message);
            }
            Err(CleanupError::ClassificationError { message_id, reason }) => {
                tracing::warn!("Skipping message '{}': {}", message_id, reason);
                skipped.push(SkippedMessage { message_id, reason });
            }
            Err(e) => {
                skipped.push(SkippedMessage {
                    message_id: message.id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    let groups = group_duplicates(&classified);
    tracing::debug!(
        "Classified {} messages, {} skipped, {} duplicate groups",
        classified.len(),
        skipped.len(),
        groups.len()
    );

    let plan = plan(&classified, &classifications, &groups, rules, as_of, filter);

    PreparedRun {
        messages: classified,
        classifications,
        skipped,
        plan,
    }
}

/// Run one full cleanup pass against `store`.
///
/// Rule validation happens before any store call. The stop flag, when given,
/// is handed to the execution engine.
pub async fn run_cleanup(
    store: &dyn MailStore,
    rules: &RuleSet,
    options: &RunOptions,
    stop: Option<Arc<AtomicBool>>,
) -> Result<ExecutionReport> {
    let rules = match options.delete_older_than_days {
        Some(days) => rules.clone().with_delete_older_than_days(days),
        None => rules.clone(),
    }
    .normalized();
    rules.validate()?;

    let as_of = options.as_of.unwrap_or_else(Utc::now);
    tracing::info!(
        "Starting {} run (filter: {}, older than {} days, as of {})",
        options.mode,
        options.filter,
        rules.delete_older_than_days,
        as_of.to_rfc3339()
    );

    let messages = store.list_messages(&options.query).await?;
    tracing::info!("Listed {} messages for query '{}'", messages.len(), options.query);

    let prepared = prepare(messages, &rules, as_of, options.filter);

    let mut engine = ExecutionEngine::new(rules.safety_cap_per_run);
    if let Some(stop) = stop {
        engine = engine.with_stop_flag(stop);
    }

    let skipped = prepared.skipped;
    let result = engine.execute(&prepared.plan, store, options.mode).await;

    match result {
        Ok(mut report) => {
            report.skipped = skipped;
            log_summary(&report);
            Ok(report)
        }
        Err(CleanupError::AuthExpired {
            message,
            report: Some(mut report),
        }) => {
            report.skipped = skipped;
            Err(CleanupError::AuthExpired {
                message,
                report: Some(report),
            })
        }
        Err(e) => Err(e),
    }
}

fn log_summary(report: &ExecutionReport) {
    tracing::info!(
        "Run {} ({}) finished: {} trashed, {} labelled, {} starred, {} flagged, {} failed, {} deferred, {} skipped",
        report.run_id,
        report.mode,
        report.counts.trash,
        report.counts.label,
        report.counts.star,
        report.counts.unsubscribe_flag,
        report.failures.len(),
        report.deferred.len(),
        report.skipped.len()
    );
}
