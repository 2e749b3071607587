//! Applies an action plan against a mail store
//!
//! Dry-run never touches the store. Commit applies actions one at a time in
//! plan order, records every outcome, and keeps going past per-action
//! failures. Expired credentials abort the rest of the plan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{CleanupError, ProviderErrorKind, Result};
use crate::planner::{ActionKind, ActionPlan, PlannedAction};
use crate::store::MailStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    DryRun,
    Commit,
}

impl ExecutionMode {
    pub fn is_dry_run(self) -> bool {
        self == ExecutionMode::DryRun
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::DryRun => f.write_str("dry-run"),
            ExecutionMode::Commit => f.write_str("commit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeStatus {
    Applied,
    Simulated,
    /// Recorded without a store call (unsubscribe flags)
    Informational,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action: PlannedAction,
    pub status: OutcomeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionFailure {
    pub message_id: String,
    pub kind: ActionKind,
    pub error_kind: ProviderErrorKind,
    pub error: String,
}

/// A message left out of the run because it could not be classified
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedMessage {
    pub message_id: String,
    pub reason: String,
}

/// Successful (or simulated) actions per kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCounts {
    pub trash: usize,
    pub label: usize,
    pub star: usize,
    pub unsubscribe_flag: usize,
}

impl ActionCounts {
    pub fn get(&self, kind: ActionKind) -> usize {
        match kind {
            ActionKind::Trash => self.trash,
            ActionKind::Label => self.label,
            ActionKind::Star => self.star,
            ActionKind::UnsubscribeFlag => self.unsubscribe_flag,
        }
    }

    fn increment(&mut self, kind: ActionKind) {
        match kind {
            ActionKind::Trash => self.trash += 1,
            ActionKind::Label => self.label += 1,
            ActionKind::Star => self.star += 1,
            ActionKind::UnsubscribeFlag => self.unsubscribe_flag += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.trash + self.label + self.star + self.unsubscribe_flag
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub run_id: Uuid,
    pub mode: ExecutionMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub counts: ActionCounts,
    pub outcomes: Vec<ActionOutcome>,
    pub failures: Vec<ActionFailure>,
    pub deferred: Vec<PlannedAction>,
    pub skipped: Vec<SkippedMessage>,
    /// Actions never submitted because the run aborted or was cancelled
    pub not_attempted: usize,
    pub cancelled: bool,
}

impl ExecutionReport {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode,
            started_at: Utc::now(),
            finished_at: None,
            counts: ActionCounts::default(),
            outcomes: Vec::new(),
            failures: Vec::new(),
            deferred: Vec::new(),
            skipped: Vec::new(),
            not_attempted: 0,
            cancelled: false,
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    fn record(&mut self, action: &PlannedAction, status: OutcomeStatus) {
        if status != OutcomeStatus::Failed {
            self.counts.increment(action.kind);
        }
        self.outcomes.push(ActionOutcome {
            action: action.clone(),
            status,
        });
    }

    fn record_failure(&mut self, action: &PlannedAction, error: &CleanupError) {
        self.record(action, OutcomeStatus::Failed);
        self.failures.push(ActionFailure {
            message_id: action.message_id.clone(),
            kind: action.kind,
            error_kind: error.provider_kind().unwrap_or(ProviderErrorKind::Permanent),
            error: error.to_string(),
        });
    }

    fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

/// Runs plans against a store, honouring an optional stop flag
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    safety_cap: usize,
    stop: Option<Arc<AtomicBool>>,
}

impl ExecutionEngine {
    /// `safety_cap` bounds trash calls in commit mode regardless of plan contents
    pub fn new(safety_cap: usize) -> Self {
        Self {
            safety_cap,
            stop: None,
        }
    }

    /// Checked before each action; once set, no further actions are submitted
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    pub async fn execute(
        &self,
        plan: &ActionPlan,
        store: &dyn MailStore,
        mode: ExecutionMode,
    ) -> Result<ExecutionReport> {
        let mut report = ExecutionReport::new(mode);
        report.deferred = plan.deferred.clone();

        match mode {
            ExecutionMode::DryRun => {
                for action in &plan.actions {
                    let status = if action.kind == ActionKind::UnsubscribeFlag {
                        OutcomeStatus::Informational
                    } else {
                        OutcomeStatus::Simulated
                    };
                    report.record(action, status);
                }
                report.finish();
                tracing::info!("Dry run simulated {} actions", report.counts.total());
                Ok(report)
            }
            ExecutionMode::Commit => self.commit(plan, store, report).await,
        }
    }

    async fn commit(
        &self,
        plan: &ActionPlan,
        store: &dyn MailStore,
        mut report: ExecutionReport,
    ) -> Result<ExecutionReport> {
        let mut trash_submitted = 0usize;

        for (index, action) in plan.actions.iter().enumerate() {
            if self.stop_requested() {
                report.cancelled = true;
                report.not_attempted = plan.actions.len() - index;
                tracing::warn!(
                    "Stop requested, {} actions not attempted",
                    report.not_attempted
                );
                break;
            }

            if action.kind == ActionKind::Trash {
                if trash_submitted >= self.safety_cap {
                    tracing::warn!(
                        "Safety cap of {} reached during commit, deferring trash of {}",
                        self.safety_cap,
                        action.message_id
                    );
                    report.deferred.push(action.clone());
                    continue;
                }
                trash_submitted += 1;
            }

            let result = match action.kind {
                ActionKind::Trash => store.trash_message(&action.message_id).await,
                ActionKind::Star => store.star_message(&action.message_id).await,
                ActionKind::Label => match action.payload.as_deref() {
                    Some(label) => store.apply_label(&action.message_id, label).await,
                    None => Err(CleanupError::permanent("label action without a label name")),
                },
                ActionKind::UnsubscribeFlag => {
                    report.record(action, OutcomeStatus::Informational);
                    continue;
                }
            };

            match result {
                Ok(()) => {
                    tracing::debug!("Applied {} to {}", action.kind, action.message_id);
                    report.record(action, OutcomeStatus::Applied);
                }
                Err(e) if e.is_auth_expired() => {
                    tracing::error!(
                        "Authentication expired while applying {} to {}: {}",
                        action.kind,
                        action.message_id,
                        e
                    );
                    report.record_failure(action, &e);
                    report.not_attempted = plan.actions.len() - index - 1;
                    report.finish();
                    return Err(CleanupError::AuthExpired {
                        message: e.to_string(),
                        report: Some(Box::new(report)),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to apply {} to {}: {}",
                        action.kind,
                        action.message_id,
                        e
                    );
                    report.record_failure(action, &e);
                }
            }
        }

        report.finish();
        tracing::info!(
            "Commit applied {} actions with {} failures",
            report.counts.total(),
            report.failures.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockMailStore;

    fn action(id: &str, kind: ActionKind, payload: Option<&str>) -> PlannedAction {
        PlannedAction {
            message_id: id.to_string(),
            kind,
            reason: "test".to_string(),
            payload: payload.map(str::to_string),
        }
    }

    fn sample_plan() -> ActionPlan {
        ActionPlan {
            actions: vec![
                action("a", ActionKind::Trash, None),
                action("a", ActionKind::Label, Some("Shopping")),
                action("b", ActionKind::Star, None),
                action("c", ActionKind::UnsubscribeFlag, Some("https://x.com/u")),
            ],
            deferred: vec![action("z", ActionKind::Trash, None)],
        }
    }

    #[tokio::test]
    async fn test_dry_run_makes_no_store_calls() {
        let store = MockMailStore::new();
        let plan = sample_plan();

        let report = ExecutionEngine::new(100)
            .execute(&plan, &store, ExecutionMode::DryRun)
            .await
            .unwrap();

        assert_eq!(report.mode, ExecutionMode::DryRun);
        assert_eq!(report.counts.get(ActionKind::Trash), plan.count(ActionKind::Trash));
        assert_eq!(report.counts.get(ActionKind::Label), 1);
        assert_eq!(report.counts.get(ActionKind::Star), 1);
        assert_eq!(report.counts.get(ActionKind::UnsubscribeFlag), 1);
        assert_eq!(report.deferred.len(), 1);
        assert!(report.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_commit_records_partial_failures() {
        let mut store = MockMailStore::new();
        store
            .expect_trash_message()
            .returning(|_| Err(CleanupError::permanent("not found")));
        store.expect_apply_label().times(1).returning(|_, _| Ok(()));
        store.expect_star_message().times(1).returning(|_| Ok(()));

        let report = ExecutionEngine::new(100)
            .execute(&sample_plan(), &store, ExecutionMode::Commit)
            .await
            .unwrap();

        assert_eq!(report.outcomes.len(), 4);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].message_id, "a");
        assert_eq!(report.failures[0].error_kind, ProviderErrorKind::Permanent);
        assert_eq!(report.counts.trash, 0);
        assert_eq!(report.counts.label, 1);
        assert_eq!(report.counts.star, 1);
        assert_eq!(report.outcomes[3].status, OutcomeStatus::Informational);
    }

    #[tokio::test]
    async fn test_auth_expired_aborts_with_partial_report() {
        let mut store = MockMailStore::new();
        store.expect_trash_message().times(1).returning(|_| Ok(()));
        store
            .expect_apply_label()
            .times(1)
            .returning(|_, _| Err(CleanupError::auth_expired("HTTP 401")));
        store.expect_star_message().never();

        let err = ExecutionEngine::new(100)
            .execute(&sample_plan(), &store, ExecutionMode::Commit)
            .await
            .unwrap_err();

        assert!(err.is_auth_expired());
        let report = err.partial_report().unwrap();
        assert_eq!(report.counts.trash, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].error_kind, ProviderErrorKind::AuthExpired);
        assert_eq!(report.not_attempted, 2);
    }

    #[tokio::test]
    async fn test_commit_enforces_cap() {
        let mut store = MockMailStore::new();
        store.expect_trash_message().times(2).returning(|_| Ok(()));

        let plan = ActionPlan {
            actions: (0..4).map(|i| action(&format!("m{}", i), ActionKind::Trash, None)).collect(),
            deferred: Vec::new(),
        };
        let report = ExecutionEngine::new(2)
            .execute(&plan, &store, ExecutionMode::Commit)
            .await
            .unwrap();

        assert_eq!(report.counts.trash, 2);
        assert_eq!(report.deferred.len(), 2);
    }

    #[tokio::test]
    async fn test_stop_flag_cancels_before_first_action() {
        let store = MockMailStore::new();
        let stop = Arc::new(AtomicBool::new(true));

        let report = ExecutionEngine::new(100)
            .with_stop_flag(stop)
            .execute(&sample_plan(), &store, ExecutionMode::Commit)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.not_attempted, 4);
        assert!(report.outcomes.is_empty());
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(ExecutionMode::DryRun.to_string(), "dry-run");
        assert_eq!(
            serde_json::to_string(&ExecutionMode::DryRun).unwrap(),
            "\"dry-run\""
        );
    }
}
