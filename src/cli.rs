//! Command-line interface

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::auth;
use crate::config::Config;
use crate::error::{CleanupError, Result};
use crate::executor::{ExecutionMode, ExecutionReport, OutcomeStatus};
use crate::gmail::GmailMailStore;
use crate::pipeline::{run_cleanup, RunOptions};
use crate::planner::{ActionFilter, ActionKind};

#[derive(Parser, Debug)]
#[command(name = "inbox-cleanup")]
#[command(version)]
#[command(about = "Clean up a Gmail inbox with rule-based triage", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path to token cache file
    #[arg(long, default_value = ".inbox-cleanup/token.json")]
    pub token_cache: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Preview the cleanup, then apply it after confirmation
    Run {
        /// Preview only, make no changes
        #[arg(long)]
        dry_run: bool,

        /// Apply without asking for confirmation
        #[arg(short, long, conflicts_with = "dry_run")]
        yes: bool,

        /// Restrict the run to one kind of decision
        #[arg(long, value_enum, default_value_t = ActionFilter::All)]
        action: ActionFilter,

        /// Override the age threshold (days) for this run
        #[arg(long)]
        days: Option<u32>,

        /// Reference time for age decisions (RFC 3339), defaults to now
        #[arg(long, value_parser = parse_as_of)]
        as_of: Option<DateTime<Utc>>,

        /// Write the run report here (.json for JSON, anything else for Markdown)
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Authenticate with Gmail API
    Auth {
        /// Force re-authentication even if token exists
        #[arg(long)]
        force: bool,
    },

    /// Delete the local token
    Signout,

    /// Run cleanups on the schedule from the config file
    Schedule,

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the usage guide
    Guide,
}

pub fn parse_as_of(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp like 2025-01-31T09:00:00Z: {}", e))
}

pub const GUIDE: &str = "\
inbox-cleanup

Clean your Gmail inbox with a browser sign-in. No passwords are stored.

What it does
  1. Protects important mail: job offers, invoices and urgent messages are starred, never trashed
  2. Trashes old mail: anything older than the threshold (90 days by default) moves to Trash
  3. Flags newsletters and lists their unsubscribe links
  4. Labels mail by category: Shopping, Finance, Dev Tools and so on
  5. Trashes duplicate copies, keeping the earliest one

Commands
  inbox-cleanup run                         Preview, confirm, then apply
  inbox-cleanup run --dry-run               Preview only
  inbox-cleanup run --action delete-old     Only trash old mail
  inbox-cleanup run --action unsubscribe    Only list unsubscribe links
  inbox-cleanup run --action organize       Only apply category labels
  inbox-cleanup run --action duplicates     Only trash duplicates
  inbox-cleanup run --days 30               Override the age threshold
  inbox-cleanup schedule                    Run daily or weekly (see [automation])
  inbox-cleanup init-config                 Write a config.toml with defaults
  inbox-cleanup signout                     Delete the local token

First-time setup
  1. Go to console.cloud.google.com
  2. Create a project and enable the Gmail API
  3. Create OAuth 2.0 Credentials (Desktop app) and save them as credentials.json
  4. Run `inbox-cleanup init-config` and add your priority senders to config.toml
  5. Run `inbox-cleanup run --dry-run`

Config
  [rules] delete_older_than_days   default 90
  [rules] priority_keywords        mail matching these is never trashed
  [rules] priority_senders         addresses or domains that are always protected
  [rules] safety_cap_per_run       max trash operations per run, default 100
";

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new(multi: MultiProgress) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        Self {
            multi,
            spinner_style,
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        println!("  ✓ {}", msg);
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(MultiProgress::new())
    }
}

/// Rendered view of one run
#[derive(Debug, Clone)]
pub struct Report {
    pub execution: ExecutionReport,
    pub filter: ActionFilter,
}

impl Report {
    pub fn new(execution: ExecutionReport, filter: ActionFilter) -> Self {
        Self { execution, filter }
    }

    pub fn summary_lines(&self) -> Vec<String> {
        let r = &self.execution;
        let mut lines = vec![
            format!("Run ID: {}", r.run_id),
            format!("Mode: {}", r.mode),
            format!("Action filter: {}", self.filter),
            format!("Trashed: {}", r.counts.trash),
            format!("Labelled: {}", r.counts.label),
            format!("Starred: {}", r.counts.star),
            format!("Unsubscribe candidates: {}", r.counts.unsubscribe_flag),
            format!("Failed: {}", r.failures.len()),
            format!("Deferred by safety cap: {}", r.deferred.len()),
            format!("Skipped (malformed): {}", r.skipped.len()),
        ];
        if r.cancelled || r.not_attempted > 0 {
            lines.push(format!("Not attempted: {}", r.not_attempted));
        }
        lines
    }

    pub fn to_markdown(&self) -> String {
        let r = &self.execution;
        let mut md = String::new();

        if r.mode.is_dry_run() {
            md.push_str("# Inbox Cleanup Report (DRY RUN)\n\n");
            md.push_str("> **DRY RUN MODE** - No changes were made. This report shows what WOULD happen.\n\n");
        } else {
            md.push_str("# Inbox Cleanup Report\n\n");
        }
        let generated = r.finished_at.unwrap_or(r.started_at);
        md.push_str(&format!("Generated: {}\n\n", generated.format("%Y-%m-%d %H:%M:%S")));

        md.push_str("## Summary\n\n");
        for line in self.summary_lines() {
            let (key, value) = line.split_once(": ").unwrap_or((line.as_str(), ""));
            md.push_str(&format!("- **{}:** {}\n", key, value));
        }
        if r.cancelled {
            md.push_str("\n> Run was cancelled before every action was submitted.\n");
        }
        md.push('\n');

        md.push_str("## Actions\n\n");
        if r.outcomes.is_empty() {
            md.push_str("_Nothing to do._\n\n");
        } else {
            md.push_str("| Message | Action | Reason | Detail | Status |\n");
            md.push_str("|---------|--------|--------|--------|--------|\n");
            for outcome in &r.outcomes {
                let a = &outcome.action;
                md.push_str(&format!(
                    "| `{}` | {} | {} | {} | {} |\n",
                    a.message_id,
                    a.kind,
                    a.reason,
                    a.payload.as_deref().unwrap_or("-"),
                    status_label(outcome.status)
                ));
            }
            md.push('\n');
        }

        let links: Vec<_> = r
            .outcomes
            .iter()
            .filter(|o| o.action.kind == ActionKind::UnsubscribeFlag)
            .filter_map(|o| o.action.payload.as_deref())
            .collect();
        if !links.is_empty() {
            md.push_str("## Unsubscribe Links\n\n");
            for link in links {
                md.push_str(&format!("- {}\n", link));
            }
            md.push('\n');
        }

        if !r.failures.is_empty() {
            md.push_str("## Failures\n\n");
            for f in &r.failures {
                md.push_str(&format!(
                    "- `{}` {} ({}): {}\n",
                    f.message_id, f.kind, f.error_kind, f.error
                ));
            }
            md.push('\n');
        }

        if !r.deferred.is_empty() {
            md.push_str("## Deferred\n\n");
            md.push_str(&format!(
                "{} trash actions exceeded the safety cap and will be picked up by a later run.\n\n",
                r.deferred.len()
            ));
            for a in &r.deferred {
                md.push_str(&format!("- `{}` ({})\n", a.message_id, a.reason));
            }
            md.push('\n');
        }

        if !r.skipped.is_empty() {
            md.push_str("## Skipped Messages\n\n");
            for s in &r.skipped {
                md.push_str(&format!("- `{}`: {}\n", s.message_id, s.reason));
            }
            md.push('\n');
        }

        md
    }

    /// Write as JSON when the path ends in `.json`, Markdown otherwise
    pub async fn save(&self, path: &Path) -> Result<()> {
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let content = if is_json {
            serde_json::to_string_pretty(&self.execution)?
        } else {
            self.to_markdown()
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, content).await?;
        info!("Report written to {:?}", path);
        Ok(())
    }
}

fn status_label(status: OutcomeStatus) -> &'static str {
    match status {
        OutcomeStatus::Applied => "applied",
        OutcomeStatus::Simulated => "would apply",
        OutcomeStatus::Informational => "listed",
        OutcomeStatus::Failed => "failed",
    }
}

pub fn print_summary(report: &Report) {
    println!("\n========================================");
    println!("Inbox Cleanup Summary");
    println!("========================================");
    for line in report.summary_lines() {
        println!("{}", line);
    }
    println!("========================================");
}

/// Ask before applying a previewed plan
pub fn confirm_commit(preview: &ExecutionReport) -> Result<bool> {
    let prompt = format!(
        "Apply {} trash, {} label and {} star actions?",
        preview.counts.trash, preview.counts.label, preview.counts.star
    );
    inquire::Confirm::new(&prompt)
        .with_default(false)
        .prompt()
        .map_err(|e| CleanupError::ConfigError(format!("Confirmation prompt failed: {}", e)))
}

/// Options gathered from `run` arguments
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub dry_run: bool,
    pub yes: bool,
    pub filter: ActionFilter,
    pub days: Option<u32>,
    pub as_of: Option<DateTime<Utc>>,
}

/// Connect, preview, optionally confirm, and apply.
///
/// Returns `None` when the user declines the commit after the preview.
pub async fn run_command(
    cli: &Cli,
    args: &RunArgs,
    stop: Arc<AtomicBool>,
    multi: MultiProgress,
) -> Result<Option<Report>> {
    let config = Config::load(&cli.config).await?;
    let progress = ProgressReporter::new(multi);

    let spinner = progress.add_spinner("Connecting to Gmail...");
    let hub = auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;
    let store = GmailMailStore::new(hub, &config.scan, config.retry.clone());
    progress.finish_spinner(&spinner, "Connected");

    let mut options = RunOptions {
        mode: ExecutionMode::DryRun,
        filter: args.filter,
        delete_older_than_days: args.days,
        // Pin the reference time so preview and commit agree
        as_of: Some(args.as_of.unwrap_or_else(Utc::now)),
        query: config.scan.query.clone(),
    };

    if !args.yes {
        let spinner = progress.add_spinner("Scanning inbox and planning...");
        let preview = run_cleanup(&store, &config.rules, &options, None).await?;
        progress.finish_spinner(&spinner, "Preview ready");

        let preview = Report::new(preview, args.filter);
        if args.dry_run {
            return Ok(Some(preview));
        }

        print_summary(&preview);
        if preview.execution.counts.total() == preview.execution.counts.unsubscribe_flag {
            println!("Nothing to apply.");
            return Ok(Some(preview));
        }
        if !confirm_commit(&preview.execution)? {
            println!("Cancelled, no changes made.");
            return Ok(None);
        }
    }

    options.mode = ExecutionMode::Commit;
    let spinner = progress.add_spinner("Applying actions...");
    let result = run_cleanup(&store, &config.rules, &options, Some(stop)).await;
    spinner.finish_and_clear();

    Ok(Some(Report::new(result?, args.filter)))
}

/// One unattended commit run, used by the scheduler.
///
/// Reloads config each time so edits apply to the next tick.
pub async fn scheduled_run(config_path: PathBuf, credentials: PathBuf, token_cache: PathBuf) {
    info!("Starting scheduled cleanup run");

    let outcome: Result<ExecutionReport> = async {
        let config = Config::load(&config_path).await?;
        let hub = auth::initialize_gmail_hub(&credentials, &token_cache).await?;
        let store = GmailMailStore::new(hub, &config.scan, config.retry.clone());
        let options = RunOptions {
            mode: ExecutionMode::Commit,
            query: config.scan.query.clone(),
            ..RunOptions::default()
        };
        run_cleanup(&store, &config.rules, &options, None).await
    }
    .await;

    match outcome {
        Ok(report) => info!(
            "Scheduled cleanup complete: {} trashed, {} failed",
            report.counts.trash,
            report.failures.len()
        ),
        Err(e) => tracing::error!("Scheduled run failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ActionFailure, ActionOutcome, SkippedMessage};
    use crate::error::ProviderErrorKind;
    use crate::planner::PlannedAction;

    fn action(id: &str, kind: ActionKind, payload: Option<&str>) -> PlannedAction {
        PlannedAction {
            message_id: id.to_string(),
            kind,
            reason: "old".to_string(),
            payload: payload.map(str::to_string),
        }
    }

    fn sample_report(mode: ExecutionMode) -> Report {
        let mut execution = ExecutionReport::new(mode);
        execution.counts.trash = 1;
        execution.counts.unsubscribe_flag = 1;
        execution.outcomes = vec![
            ActionOutcome {
                action: action("m1", ActionKind::Trash, None),
                status: OutcomeStatus::Simulated,
            },
            ActionOutcome {
                action: action("m2", ActionKind::UnsubscribeFlag, Some("https://x.com/u")),
                status: OutcomeStatus::Informational,
            },
        ];
        execution.failures = vec![ActionFailure {
            message_id: "m3".to_string(),
            kind: ActionKind::Label,
            error_kind: ProviderErrorKind::Permanent,
            error: "HTTP 404".to_string(),
        }];
        execution.deferred = vec![action("m4", ActionKind::Trash, None)];
        execution.skipped = vec![SkippedMessage {
            message_id: "m5".to_string(),
            reason: "missing sender".to_string(),
        }];
        Report::new(execution, ActionFilter::All)
    }

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from([
            "inbox-cleanup",
            "run",
            "--dry-run",
            "--action",
            "delete-old",
            "--days",
            "30",
            "--as-of",
            "2025-01-31T09:00:00Z",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                dry_run,
                action,
                days,
                as_of,
                ..
            } => {
                assert!(dry_run);
                assert_eq!(action, ActionFilter::DeleteOld);
                assert_eq!(days, Some(30));
                assert_eq!(as_of.unwrap().to_rfc3339(), "2025-01-31T09:00:00+00:00");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_dry_run_conflicts_with_yes() {
        let result = Cli::try_parse_from(["inbox-cleanup", "run", "--dry-run", "--yes"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_as_of_is_rejected() {
        assert!(parse_as_of("yesterday").is_err());
        assert!(Cli::try_parse_from(["inbox-cleanup", "run", "--as-of", "2025-13-01"]).is_err());
    }

    #[test]
    fn test_markdown_sections() {
        let md = sample_report(ExecutionMode::DryRun).to_markdown();
        assert!(md.contains("DRY RUN"));
        assert!(md.contains("- **Trashed:** 1"));
        assert!(md.contains("| `m1` | trash | old | - | would apply |"));
        assert!(md.contains("## Unsubscribe Links"));
        assert!(md.contains("https://x.com/u"));
        assert!(md.contains("## Failures"));
        assert!(md.contains("## Deferred"));
        assert!(md.contains("missing sender"));
    }

    #[tokio::test]
    async fn test_save_picks_format_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let report = sample_report(ExecutionMode::Commit);

        let json_path = dir.path().join("report.json");
        report.save(&json_path).await.unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&tokio::fs::read_to_string(&json_path).await.unwrap()).unwrap();
        assert_eq!(json["mode"], "commit");
        assert_eq!(json["counts"]["trash"], 1);

        let md_path = dir.path().join("out").join("report.md");
        report.save(&md_path).await.unwrap();
        let md = tokio::fs::read_to_string(&md_path).await.unwrap();
        assert!(md.starts_with("# Inbox Cleanup Report\n"));
    }
}
