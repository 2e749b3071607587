//! Inbox cleanup
//!
//! Rule-based triage for a personal mailbox: protect important mail, trash old
//! mail and duplicate copies, label by category, and list unsubscribe links.
//!
//! # Overview
//!
//! The decision core is pure and synchronous in spirit:
//! - **Classification**: priority score, category, newsletter detection
//! - **Duplicate grouping**: fingerprinting with a deterministic survivor
//! - **Planning**: precedence, idempotence, and the per-run safety cap
//! - **Execution**: dry-run or commit against a [`MailStore`], tolerant of
//!   per-action failures
//!
//! Around it sit the Gmail store, OAuth, TOML config, a scheduler and a CLI.
//!
//! # Example Usage
//!
//! ```no_run
//! use inbox_cleanup::{auth, config::Config, gmail::GmailMailStore};
//! use inbox_cleanup::pipeline::{run_cleanup, RunOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!
//!     let hub = auth::initialize_gmail_hub(
//!         "credentials.json".as_ref(),
//!         ".inbox-cleanup/token.json".as_ref(),
//!     )
//!     .await?;
//!     let store = GmailMailStore::new(hub, &config.scan, config.retry.clone());
//!
//!     // Dry run by default
//!     let report = run_cleanup(&store, &config.rules, &RunOptions::default(), None).await?;
//!     println!("would trash {} messages", report.counts.trash);
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`rules`] - Rule set and scoring policy
//! - [`fingerprint`] - Duplicate-detection keys
//! - [`classifier`] - Message classification
//! - [`duplicates`] - Duplicate grouping and survivor selection
//! - [`planner`] - Action planning
//! - [`executor`] - Plan execution and reports
//! - [`pipeline`] - End-to-end run entry point
//! - [`store`] - Mail store capability trait
//! - [`gmail`] - Gmail-backed store
//! - [`auth`] - OAuth2 authentication
//! - [`config`] - Configuration management
//! - [`scheduler`] - Daily/weekly triggering
//! - [`cli`] - Command-line interface and report rendering

pub mod auth;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod gmail;
pub mod models;
pub mod pipeline;
pub mod planner;
pub mod rules;
pub mod scheduler;
pub mod store;

pub use error::{CleanupError, ProviderErrorKind, Result};

pub use models::{ClassificationResult, Message};
pub use rules::{CategoryRule, RuleSet, ScoringPolicy};

pub use classifier::{classify, Classifier};
pub use duplicates::{group_duplicates, DuplicateGroup};
pub use fingerprint::MessageFingerprint;
pub use planner::{plan, ActionFilter, ActionKind, ActionPlan, PlannedAction};
pub use executor::{ExecutionEngine, ExecutionMode, ExecutionReport};
pub use pipeline::{run_cleanup, RunOptions};

pub use store::MailStore;
pub use gmail::GmailMailStore;

pub use config::Config;
pub use scheduler::{Schedule, Scheduler};

pub use cli::{Cli, Commands, Report};
