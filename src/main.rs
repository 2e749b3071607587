use anyhow::Result;
use clap::Parser;
use inbox_cleanup::cli::{self, Cli, Commands, RunArgs};
use inbox_cleanup::config::Config;
use inbox_cleanup::scheduler::{ScheduleSpec, Scheduler};
use inbox_cleanup::{auth, CleanupError};
use indicatif::MultiProgress;
use std::io::Write;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// A writer that prints through MultiProgress to avoid progress bar conflicts
#[derive(Clone)]
struct MultiProgressWriter {
    multi: Arc<MultiProgress>,
    buffer: Vec<u8>,
}

impl Write for MultiProgressWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.buffer.is_empty() {
            let msg = String::from_utf8_lossy(&self.buffer);
            let msg = msg.trim_end_matches('\n');
            if !msg.is_empty() {
                let _ = self.multi.println(msg);
            }
            self.buffer.clear();
        }
        Ok(())
    }
}

impl Drop for MultiProgressWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[derive(Clone)]
struct MultiProgressMakeWriter {
    multi: Arc<MultiProgress>,
}

impl<'a> MakeWriter<'a> for MultiProgressMakeWriter {
    type Writer = MultiProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        MultiProgressWriter {
            multi: Arc::clone(&self.multi),
            buffer: Vec::new(),
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        eprintln!("\nFor help, run: inbox-cleanup --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Several dependencies pull in rustls; pick one provider explicitly
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("inbox_cleanup=debug,warn"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("inbox_cleanup=info,warn"))
    };

    let multi_progress = Arc::new(MultiProgress::new());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(MultiProgressMakeWriter {
            multi: Arc::clone(&multi_progress),
        })
        .with_target(false)
        .init();

    match &cli.command {
        Commands::Run {
            dry_run,
            yes,
            action,
            days,
            as_of,
            report,
        } => {
            let args = RunArgs {
                dry_run: *dry_run,
                yes: *yes,
                filter: *action,
                days: *days,
                as_of: *as_of,
            };
            if args.dry_run {
                println!("Running in DRY RUN mode - no changes will be made");
            }

            let stop = Arc::new(AtomicBool::new(false));
            {
                let stop = Arc::clone(&stop);
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::warn!("Interrupt received, finishing the current action and stopping");
                        stop.store(true, Ordering::SeqCst);
                    }
                });
            }

            let result = cli::run_command(&cli, &args, stop, (*multi_progress).clone()).await;
            let rendered = match result {
                Ok(Some(r)) => r,
                Ok(None) => return Ok(()),
                Err(CleanupError::AuthExpired {
                    message,
                    report: Some(partial),
                }) => {
                    let partial = cli::Report::new(*partial, args.filter);
                    cli::print_summary(&partial);
                    if let Some(path) = report {
                        partial.save(path).await?;
                    }
                    anyhow::bail!(
                        "{}. Run `inbox-cleanup auth --force` to sign in again.",
                        message
                    );
                }
                Err(e) => return Err(e.into()),
            };

            cli::print_summary(&rendered);
            if let Some(path) = report {
                rendered.save(path).await?;
                println!("Report written to {}", path.display());
            }
            Ok(())
        }

        Commands::Auth { force } => {
            if *force && auth::signout(&cli.token_cache).await? {
                tracing::info!("Removed existing token cache");
            }

            let hub = auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;
            println!("Successfully authenticated with Gmail API");
            println!("Token cached at: {:?}", cli.token_cache);

            let (_, profile) = hub
                .users()
                .get_profile("me")
                .add_scope(auth::MODIFY_SCOPE)
                .doit()
                .await?;
            println!(
                "Connected to account: {}",
                profile.email_address.unwrap_or_default()
            );
            Ok(())
        }

        Commands::Signout => {
            if auth::signout(&cli.token_cache).await? {
                println!("Signed out. Local token deleted.");
                println!("To fully revoke app access: {}", auth::REVOKE_URL);
            } else {
                println!("Not currently signed in (no token at {:?}).", cli.token_cache);
            }
            Ok(())
        }

        Commands::Schedule => {
            let config = Config::load(&cli.config).await?;
            let spec = ScheduleSpec::from_config(&config.automation)?;
            let scheduler = Scheduler::new(spec);

            println!("Scheduler started ({}). Press Ctrl+C to stop.", scheduler.spec());

            let (config_path, credentials, token_cache) =
                (cli.config.clone(), cli.credentials.clone(), cli.token_cache.clone());
            scheduler
                .run_forever(move || {
                    cli::scheduled_run(config_path.clone(), credentials.clone(), token_cache.clone())
                })
                .await?;
            Ok(())
        }

        Commands::InitConfig { output, force } => {
            if output.exists() && !*force {
                anyhow::bail!(
                    "Config file already exists at {:?}. Use --force to overwrite.",
                    output
                );
            }

            Config::create_example(output).await?;
            println!("Created example configuration at: {:?}", output);
            println!("Add your priority senders under [rules], then run: inbox-cleanup run --dry-run");
            Ok(())
        }

        Commands::Guide => {
            println!("{}", cli::GUIDE);
            Ok(())
        }
    }
}
