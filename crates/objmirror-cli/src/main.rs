//! objmirror CLI - main entry point
//!
//! `event` handles one object-appeared event, `cron` runs the periodic
//! scanner (once or on an interval), `validate` checks the configuration.
//! Unrecoverable initialization errors exit nonzero; per-object errors
//! surface through responses.

use std::collections::HashMap;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use objmirror_common::logging::{init_logging, LogConfig, LogLevel};
use objmirror_core::event::{handle_event, Event};
use objmirror_core::notify::LogNotifier;
use objmirror_core::storage::StorageRegistry;
use objmirror_core::{Config, MirrorService};
use objmirror_cron::CronService;

#[derive(Parser, Debug)]
#[command(name = "objmirror")]
#[command(author, version, about = "Mirrors storage objects according to configured rules")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mirror one object, as a storage event handler would
    Event {
        /// URL of the object that appeared
        #[arg(long)]
        url: String,

        /// Event metadata as key=value pairs
        #[arg(long = "attr", value_parser = parse_key_val)]
        attributes: Vec<(String, String)>,
    },

    /// Run the periodic scanner
    Cron {
        /// Run a single tick and exit
        #[arg(long)]
        once: bool,

        /// Seconds between ticks
        #[arg(long, default_value_t = 60)]
        interval_secs: u64,

        /// Per-tick deadline in seconds
        #[arg(long)]
        deadline_secs: Option<u64>,
    },

    /// Load and validate the configuration, then exit
    Validate,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => Err(format!("'{}' is not a key=value pair", s)),
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env().unwrap_or_default();
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    let _ = init_logging(&log_config);

    if let Err(e) = run(cli).await {
        error!(error = %e, "command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let storage = Arc::new(StorageRegistry::with_defaults());
    let notifier = Arc::new(LogNotifier);

    match cli.command {
        Command::Event { url, attributes } => {
            let service = MirrorService::from_env(storage, notifier).await?;
            let mut event = Event::new(url);
            event.attributes = attributes.into_iter().collect::<HashMap<_, _>>();
            let response = handle_event(&service, event).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }

        Command::Cron {
            once,
            interval_secs,
            deadline_secs,
        } => {
            let config = Config::from_env(&storage).await?;
            let service = CronService::new(&config, storage, notifier).await?;
            let deadline = deadline_secs.map(Duration::from_secs);
            if once {
                let report = tick(&service, deadline).await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            info!(interval_secs, "starting scan loop");
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            loop {
                interval.tick().await;
                match tick(&service, deadline).await {
                    Ok(report) => {
                        info!(processed = report.processed(), "tick complete")
                    }
                    // The ledger was not updated for failed objects; the
                    // next tick retries them.
                    Err(e) => error!(error = %e, "tick failed"),
                }
            }
        }

        Command::Validate => {
            let config = Config::from_env(&storage).await?;
            let section = config.rule_set();
            println!(
                "configuration ok: {} seed rule(s), rule store: {}",
                section.rules.len(),
                section.base_url.as_deref().unwrap_or("none")
            );
        }
    }
    Ok(())
}

async fn tick(
    service: &CronService,
    deadline: Option<Duration>,
) -> objmirror_common::Result<objmirror_cron::TickReport> {
    match deadline {
        Some(deadline) => service.tick_with_deadline(deadline).await,
        None => service.tick().await,
    }
}
