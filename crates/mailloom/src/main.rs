//! `mailloom` - keeps local mail stores in sync with their servers.
//!
//! ```text
//! mailloom [-c PATH] [run]              sync until interrupted
//! mailloom [-c PATH] sync               sync every account once
//! mailloom [-c PATH] search QUERY...    search every account
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use mailloom_core::{Account, EngineConfig};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SEARCH_LIMIT: u32 = 20;

#[derive(Debug, Parser)]
#[command(name = "mailloom", version, about = "Keeps local mail stores in sync with their IMAP servers")]
struct Args {
    /// Configuration file [default: <config dir>/mailloom/config.json]
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
enum Command {
    /// Sync every account until interrupted (the default)
    Run,
    /// Sync every account once and exit
    Sync,
    /// Search the local stores of every account
    Search {
        /// Words to look for
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailloom=info,mailloom_core=info,mailloom_imap=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let path = match args.config {
        Some(path) => path,
        None => EngineConfig::default_path().context("no configuration directory on this system")?,
    };
    let config = EngineConfig::load(&path)
        .await
        .with_context(|| format!("loading {}", path.display()))?;
    if config.accounts.is_empty() {
        bail!("{} configures no accounts", path.display());
    }

    let mut accounts = Vec::with_capacity(config.accounts.len());
    for account in &config.accounts {
        let opened = Account::open(account, &config.store_path(account))
            .await
            .with_context(|| format!("opening account {:?}", account.name))?;
        accounts.push(Arc::new(opened));
    }

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(accounts).await,
        Command::Sync => sync_once(&accounts).await,
        Command::Search { query } => search(&accounts, &query.join(" ")).await,
    }
}

async fn run(accounts: Vec<Arc<Account>>) -> anyhow::Result<()> {
    info!(accounts = accounts.len(), "starting mailloom");
    let (stop, shutdown) = watch::channel(false);
    let tasks: Vec<_> = accounts
        .into_iter()
        .map(|account| {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { account.run(shutdown).await })
        })
        .collect();

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("shutting down");
    stop.send_replace(true);
    for task in tasks {
        task.await.context("account task panicked")?;
    }
    Ok(())
}

async fn sync_once(accounts: &[Arc<Account>]) -> anyhow::Result<()> {
    let mut failed = 0;
    for account in accounts {
        account
            .refresh_folders()
            .await
            .with_context(|| format!("listing folders of {:?}", account.name()))?;
        for (folder, outcome) in account.sync_all().await? {
            match outcome {
                Ok(report) => println!(
                    "{}/{folder}: +{} ~{} -{}{}",
                    account.name(),
                    report.inserted,
                    report.updated,
                    report.removed,
                    if report.full_resync { " (resynced)" } else { "" }
                ),
                Err(error) => {
                    failed += 1;
                    eprintln!("{}/{folder}: {error}", account.name());
                }
            }
        }
    }
    if failed > 0 {
        bail!("{failed} folder(s) failed to sync");
    }
    Ok(())
}

async fn search(accounts: &[Arc<Account>], query: &str) -> anyhow::Result<()> {
    for account in accounts {
        let folders = account.folders().await?;
        for hit in account.search(query, None, SEARCH_LIMIT).await? {
            let Some(record) = account.message(hit.key).await? else {
                continue;
            };
            let folder = folders
                .iter()
                .find(|f| f.id == hit.key.folder)
                .map_or("?", |f| f.path.as_str());
            let from = record.envelope.from.first().map(ToString::to_string).unwrap_or_default();
            println!(
                "{}/{folder}/{}\t{from}\t{}",
                account.name(),
                hit.key.uid,
                record.envelope.subject.unwrap_or_default()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use clap::error::ErrorKind;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("mailloom").chain(args.iter().copied()))
    }

    #[test]
    fn definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn defaults_to_run() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.config, None);
        assert_eq!(args.command, None);
        assert_eq!(parse(&["run"]).unwrap().command, Some(Command::Run));
    }

    #[test]
    fn config_before_or_after_the_command() {
        let args = parse(&["sync", "--config", "/tmp/m.json"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/tmp/m.json")));
        assert_eq!(args.command, Some(Command::Sync));

        let args = parse(&["-c", "/tmp/m.json", "search", "plan"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/tmp/m.json")));
    }

    #[test]
    fn search_keeps_every_term() {
        let args = parse(&["search", "project", "plan"]).unwrap();
        assert_eq!(
            args.command,
            Some(Command::Search {
                query: vec!["project".to_string(), "plan".to_string()]
            })
        );
    }

    #[test]
    fn rejects_bad_arguments() {
        assert_eq!(parse(&["search"]).unwrap_err().kind(), ErrorKind::MissingRequiredArgument);
        assert!(parse(&["frobnicate"]).is_err());
        assert!(parse(&["--config"]).is_err());
        assert!(parse(&["sync", "extra"]).is_err());
    }

    #[test]
    fn help_and_version_exit_early() {
        assert_eq!(parse(&["--help"]).unwrap_err().kind(), ErrorKind::DisplayHelp);
        assert_eq!(parse(&["--version"]).unwrap_err().kind(), ErrorKind::DisplayVersion);
    }
}
