//! Missive CLI entry point.
//!
//! Provides `init`, `new-thread`, `request-payments`, `confirm-payments`,
//! `dispatch`, and `list` subcommands over the message store.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use missive::activation;
use missive::config::{self, Config, RuntimePaths};
use missive::dispatch::{Dispatcher, LoggingSender};
use missive::store::Store;
use missive::thread::{self, ThreadId};

/// Missive: transaction-scoped outgoing control messages.
#[derive(Parser)]
#[command(name = "missive", version, about)]
struct Cli {
    /// Path to `config.toml` (default: `~/.missive/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Create the data directory and database.
    Init,
    /// Create a contact thread and print its id.
    NewThread {
        /// Peer service address.
        #[arg(long)]
        address: String,
    },
    /// Ask a contact to activate payments.
    RequestPayments {
        /// Thread id.
        #[arg(long)]
        thread: ThreadId,
    },
    /// Tell a contact payments are now active.
    ConfirmPayments {
        /// Thread id.
        #[arg(long)]
        thread: ThreadId,
    },
    /// Hand pending messages to the (logging) transport.
    Dispatch {
        /// Write JSON logs under the log directory as well as stderr.
        #[arg(long)]
        log_to_file: bool,
    },
    /// Show a thread's messages and notices.
    List {
        /// Thread id.
        #[arg(long)]
        thread: ThreadId,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match cli.config.as_deref().and_then(|p| p.parent()) {
        Some(root) if !root.as_os_str().is_empty() => RuntimePaths::under(root.to_path_buf()),
        _ => config::runtime_paths()?,
    };
    let config_path = cli.config.clone().unwrap_or_else(|| paths.config_toml.clone());
    let config = config::load_or_default(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let _logging_guard = match cli.command {
        Command::Dispatch { log_to_file: true } => Some(missive::logging::init_production(
            &config.logs_dir(&paths),
            &config.logging.level,
        )?),
        _ => {
            missive::logging::init_cli(&config.logging.level);
            None
        }
    };

    let store = open_store(&config, &paths).await?;
    let result = run(cli.command, &config, &store).await;
    store.close().await;
    result
}

async fn open_store(config: &Config, paths: &RuntimePaths) -> anyhow::Result<Store> {
    let db_path = config.database_path(paths);
    Store::open(&db_path, config.store.max_connections)
        .await
        .with_context(|| format!("failed to open message store at {}", db_path.display()))
}

async fn run(command: Command, config: &Config, store: &Store) -> anyhow::Result<()> {
    match command {
        Command::Init => {
            let version = store.schema_version().await?;
            info!(schema_version = version, "message store ready");
            println!("initialised (schema version {version})");
        }
        Command::NewThread { address } => {
            let mut tx = store.begin().await?;
            let created = thread::create_contact_thread(&mut tx, &address).await?;
            tx.commit().await?;
            println!("{}", created.id);
        }
        Command::RequestPayments { thread } => {
            let mut tx = store.begin().await?;
            let outcome = activation::request_payment_activation(&mut tx, &thread)
                .await
                .context("failed to request payment activation")?;
            tx.commit().await?;
            println!("queued {}", outcome.message.id());
        }
        Command::ConfirmPayments { thread } => {
            let mut tx = store.begin().await?;
            let outcome = activation::confirm_payment_activation(&mut tx, &thread)
                .await
                .context("failed to confirm payment activation")?;
            tx.commit().await?;
            println!("queued {}", outcome.message.id());
        }
        Command::Dispatch { .. } => {
            let dispatcher = Dispatcher::new(Arc::new(LoggingSender), config.dispatch.batch_size)
                .with_claim_timeout(Duration::from_secs(config.dispatch.claim_timeout_secs));
            let report = dispatcher.dispatch_pending(store).await?;
            println!("sent {} failed {}", report.sent, report.failed);
        }
        Command::List { thread } => {
            for message in store.thread_messages(&thread).await? {
                println!(
                    "{} {} {} {}",
                    message.created_at().to_rfc3339(),
                    message.id(),
                    message.kind(),
                    message.delivery_state()
                );
            }
            for notice in store.thread_notices(&thread).await? {
                println!("{} notice {}", notice.created_at.to_rfc3339(), notice.kind);
            }
        }
    }
    Ok(())
}
