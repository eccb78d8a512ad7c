//! `reftrackd`: the referral-tracking Telegram bot.
//!
//! Usage:
//!   reftrackd -c <config.toml> [--data-dir <dir>] [run]
//!   reftrackd -c <config.toml> leaderboard [--limit N] [--json]
//!
//! The bot token may come from `TELEGRAM_BOT_TOKEN` instead of the file.

mod commands;
mod config;
mod dispatch;
mod poller;
mod replies;
mod telegram;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use config::BotConfig;
use dispatch::Dispatcher;
use referral::{ReferralConfig, ReferralModule, ReferralStore};
use reftrack_core::ServiceConfig;
use reftrack_sql::{SQLStore, SqliteStore};
use telegram::TelegramClient;

/// Referral-tracking bot for a gated Telegram channel.
#[derive(Parser, Debug)]
#[command(name = "reftrackd", about = "Referral-tracking Telegram bot")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short = 'c', long = "config", required = true)]
    config: PathBuf,

    /// Data directory (overrides [storage].data_dir).
    #[arg(long = "data-dir")]
    data_dir: Option<PathBuf>,

    /// SQLite database file (defaults to `{data_dir}/reftrack.sqlite`).
    #[arg(long = "sqlite")]
    sqlite: Option<PathBuf>,

    /// Bot token (overrides [telegram].token).
    #[arg(long = "token", env = config::TOKEN_ENV, hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Long-poll Telegram and serve commands (default).
    Run,
    /// Print the current leaderboard and exit.
    Leaderboard {
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Print JSON instead of the text table.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    info!("Loading configuration from {}", cli.config.display());
    let mut bot_config = BotConfig::load(&cli.config)?;
    bot_config.apply_token_override(cli.token.clone());

    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&bot_config.storage.data_dir));
    std::fs::create_dir_all(&data_dir)?;
    let core_config = ServiceConfig {
        data_dir: Some(data_dir),
        sqlite_path: cli.sqlite.clone(),
    };

    let sql: Arc<dyn SQLStore> = Arc::new(
        SqliteStore::open(&core_config.resolve_sqlite_path())
            .map_err(|e| anyhow::anyhow!("failed to open SQL store: {}", e))?,
    );

    match cli.command.unwrap_or(Cmd::Run) {
        Cmd::Leaderboard { limit, json } => print_leaderboard(sql, limit, json),
        Cmd::Run => run_bot(bot_config, sql).await,
    }
}

fn print_leaderboard(sql: Arc<dyn SQLStore>, limit: usize, json: bool) -> anyhow::Result<()> {
    let store = ReferralStore::new(sql)?;
    let entries = store.leaderboard_entries(limit)?;
    if json {
        println!("{}", replies::leaderboard_json(&entries)?);
    } else {
        print!("{}", replies::leaderboard_table(&entries));
        println!("\n{} registered users.", store.count_users()?);
    }
    Ok(())
}

async fn run_bot(bot_config: BotConfig, sql: Arc<dyn SQLStore>) -> anyhow::Result<()> {
    config::verify_config(&bot_config)?;

    let client = Arc::new(
        TelegramClient::new(
            &bot_config.telegram.api_base,
            &bot_config.telegram.token,
            bot_config.telegram.request_timeout(),
        )
        .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {}", e))?,
    );
    let me = client
        .get_me()
        .await
        .map_err(|e| anyhow::anyhow!("failed to authenticate bot token: {}", e))?;
    info!("Authorized as @{me}");
    if !me.is_empty() && me != bot_config.telegram.bot_handle.trim_start_matches('@') {
        warn!(
            "configured bot_handle {} differs from authorized bot @{me}; referral links use the configured handle",
            bot_config.telegram.bot_handle
        );
    }

    client
        .delete_webhook()
        .await
        .map_err(|e| anyhow::anyhow!("failed to remove webhook: {}", e))?;

    let module = ReferralModule::new(
        sql,
        client.clone(),
        ReferralConfig {
            bot_handle: bot_config.telegram.bot_handle.clone(),
            channel: bot_config.telegram.channel.clone(),
            gate_policy: bot_config.gate.policy(),
        },
    )?;
    info!(
        "{} module initialized (channel {})",
        module.name(),
        bot_config.telegram.channel
    );

    let dispatcher = Arc::new(Dispatcher::new(
        module.ledger().clone(),
        bot_config.poll.leaderboard_size,
    ));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("shutdown requested");
                    cancel.cancel();
                }
                Err(e) => warn!("failed to listen for ctrl-c: {e}"),
            }
        });
    }

    poller::run(
        client.clone(),
        client,
        dispatcher,
        bot_config.poll.poll_config(),
        cancel,
    )
    .await;

    Ok(())
}
