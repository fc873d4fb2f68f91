//! Kino Bot - Main Entry Point
//!
//! Runs the Telegram bot, or performs one-off admin tasks from the command line.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use kino_bot::broadcast::{BroadcastHistory, BroadcastRequest};
use kino_bot::commands::CommandHandler;
use kino_bot::config::{BotSettings, TelegramConfig};
use kino_bot::directory::{RecipientMode, UserDirectory};
use kino_bot::gate::{MESSAGE_ACTION, MemoryStore, RateGate};
use kino_bot::runtime::BotRuntime;
use kino_bot::telegram::{MessageStream, TelegramBot};

/// Telegram bot for a media catalog.
#[derive(Parser, Debug)]
#[command(name = "kino_bot")]
#[command(about = "Telegram media catalog bot with rate-limited broadcasts")]
#[command(version)]
struct Args {
    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env", global = true)]
    env_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bot and answer incoming messages.
    Run,

    /// Broadcast a stored message to users and exit.
    Broadcast {
        /// Private chat (user id) holding the message.
        #[arg(long)]
        from_chat: i64,

        /// Id of the message to broadcast.
        #[arg(long)]
        message_id: i32,

        /// Only send to users active within the active window.
        #[arg(long)]
        active: bool,
    },

    /// Ban a user.
    Ban {
        /// Telegram user id.
        user_id: i64,
    },

    /// Lift a user's ban.
    Unban {
        /// Telegram user id.
        user_id: i64,
    },

    /// Print user and broadcast statistics.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level);

    // Load environment variables
    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    let settings = Arc::new(BotSettings::from_env_with_defaults());

    let directory = Arc::new(
        UserDirectory::load(&settings.users_path)
            .context("Failed to load user directory")?
            .with_active_window_days(settings.active_window_days),
    );

    let history = Arc::new(
        BroadcastHistory::load(&settings.history_path)
            .context("Failed to load broadcast history")?,
    );

    match args.command {
        Command::Run => run(settings, directory, history).await,
        Command::Broadcast {
            from_chat,
            message_id,
            active,
        } => {
            let mode = if active {
                RecipientMode::RecentlyActive
            } else {
                RecipientMode::All
            };
            let request = BroadcastRequest {
                admin_id: from_chat,
                from_chat,
                message_id,
                mode,
            };
            broadcast(settings, directory, history, request).await
        }
        Command::Ban { user_id } => {
            if !directory.ban(user_id).await? {
                bail!("User not found: {user_id}");
            }
            println!("✓ User {user_id} banned");
            Ok(())
        }
        Command::Unban { user_id } => {
            if !directory.unban(user_id).await? {
                bail!("User not found: {user_id}");
            }
            println!("✓ User {user_id} unbanned");
            Ok(())
        }
        Command::Stats => {
            print_stats(&directory, &history).await;
            Ok(())
        }
    }
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Connects and signs in the bot account.
async fn connect_bot() -> Result<Arc<TelegramBot>> {
    let tg_config = TelegramConfig::from_env()
        .context("Failed to load Telegram configuration from environment")?;

    let bot = TelegramBot::connect(&tg_config)
        .await
        .context("Failed to connect to Telegram")?;

    bot.ensure_bot_signed_in(&tg_config.bot_token, &tg_config.api_hash)
        .await
        .context("Bot sign in failed")?;

    Ok(Arc::new(bot))
}

/// Runs the interactive bot until Ctrl+C.
async fn run(
    settings: Arc<BotSettings>,
    directory: Arc<UserDirectory>,
    history: Arc<BroadcastHistory>,
) -> Result<()> {
    let interrupted = history
        .mark_interrupted()
        .await
        .context("Failed to update broadcast history")?;
    if !interrupted.is_empty() {
        info!(
            "{} broadcasts were interrupted by a previous shutdown",
            interrupted.len()
        );
    }

    let bot = connect_bot().await?;
    let store = MemoryStore::connect(Duration::from_secs(60)).await;

    let handler = CommandHandler::new(
        Arc::clone(&settings),
        RateGate::new(Arc::clone(&store), MESSAGE_ACTION),
        Arc::clone(&directory),
        Arc::clone(&history),
    );

    let updates = bot
        .take_updates()
        .await
        .context("Updates receiver already taken")?;
    let messages = MessageStream::new(bot.inner(), updates);

    let runtime = Arc::new(BotRuntime::new(
        Arc::clone(&bot),
        Arc::clone(&settings),
        handler,
        directory,
        history,
    ));

    info!("Starting bot...");
    info!("Admins: {:?}", settings.admins);
    info!("Bot is running. Use Ctrl+C to stop.");

    tokio::select! {
        () = Arc::clone(&runtime).run(messages) => {
            info!("Update stream ended");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    // Cleanup
    info!("Shutting down...");
    store.disconnect().await;
    bot.disconnect();

    Ok(())
}

/// Runs a single broadcast from the command line.
async fn broadcast(
    settings: Arc<BotSettings>,
    directory: Arc<UserDirectory>,
    history: Arc<BroadcastHistory>,
    request: BroadcastRequest,
) -> Result<()> {
    let bot = connect_bot().await?;
    let store = Arc::new(MemoryStore::new());

    let handler = CommandHandler::new(
        Arc::clone(&settings),
        RateGate::new(store, MESSAGE_ACTION),
        Arc::clone(&directory),
        Arc::clone(&history),
    );
    let runtime = BotRuntime::new(Arc::clone(&bot), settings, handler, directory, history);

    let tally = runtime
        .run_broadcast(request)
        .await
        .context("Failed to list broadcast recipients")?;

    println!("✓ Broadcast finished: {tally}");
    bot.disconnect();
    Ok(())
}

/// Prints user counts and recent broadcasts.
async fn print_stats(directory: &UserDirectory, history: &BroadcastHistory) {
    let stats = directory.stats().await;
    println!("Users:           {}", stats.total);
    println!("Active (7 days): {}", stats.active_week);
    println!("Joined today:    {}", stats.joined_today);
    println!("Banned:          {}", stats.banned);

    let recent = history.recent(10).await;
    if recent.is_empty() {
        return;
    }

    println!("\nRecent broadcasts:");
    for record in recent {
        println!(
            "  #{} {} ({:?}, {}): {}",
            record.id,
            record.started_at.format("%Y-%m-%d %H:%M"),
            record.status,
            record.mode,
            record.tally
        );
    }
}
