//! Command handler implementation.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use super::types::{BotCommand, CommandAction, CommandResult, IncomingMessage};
use crate::broadcast::{BroadcastHistory, BroadcastRequest, BroadcastStatus};
use crate::config::BotSettings;
use crate::directory::{DirectoryError, RecipientMode, UserDirectory};
use crate::gate::{KeyValueStore, RateGate};
use crate::identity::Identity;

/// Number of past broadcasts listed by `stats`.
const RECENT_BROADCASTS: usize = 3;

/// Internal failure while handling a message.
///
/// The user gets a generic error reply and admins are notified.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("User directory error: {0}")]
    Directory(#[from] DirectoryError),
}

/// Handles incoming messages: throttling, user bookkeeping and commands.
pub struct CommandHandler<S> {
    /// Bot settings (prefix, admins, rate limit).
    settings: Arc<BotSettings>,

    /// Per-user gate for incoming messages.
    gate: RateGate<S>,

    /// Known users.
    directory: Arc<UserDirectory>,

    /// Past broadcasts.
    history: Arc<BroadcastHistory>,
}

impl<S: KeyValueStore> CommandHandler<S> {
    /// Creates a new command handler.
    #[must_use]
    pub fn new(
        settings: Arc<BotSettings>,
        gate: RateGate<S>,
        directory: Arc<UserDirectory>,
        history: Arc<BroadcastHistory>,
    ) -> Self {
        Self {
            settings,
            gate,
            directory,
            history,
        }
    }

    /// Processes an incoming message.
    ///
    /// Returns `Ok(None)` when there is nothing to reply: the sender is
    /// throttled or banned, or the message is not a command.
    ///
    /// # Errors
    ///
    /// Returns an error if the user directory cannot be updated.
    pub async fn try_handle(
        &self,
        message: &IncomingMessage,
    ) -> Result<Option<CommandResult>, CommandError> {
        let sender = Identity(message.sender.telegram_id);

        if !self.gate.admit(sender, self.settings.rate_limit()).await {
            return Ok(None);
        }

        if message.is_private && self.directory.touch(message.sender.clone()).await? {
            info!("New user: {}", sender);
        }

        if self.directory.is_banned(sender.user_id()).await {
            debug!("Ignoring banned user {}", sender);
            return Ok(None);
        }

        let Some(command) = BotCommand::parse(&message.text, &self.settings.command_prefix) else {
            return Ok(None);
        };
        debug!("Handling command from {}: {}", sender, command);

        if command.requires_admin() && !self.settings.is_admin(sender.user_id()) {
            return Ok(Some(CommandResult::error("⛔ This command is for admins only.")));
        }

        let result = self.execute(command, message).await?;
        info!(
            "Command {} result: success={}, action={}",
            command.name(),
            result.success,
            result.action.is_some()
        );

        Ok(Some(result))
    }

    /// Executes a parsed command.
    async fn execute(
        &self,
        command: BotCommand,
        message: &IncomingMessage,
    ) -> Result<CommandResult, CommandError> {
        let result = match command {
            BotCommand::Start => self.handle_start(message).await,
            BotCommand::Help => self.handle_help(message.sender.telegram_id),
            BotCommand::Stats => self.handle_stats().await,
            BotCommand::Ban(user_id) => self.handle_ban(user_id).await?,
            BotCommand::Unban(user_id) => self.handle_unban(user_id).await?,
            BotCommand::Broadcast(mode) => Self::handle_broadcast(mode, message),
        };
        Ok(result)
    }

    async fn handle_start(&self, message: &IncomingMessage) -> CommandResult {
        let name = self
            .directory
            .get(message.sender.telegram_id)
            .await
            .and_then(|u| u.full_name)
            .unwrap_or_else(|| "there".to_owned());

        CommandResult::success(format!(
            "👋 Hi, {name}!\n\nUse {}help to see what I can do.",
            self.settings.command_prefix
        ))
    }

    fn handle_help(&self, user_id: i64) -> CommandResult {
        let is_admin = self.settings.is_admin(user_id);
        let mut lines = vec!["Available commands:".to_owned(), String::new()];

        for (cmd, admin_only, desc) in BotCommand::all_commands() {
            if admin_only && !is_admin {
                continue;
            }
            lines.push(format!("  {}{cmd} - {desc}", self.settings.command_prefix));
        }

        CommandResult::success(lines.join("\n"))
    }

    async fn handle_stats(&self) -> CommandResult {
        let stats = self.directory.stats().await;

        let mut lines = vec![
            "📊 Statistics".to_owned(),
            String::new(),
            format!("👥 Users: {}", stats.total),
            format!("🟢 Active (7 days): {}", stats.active_week),
            format!("🆕 Joined today: {}", stats.joined_today),
            format!("🚫 Banned: {}", stats.banned),
        ];

        let recent = self.history.recent(RECENT_BROADCASTS).await;
        if !recent.is_empty() {
            lines.push(String::new());
            lines.push("📢 Recent broadcasts:".to_owned());
            for record in recent {
                let status = match record.status {
                    BroadcastStatus::Running => "running",
                    BroadcastStatus::Completed => "completed",
                    BroadcastStatus::Interrupted => "interrupted",
                };
                lines.push(format!(
                    "  #{} ({}, {}): {}/{} sent, {} blocked",
                    record.id,
                    record.mode,
                    status,
                    record.tally.delivered,
                    record.tally.total,
                    record.tally.unreachable
                ));
            }
        }

        CommandResult::success(lines.join("\n"))
    }

    async fn handle_ban(&self, user_id: i64) -> Result<CommandResult, CommandError> {
        if self.settings.is_admin(user_id) {
            return Ok(CommandResult::error("Admins cannot be banned."));
        }

        Ok(if self.directory.ban(user_id).await? {
            CommandResult::success(format!("✓ User {user_id} banned."))
        } else {
            CommandResult::error(format!("User not found: {user_id}"))
        })
    }

    async fn handle_unban(&self, user_id: i64) -> Result<CommandResult, CommandError> {
        Ok(if self.directory.unban(user_id).await? {
            CommandResult::success(format!("✓ User {user_id} unbanned."))
        } else {
            CommandResult::error(format!("User not found: {user_id}"))
        })
    }

    fn handle_broadcast(mode: RecipientMode, message: &IncomingMessage) -> CommandResult {
        if !message.is_private {
            return CommandResult::error("Broadcasts can only be started in a private chat.");
        }

        let Some(message_id) = message.reply_to else {
            return CommandResult::error(
                "Reply to the message you want to broadcast with this command.",
            );
        };

        let request = BroadcastRequest {
            admin_id: message.sender.telegram_id,
            from_chat: message.chat_id,
            message_id,
            mode,
        };

        CommandResult::success_with_action(
            format!("📢 Broadcast to {mode} users is starting..."),
            CommandAction::Broadcast(request),
        )
    }
}

impl<S> std::fmt::Debug for CommandHandler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("prefix", &self.settings.command_prefix)
            .finish_non_exhaustive()
    }
}
