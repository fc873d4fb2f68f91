//! Bot runtime: the interactive update loop and background broadcasts.
//!
//! Calls that may fail silently are limited to:
//! - replies and status messages sent to chats ([`notify::send_best_effort`])
//! - admin error notifications ([`notify::notify_admins`])
//! - broadcast history writes
//!
//! Each of these logs the failure and carries on. A message that cannot be
//! handled gets a generic error reply, and the first admins are told why.

use std::sync::Arc;

use tracing::{error, info};

use crate::broadcast::{BroadcastHistory, BroadcastJob, BroadcastRequest, BroadcastTally, Dispatcher};
use crate::commands::{CommandAction, CommandHandler, IncomingMessage};
use crate::config::BotSettings;
use crate::directory::{DirectoryError, UserDirectory};
use crate::gate::MemoryStore;
use crate::notify::{self, GENERIC_ERROR_REPLY, Notifier};
use crate::telegram::{
    ChatNotifier, MessageRef, MessageStream, TelegramBot, TelegramError, TelegramTransport,
    group_peer,
};

/// Shared state of the running bot.
pub struct BotRuntime {
    bot: Arc<TelegramBot>,
    notifier: ChatNotifier,
    settings: Arc<BotSettings>,
    handler: CommandHandler<MemoryStore>,
    directory: Arc<UserDirectory>,
    history: Arc<BroadcastHistory>,
}

impl BotRuntime {
    /// Creates a runtime over connected components.
    #[must_use]
    pub fn new(
        bot: Arc<TelegramBot>,
        settings: Arc<BotSettings>,
        handler: CommandHandler<MemoryStore>,
        directory: Arc<UserDirectory>,
        history: Arc<BroadcastHistory>,
    ) -> Self {
        Self {
            notifier: ChatNotifier::new(Arc::clone(&bot), Arc::clone(&directory)),
            bot,
            settings,
            handler,
            directory,
            history,
        }
    }

    /// Handles incoming messages until the stream ends.
    ///
    /// Every message is handled in its own task, so a slow reply or a running
    /// broadcast never holds up other users.
    pub async fn run(self: Arc<Self>, mut messages: MessageStream) {
        info!("Update loop started");

        while let Some(message) = messages.next().await {
            let runtime = Arc::clone(&self);
            tokio::spawn(async move {
                runtime.handle_message(message).await;
            });
        }

        info!("Update loop stopped");
    }

    async fn handle_message(self: Arc<Self>, message: IncomingMessage) {
        let sender = message.sender.telegram_id;

        let result = match self.handler.try_handle(&message).await {
            Ok(Some(result)) => result,
            Ok(None) => return,
            Err(e) => {
                error!("Failed to handle message from {}: {}", sender, e);
                if let Err(reply_err) = self.reply(&message, GENERIC_ERROR_REPLY).await {
                    error!("Failed to send error reply to {}: {}", sender, reply_err);
                }
                self.notify_admins(&e.to_string(), Some(sender)).await;
                return;
            }
        };

        if let Err(e) = self.reply(&message, &result.message).await {
            error!("Failed to reply to {}: {}", sender, e);
            self.notify_admins(&e.to_string(), Some(sender)).await;
        }

        if let Some(CommandAction::Broadcast(request)) = result.action {
            let runtime = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = runtime.run_broadcast(request).await {
                    error!("Broadcast could not start: {}", e);
                    notify::send_best_effort(
                        &runtime.notifier,
                        request.from_chat,
                        &format!("❌ Broadcast failed to start: {e}"),
                    )
                    .await;
                    runtime
                        .notify_admins(&e.to_string(), Some(request.admin_id))
                        .await;
                }
            });
        }
    }

    async fn reply(&self, message: &IncomingMessage, text: &str) -> Result<(), TelegramError> {
        if message.is_private {
            self.notifier.send(message.chat_id, text).await?;
        } else {
            self.bot.send_text(group_peer(message.chat_id), text).await?;
        }
        Ok(())
    }

    /// Runs one broadcast to completion, reporting progress to the admin's chat.
    ///
    /// # Errors
    ///
    /// Fails only if the recipient list cannot be loaded; delivery failures
    /// are part of the returned tally.
    pub async fn run_broadcast(
        &self,
        request: BroadcastRequest,
    ) -> Result<BroadcastTally, DirectoryError> {
        let transport =
            TelegramTransport::new(Arc::clone(&self.bot), self.directory.access_hashes().await);
        let dispatcher = Dispatcher::new(transport).with_pacing(self.settings.pacing());
        let payload = MessageRef {
            from_chat: request.from_chat,
            message_id: request.message_id,
        };

        BroadcastJob::new(self.directory.as_ref(), &self.notifier, &self.history)
            .run(&dispatcher, request, &payload)
            .await
    }

    async fn notify_admins(&self, error: &str, user_id: Option<i64>) {
        notify::notify_admins(&self.notifier, &self.settings.admins, error, user_id).await;
    }
}

impl std::fmt::Debug for BotRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotRuntime")
            .field("handler", &self.handler)
            .finish_non_exhaustive()
    }
}
