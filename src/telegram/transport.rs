//! Broadcast transport and chat notifications over Telegram.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use grammers_tl_types as tl;

use super::client::{TelegramBot, TelegramError, user_peer};
use crate::broadcast::{DeliveryError, Transport};
use crate::directory::UserDirectory;
use crate::identity::Identity;
use crate::notify::Notifier;

/// A message to copy to every recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    /// Private chat (user id) the message lives in.
    pub from_chat: i64,

    /// Message id within that chat.
    pub message_id: i32,
}

impl From<TelegramError> for DeliveryError {
    fn from(err: TelegramError) -> Self {
        match err {
            TelegramError::Unreachable(msg) => Self::Unreachable(msg),
            TelegramError::FloodWait(seconds) => {
                warn!("Flood wait during broadcast: {} seconds", seconds);
                Self::Transient(format!("flood wait {seconds}s"))
            }
            TelegramError::Connection(msg) => Self::Transient(msg),
            other => Self::Unclassified(other.to_string()),
        }
    }
}

/// Copies a stored message to users through the bot.
#[derive(Debug)]
pub struct TelegramTransport {
    bot: Arc<TelegramBot>,

    /// Access hashes by user id; unknown users are addressed with 0.
    access_hashes: HashMap<i64, i64>,
}

impl TelegramTransport {
    /// Creates a transport using the known access hashes.
    #[must_use]
    pub fn new(bot: Arc<TelegramBot>, access_hashes: HashMap<i64, i64>) -> Self {
        Self { bot, access_hashes }
    }

    fn access_hash(&self, user_id: i64) -> i64 {
        self.access_hashes.get(&user_id).copied().unwrap_or(0)
    }
}

impl Transport for TelegramTransport {
    type Payload = MessageRef;

    async fn deliver(&self, payload: &MessageRef, recipient: Identity) -> Result<(), DeliveryError> {
        let from = user_peer(payload.from_chat, self.access_hash(payload.from_chat));
        let to = user_peer(recipient.user_id(), self.access_hash(recipient.user_id()));

        self.bot
            .copy_message(from, payload.message_id, to)
            .await
            .map_err(DeliveryError::from)
    }
}

/// Sends text to users' private chats through the bot.
///
/// Users are addressed with the access hash recorded in the directory.
#[derive(Debug, Clone)]
pub struct ChatNotifier {
    bot: Arc<TelegramBot>,
    directory: Arc<UserDirectory>,
}

impl ChatNotifier {
    /// Creates a notifier looking up access hashes in `directory`.
    #[must_use]
    pub fn new(bot: Arc<TelegramBot>, directory: Arc<UserDirectory>) -> Self {
        Self { bot, directory }
    }

    async fn peer(&self, user_id: i64) -> tl::enums::InputPeer {
        let access_hash = self
            .directory
            .get(user_id)
            .await
            .and_then(|u| u.access_hash)
            .unwrap_or(0);
        user_peer(user_id, access_hash)
    }
}

impl Notifier for ChatNotifier {
    type Error = TelegramError;

    async fn send(&self, user_id: i64, text: &str) -> Result<Option<i32>, TelegramError> {
        let peer = self.peer(user_id).await;
        self.bot.send_text(peer, text).await
    }

    async fn edit(&self, user_id: i64, message_id: i32, text: &str) -> Result<(), TelegramError> {
        let peer = self.peer(user_id).await;
        self.bot.edit_text(peer, message_id, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::DeliveryOutcome;

    #[test]
    fn test_telegram_errors_map_to_outcomes() {
        let unreachable: DeliveryError =
            TelegramError::Unreachable("USER_IS_BLOCKED".to_owned()).into();
        assert_eq!(unreachable.outcome(), DeliveryOutcome::RecipientUnreachable);

        let flood: DeliveryError = TelegramError::FloodWait(30).into();
        assert_eq!(flood.outcome(), DeliveryOutcome::TransientFailure);

        let other: DeliveryError =
            TelegramError::Invocation("rpc error 500: INTERNAL".to_owned()).into();
        assert_eq!(other.outcome(), DeliveryOutcome::TransientFailure);

        let legacy: DeliveryError =
            TelegramError::Invocation("Forbidden: bot was blocked by the user".to_owned()).into();
        assert_eq!(legacy.outcome(), DeliveryOutcome::RecipientUnreachable);
    }
}
