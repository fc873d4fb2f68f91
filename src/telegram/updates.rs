//! Conversion of Telegram updates into incoming chat messages.

use grammers_client::peer::Peer;
use grammers_client::update::Update;
use grammers_client::{Client, UpdatesConfiguration};
use grammers_tl_types as tl;
use tracing::{debug, warn};

use super::client::RawUpdatesReceiver;
use crate::commands::IncomingMessage;
use crate::directory::UserProfile;

/// Stream of new private and group messages addressed to the bot.
pub struct MessageStream {
    updates: grammers_client::client::UpdateStream,
}

impl MessageStream {
    /// Starts streaming updates received by `client`, skipping missed ones.
    #[must_use]
    pub fn new(client: &Client, updates: RawUpdatesReceiver) -> Self {
        let updates = client.stream_updates(
            updates,
            UpdatesConfiguration {
                catch_up: false,
                ..Default::default()
            },
        );
        Self { updates }
    }

    /// Waits for the next incoming message. Returns `None` once the stream ends.
    pub async fn next(&mut self) -> Option<IncomingMessage> {
        loop {
            let update = match self.updates.next().await {
                Ok(update) => update,
                Err(e) => {
                    warn!("Update stream closed: {}", e);
                    return None;
                }
            };

            let Update::NewMessage(message) = update else {
                continue;
            };
            let Some(mut incoming) = incoming_from_raw(&message.raw) else {
                debug!("Skipping non-text or outgoing message");
                continue;
            };

            // Telegram sends the sender's user entity along with the update.
            if let Some(Peer::User(user)) = message.sender()
                && let tl::enums::User::User(entity) = &user.raw
                && entity.id == incoming.sender.telegram_id
            {
                incoming.sender = profile_from_user(entity);
            }
            return Some(incoming);
        }
    }
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream").finish_non_exhaustive()
    }
}

/// Builds an incoming message from a raw TL message.
///
/// Outgoing messages, service messages and channel or supergroup posts yield `None`.
fn incoming_from_raw(raw: &tl::enums::Message) -> Option<IncomingMessage> {
    let tl::enums::Message::Message(message) = raw else {
        return None;
    };
    if message.out {
        return None;
    }

    let (chat_id, is_private) = match &message.peer_id {
        tl::enums::Peer::User(user) => (user.user_id, true),
        tl::enums::Peer::Chat(chat) => (chat.chat_id, false),
        tl::enums::Peer::Channel(_) => return None,
    };

    // In private chats with the bot the sender is the chat itself.
    let sender_id = match &message.from_id {
        Some(tl::enums::Peer::User(user)) => user.user_id,
        Some(_) => return None,
        None if is_private => chat_id,
        None => return None,
    };

    let reply_to = match &message.reply_to {
        Some(tl::enums::MessageReplyHeader::Header(header)) => header.reply_to_msg_id,
        _ => None,
    };

    Some(IncomingMessage {
        chat_id,
        is_private,
        sender: UserProfile::new(sender_id),
        message_id: message.id,
        text: message.message.clone(),
        reply_to,
    })
}

fn profile_from_user(user: &tl::types::User) -> UserProfile {
    sender_profile(
        user.id,
        user.access_hash,
        user.username.as_deref(),
        user.first_name.as_deref(),
        user.last_name.as_deref(),
    )
}

/// Builds a sender profile, joining first and last name into the full name.
fn sender_profile(
    telegram_id: i64,
    access_hash: Option<i64>,
    username: Option<&str>,
    first_name: Option<&str>,
    last_name: Option<&str>,
) -> UserProfile {
    let full_name = [first_name, last_name]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    UserProfile {
        telegram_id,
        username: username.filter(|u| !u.is_empty()).map(str::to_owned),
        full_name: (!full_name.is_empty()).then_some(full_name),
        access_hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_profile_fills_known_fields() {
        let profile = sender_profile(
            42,
            Some(-7_788_112_233),
            Some("ada"),
            Some("Ada"),
            Some("Lovelace"),
        );

        assert_eq!(
            profile,
            UserProfile {
                telegram_id: 42,
                username: Some("ada".to_owned()),
                full_name: Some("Ada Lovelace".to_owned()),
                access_hash: Some(-7_788_112_233),
            }
        );
    }

    #[test]
    fn test_sender_profile_without_names() {
        let profile = sender_profile(42, None, Some(""), None, Some("  "));

        assert_eq!(profile, UserProfile::new(42));
    }

    #[test]
    fn test_sender_profile_first_name_only() {
        let profile = sender_profile(42, Some(1), None, Some("Ada"), None);

        assert_eq!(profile.full_name.as_deref(), Some("Ada"));
        assert_eq!(profile.access_hash, Some(1));
    }
}
