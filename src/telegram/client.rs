//! Telegram client wrapper for the bot account.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use grammers_client::{Client, InvocationError, SenderPool, sender};
use grammers_session::storages::SqliteSession;
use grammers_tl_types as tl;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TelegramConfig;

/// Receiver of raw updates produced by the sender pool.
pub type RawUpdatesReceiver =
    tokio::sync::mpsc::UnboundedReceiver<grammers_session::updates::UpdatesLike>;

/// RPC errors meaning the recipient will never accept messages from the bot.
const UNREACHABLE_RPC_ERRORS: [&str; 4] = [
    "USER_IS_BLOCKED",
    "USER_DEACTIVATED",
    "USER_DEACTIVATED_BAN",
    "INPUT_USER_DEACTIVATED",
];

/// Errors that can occur during Telegram operations.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Sign in failed: {0}")]
    SignInFailed(String),

    #[error("Recipient unreachable: {0}")]
    Unreachable(String),

    #[error("Flood wait required: {0} seconds")]
    FloodWait(u32),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("API invocation error: {0}")]
    Invocation(String),
}

impl From<InvocationError> for TelegramError {
    fn from(err: InvocationError) -> Self {
        let err_str = err.to_string();

        if UNREACHABLE_RPC_ERRORS
            .iter()
            .any(|name| err_str.contains(name))
        {
            return Self::Unreachable(err_str);
        }

        // Check for flood wait errors
        if (err_str.contains("FLOOD_WAIT") || err_str.contains("flood"))
            && let Some(seconds) = extract_flood_wait_seconds(&err_str)
        {
            return Self::FloodWait(seconds);
        }

        Self::Invocation(err_str)
    }
}

/// Extracts flood wait seconds from an error message.
fn extract_flood_wait_seconds(err_msg: &str) -> Option<u32> {
    let patterns = ["FLOOD_WAIT_", "flood wait "];
    let lower = err_msg.to_lowercase();

    for pattern in patterns {
        if let Some(idx) = lower.find(&pattern.to_lowercase()) {
            let start = idx + pattern.len();
            let num_str: String = lower[start..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            if let Ok(seconds) = num_str.parse() {
                return Some(seconds);
            }
        }
    }
    None
}

/// Builds the input peer of a private chat with a user.
#[must_use]
pub fn user_peer(user_id: i64, access_hash: i64) -> tl::enums::InputPeer {
    tl::enums::InputPeer::User(tl::types::InputPeerUser {
        user_id,
        access_hash,
    })
}

/// Builds the input peer of a basic group chat.
#[must_use]
pub fn group_peer(chat_id: i64) -> tl::enums::InputPeer {
    tl::enums::InputPeer::Chat(tl::types::InputPeerChat { chat_id })
}

/// High-level Telegram client wrapper for a bot account.
pub struct TelegramBot {
    /// The underlying grammers client.
    client: Client,

    /// Handle to the sender pool for disconnection.
    handle: sender::SenderPoolHandle,

    /// Updates not yet claimed by an update loop.
    updates: Mutex<Option<RawUpdatesReceiver>>,

    /// Source of `random_id` values for sent messages.
    random_ids: AtomicI64,

    /// Background task running the sender pool.
    _pool_task: JoinHandle<()>,
}

impl TelegramBot {
    /// Connects to Telegram with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if connection fails.
    pub async fn connect(config: &TelegramConfig) -> Result<Self, TelegramError> {
        info!("Connecting to Telegram...");

        let session = Arc::new(
            SqliteSession::open(&config.session_path)
                .await
                .map_err(|e| TelegramError::Session(e.to_string()))?,
        );

        let SenderPool {
            runner,
            updates,
            handle,
        } = SenderPool::new(Arc::clone(&session), config.api_id);

        let client = Client::new(handle.clone());

        // Spawn the sender pool runner
        let pool_task = tokio::spawn(async move {
            runner.run().await;
        });

        let is_authorized = client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::Connection(e.to_string()))?;

        info!("Connected to Telegram. Authorized: {}", is_authorized);

        Ok(Self {
            client,
            handle: handle.thin,
            updates: Mutex::new(Some(updates)),
            random_ids: AtomicI64::new(seed_random_id()),
            _pool_task: pool_task,
        })
    }

    /// Checks if the client is authorized.
    ///
    /// # Errors
    ///
    /// Returns an error if the check fails.
    pub async fn is_authorized(&self) -> Result<bool, TelegramError> {
        self.client
            .is_authorized()
            .await
            .map_err(|e| TelegramError::Connection(e.to_string()))
    }

    /// Signs in with a bot token unless the session is already authorized.
    ///
    /// # Errors
    ///
    /// Returns an error if sign in fails.
    pub async fn ensure_bot_signed_in(
        &self,
        bot_token: &str,
        api_hash: &str,
    ) -> Result<(), TelegramError> {
        if self.is_authorized().await? {
            debug!("Session already authorized");
            return Ok(());
        }

        info!("Signing in as bot {}...", mask_token(bot_token));
        self.client
            .bot_sign_in(bot_token, api_hash)
            .await
            .map_err(|e| TelegramError::SignInFailed(e.to_string()))?;

        info!("Successfully signed in!");
        Ok(())
    }

    /// Takes the raw updates receiver. Returns `None` after the first call.
    pub async fn take_updates(&self) -> Option<RawUpdatesReceiver> {
        self.updates.lock().await.take()
    }

    /// Copies a message into another chat without the forward header.
    ///
    /// # Errors
    ///
    /// Returns [`TelegramError::Unreachable`] if the recipient blocked the bot
    /// or is deactivated, and other variants for any other failure.
    pub async fn copy_message(
        &self,
        from_peer: tl::enums::InputPeer,
        message_id: i32,
        to_peer: tl::enums::InputPeer,
    ) -> Result<(), TelegramError> {
        let request = tl::functions::messages::ForwardMessages {
            silent: false,
            background: false,
            with_my_score: false,
            drop_author: true,
            drop_media_captions: false,
            noforwards: false,
            allow_paid_floodskip: false,
            from_peer,
            id: vec![message_id],
            random_id: vec![self.next_random_id()],
            to_peer,
            top_msg_id: None,
            reply_to: None,
            schedule_date: None,
            send_as: None,
            quick_reply_shortcut: None,
            video_timestamp: None,
            allow_paid_stars: None,
            suggested_post: None,
        };

        self.client.invoke(&request).await?;
        Ok(())
    }

    /// Sends a text message and returns its id when Telegram reports it.
    ///
    /// # Errors
    ///
    /// Returns an error if sending fails.
    pub async fn send_text(
        &self,
        peer: tl::enums::InputPeer,
        text: &str,
    ) -> Result<Option<i32>, TelegramError> {
        debug!("Sending message: \"{}\"", truncate_for_log(text, 30));

        let request = tl::functions::messages::SendMessage {
            no_webpage: true,
            silent: false,
            background: false,
            clear_draft: false,
            noforwards: false,
            update_stickersets_order: false,
            invert_media: false,
            allow_paid_floodskip: false,
            peer,
            reply_to: None,
            message: text.to_owned(),
            random_id: self.next_random_id(),
            reply_markup: None,
            entities: None,
            schedule_date: None,
            send_as: None,
            quick_reply_shortcut: None,
            effect: None,
            allow_paid_stars: None,
            suggested_post: None,
        };

        let updates = self.client.invoke(&request).await?;
        Ok(sent_message_id(&updates))
    }

    /// Replaces the text of a message sent by the bot.
    ///
    /// # Errors
    ///
    /// Returns an error if the message no longer exists or editing fails.
    pub async fn edit_text(
        &self,
        peer: tl::enums::InputPeer,
        message_id: i32,
        text: &str,
    ) -> Result<(), TelegramError> {
        let request = tl::functions::messages::EditMessage {
            no_webpage: true,
            invert_media: false,
            peer,
            id: message_id,
            message: Some(text.to_owned()),
            media: None,
            reply_markup: None,
            entities: None,
            schedule_date: None,
            quick_reply_shortcut_id: None,
        };

        self.client.invoke(&request).await?;
        Ok(())
    }

    /// Returns a reference to the underlying client for advanced operations.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Disconnects from Telegram.
    pub fn disconnect(&self) {
        info!("Disconnecting from Telegram...");
        self.handle.quit();
    }

    fn next_random_id(&self) -> i64 {
        self.random_ids.fetch_add(1, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBot").finish_non_exhaustive()
    }
}

/// Picks a starting point for `random_id` values from the clock.
fn seed_random_id() -> i64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    #[allow(clippy::cast_possible_truncation)]
    let seed = nanos as i64;
    seed
}

/// Finds the id of the message created by a send request.
fn sent_message_id(updates: &tl::enums::Updates) -> Option<i32> {
    match updates {
        tl::enums::Updates::UpdateShortSentMessage(sent) => Some(sent.id),
        tl::enums::Updates::Updates(tl::types::Updates { updates, .. })
        | tl::enums::Updates::Combined(tl::types::UpdatesCombined { updates, .. }) => {
            updates.iter().find_map(|update| match update {
                tl::enums::Update::MessageId(tl::types::UpdateMessageId { id, .. }) => Some(*id),
                _ => None,
            })
        }
        other => {
            warn!("No message id in send response: {:?}", other);
            None
        }
    }
}

/// Masks a bot token for logging (keeps the bot id part only).
fn mask_token(token: &str) -> String {
    match token.split_once(':') {
        Some((bot_id, _)) => format!("{bot_id}:***"),
        None => "***".to_owned(),
    }
}

/// Truncates a string for logging purposes.
fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    }
}
