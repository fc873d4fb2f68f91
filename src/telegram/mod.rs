//! Telegram client wrapper module.
//!
//! Provides the bot account connection, the broadcast transport and chat
//! notifier over it, and the stream of incoming messages.

mod client;
mod transport;
mod updates;

pub use client::{RawUpdatesReceiver, TelegramBot, TelegramError, group_peer};
pub use transport::{ChatNotifier, MessageRef, TelegramTransport};
pub use updates::MessageStream;
