//! Command handling module.
//!
//! Processes messages sent to the bot: throttling, user bookkeeping and
//! `/`-prefixed commands.

mod handler;
mod types;

pub use handler::{CommandError, CommandHandler};
pub use types::{BotCommand, CommandAction, CommandResult, IncomingMessage};
