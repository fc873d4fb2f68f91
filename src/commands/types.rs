//! Command types and definitions.

use std::fmt;

use crate::broadcast::BroadcastRequest;
use crate::directory::{RecipientMode, UserProfile};

/// A text message received by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Chat the message was posted in.
    pub chat_id: i64,

    /// Whether the chat is a private chat with the sender.
    pub is_private: bool,

    /// Who sent the message.
    pub sender: UserProfile,

    /// Message id within the chat.
    pub message_id: i32,

    /// Message text.
    pub text: String,

    /// Id of the message this one replies to.
    pub reply_to: Option<i32>,
}

/// Available bot commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    /// Greet the user.
    Start,

    /// Show help information.
    Help,

    /// Show user and broadcast statistics (admin).
    Stats,

    /// Ban a user by Telegram id (admin).
    Ban(i64),

    /// Lift a ban (admin).
    Unban(i64),

    /// Broadcast the replied-to message (admin).
    Broadcast(RecipientMode),
}

impl BotCommand {
    /// Parses a command from a message text.
    ///
    /// Returns `None` if the message is not a valid command.
    #[must_use]
    pub fn parse(text: &str, prefix: &str) -> Option<Self> {
        let text = text.trim();

        // Check if message starts with the command prefix
        let after_prefix = text.strip_prefix(prefix)?;

        // Handle commands with arguments
        let (cmd, args) = match after_prefix.split_once(char::is_whitespace) {
            Some((cmd, args)) => (cmd, Some(args.trim())),
            None => (after_prefix, None),
        };

        // Group chats address commands as `/cmd@botname`
        let cmd = cmd.split_once('@').map_or(cmd, |(cmd, _)| cmd).to_lowercase();

        match cmd.as_str() {
            "start" => Some(Self::Start),
            "help" | "h" => Some(Self::Help),
            "stats" | "stat" => Some(Self::Stats),
            "ban" => Self::parse_user_id(args?).map(Self::Ban),
            "unban" => Self::parse_user_id(args?).map(Self::Unban),
            "broadcast" | "bc" => match args.filter(|a| !a.is_empty()) {
                Some(mode) => mode.parse().ok().map(Self::Broadcast),
                None => Some(Self::Broadcast(RecipientMode::All)),
            },
            _ => None,
        }
    }

    fn parse_user_id(args: &str) -> Option<i64> {
        args.split_whitespace().next()?.parse().ok()
    }

    /// Returns whether only admins may run this command.
    #[must_use]
    pub const fn requires_admin(&self) -> bool {
        matches!(
            self,
            Self::Stats | Self::Ban(_) | Self::Unban(_) | Self::Broadcast(_)
        )
    }

    /// Returns the command name as it appears in help.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Help => "help",
            Self::Stats => "stats",
            Self::Ban(_) => "ban",
            Self::Unban(_) => "unban",
            Self::Broadcast(_) => "broadcast",
        }
    }

    /// Returns all available commands with their descriptions.
    #[must_use]
    pub fn all_commands() -> Vec<(&'static str, bool, &'static str)> {
        vec![
            ("start", false, "Start the bot"),
            ("help", false, "Show this help message"),
            ("stats", true, "Show user and broadcast statistics"),
            ("ban <user_id>", true, "Ban a user"),
            ("unban <user_id>", true, "Unban a user"),
            (
                "broadcast [all|active]",
                true,
                "Broadcast the replied-to message",
            ),
        ]
    }
}

impl fmt::Display for BotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ban(id) => write!(f, "ban {id}"),
            Self::Unban(id) => write!(f, "unban {id}"),
            Self::Broadcast(mode) => write!(f, "broadcast {mode}"),
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// Follow-up work requested by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    /// Start a broadcast in the background.
    Broadcast(BroadcastRequest),
}

/// Result of command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Whether the command was successful.
    pub success: bool,

    /// Response message to show the user.
    pub message: String,

    /// Work to start after replying.
    pub action: Option<CommandAction>,
}

impl CommandResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            action: None,
        }
    }

    /// Creates a successful result that starts follow-up work.
    #[must_use]
    pub fn success_with_action(message: impl Into<String>, action: CommandAction) -> Self {
        Self {
            success: true,
            message: message.into(),
            action: Some(action),
        }
    }

    /// Creates an error result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            action: None,
        }
    }
}
