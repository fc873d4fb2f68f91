//! Best-effort text messages to users' private chats.
//!
//! Status messages, broadcast reports and error reports all go through a
//! [`Notifier`]. None of them may stop the work they describe, so the helpers
//! here log failures and carry on.

use std::future::Future;

use tracing::debug;

/// Number of admins notified about failures.
pub const NOTIFIED_ADMINS: usize = 3;

/// Generic reply for a user whose message could not be handled.
pub const GENERIC_ERROR_REPLY: &str = "⚠️ Something went wrong. Please try again later.";

/// Sends and edits text messages in private chats.
pub trait Notifier: Send + Sync {
    /// Error returned when a message cannot be sent or edited.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends `text` to the private chat with `user_id`.
    ///
    /// Returns the id of the sent message when it is known.
    fn send(
        &self,
        user_id: i64,
        text: &str,
    ) -> impl Future<Output = Result<Option<i32>, Self::Error>> + Send;

    /// Replaces the text of a message sent earlier to `user_id`.
    fn edit(
        &self,
        user_id: i64,
        message_id: i32,
        text: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Sends a message, logging and swallowing any failure.
pub async fn send_best_effort<N: Notifier>(notifier: &N, user_id: i64, text: &str) -> Option<i32> {
    match notifier.send(user_id, text).await {
        Ok(message_id) => message_id,
        Err(e) => {
            debug!("Best-effort message to {} failed: {}", user_id, e);
            None
        }
    }
}

/// Reports an error to the first [`NOTIFIED_ADMINS`] admins.
pub async fn notify_admins<N: Notifier>(
    notifier: &N,
    admins: &[i64],
    error: &str,
    user_id: Option<i64>,
) {
    let mut text = format!("🚨 Bot error!\n\nError: {}", truncate(error, 500));
    if let Some(user_id) = user_id {
        text.push_str(&format!("\nUser: {user_id}"));
    }

    for &admin in admins.iter().take(NOTIFIED_ADMINS) {
        send_best_effort(notifier, admin, &text).await;
    }
}

/// Truncates a string to a maximum length, adding "..." if truncated.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    }
}
