//! One admin-requested broadcast, from recipient listing to final report.
//!
//! A job runs in these steps:
//! 1. List recipients. If this fails, nothing is sent or recorded
//! 2. Post a status message to the admin (best effort)
//! 3. Record the run as `running` in the history (best effort)
//! 4. Dispatch, editing the status message with progress snapshots
//! 5. Record the final tally and replace the status message with the report,
//!    or send the report as a new message if there is no status message

use tracing::{info, warn};

use super::dispatcher::{Dispatcher, LogProgress, ProgressError, ProgressSink, Transport};
use super::history::{BroadcastHistory, BroadcastRequest};
use super::tally::BroadcastTally;
use crate::directory::RecipientSource;
use crate::notify::{self, Notifier};

/// Progress sink that keeps one status message in the admin's chat up to date.
#[derive(Debug)]
struct StatusMessage<'a, N> {
    notifier: &'a N,
    chat: i64,
    message_id: i32,
}

impl<'a, N: Notifier> StatusMessage<'a, N> {
    const fn new(notifier: &'a N, chat: i64, message_id: i32) -> Self {
        Self {
            notifier,
            chat,
            message_id,
        }
    }
}

impl<N: Notifier> ProgressSink for StatusMessage<'_, N> {
    async fn on_progress(&self, snapshot: &BroadcastTally) -> Result<(), ProgressError> {
        self.notifier
            .edit(self.chat, self.message_id, &render_progress(snapshot))
            .await
            .map_err(|e| ProgressError(e.to_string()))
    }
}

/// Runs broadcasts for admins, reporting to them through a [`Notifier`].
#[derive(Debug)]
pub struct BroadcastJob<'a, S, N> {
    source: &'a S,
    notifier: &'a N,
    history: &'a BroadcastHistory,
}

impl<'a, S: RecipientSource, N: Notifier> BroadcastJob<'a, S, N> {
    /// Creates a job over a recipient source, a notifier and the history log.
    #[must_use]
    pub const fn new(source: &'a S, notifier: &'a N, history: &'a BroadcastHistory) -> Self {
        Self {
            source,
            notifier,
            history,
        }
    }

    /// Runs `request` to completion through `dispatcher`.
    ///
    /// # Errors
    ///
    /// Fails only if the recipient list cannot be loaded. Delivery failures
    /// are part of the returned tally.
    pub async fn run<T: Transport>(
        &self,
        dispatcher: &Dispatcher<T>,
        request: BroadcastRequest,
        payload: &T::Payload,
    ) -> Result<BroadcastTally, S::Error> {
        let recipients = self.source.list_recipients(request.mode).await?;
        info!(
            "Broadcast of message {} requested by {} to {} users ({})",
            request.message_id,
            request.admin_id,
            recipients.len(),
            request.mode
        );

        let status_id =
            notify::send_best_effort(self.notifier, request.from_chat, &render_start(recipients.len()))
                .await;

        let history_id = match self.history.start(request, recipients.len()).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Failed to record broadcast start: {}", e);
                None
            }
        };

        let tally = match status_id {
            Some(message_id) => {
                let sink = StatusMessage::new(self.notifier, request.from_chat, message_id);
                dispatcher.dispatch(&recipients, payload, &sink).await
            }
            None => dispatcher.dispatch(&recipients, payload, &LogProgress).await,
        };

        if let Some(id) = history_id
            && let Err(e) = self.history.complete(id, tally).await
        {
            warn!("Failed to record broadcast #{} result: {}", id, e);
        }

        let report = render_report(&tally);
        let edited = match status_id {
            Some(message_id) => self
                .notifier
                .edit(request.from_chat, message_id, &report)
                .await
                .is_ok(),
            None => false,
        };
        if !edited {
            notify::send_best_effort(self.notifier, request.from_chat, &report).await;
        }

        Ok(tally)
    }
}

fn render_start(total: usize) -> String {
    format!("📢 Broadcast started...\n👥 Total: {total} users\n⏳ Please wait...")
}

fn render_progress(tally: &BroadcastTally) -> String {
    format!(
        "📢 Broadcast in progress...\n\
         ✅ Sent: {}\n\
         ❌ Failed: {}\n\
         🚫 Blocked: {}\n\
         ⏳ {}/{}",
        tally.delivered, tally.transient_failures, tally.unreachable, tally.processed, tally.total
    )
}

fn render_report(tally: &BroadcastTally) -> String {
    format!(
        "✅ Broadcast finished!\n\n\
         👥 Total: {}\n\
         ✅ Sent: {}\n\
         ❌ Failed: {}\n\
         🚫 Blocked: {}",
        tally.total, tally.delivered, tally.transient_failures, tally.unreachable
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::broadcast::{BroadcastStatus, DeliveryError};
    use crate::directory::RecipientMode;
    use crate::identity::Identity;
    use crate::notify::testing::RecordingNotifier;

    const ADMIN: i64 = 1000;

    #[derive(Default)]
    struct ScriptedTransport {
        failures: HashMap<Identity, DeliveryError>,
        attempts: Mutex<Vec<Identity>>,
    }

    impl Transport for ScriptedTransport {
        type Payload = i32;

        async fn deliver(&self, _payload: &i32, recipient: Identity) -> Result<(), DeliveryError> {
            self.attempts.lock().unwrap().push(recipient);
            self.failures.get(&recipient).cloned().map_or(Ok(()), Err)
        }
    }

    struct StaticSource(Vec<Identity>);

    impl RecipientSource for StaticSource {
        type Error = std::io::Error;

        async fn list_recipients(&self, _mode: RecipientMode) -> Result<Vec<Identity>, std::io::Error> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource;

    impl RecipientSource for FailingSource {
        type Error = std::io::Error;

        async fn list_recipients(&self, _mode: RecipientMode) -> Result<Vec<Identity>, std::io::Error> {
            Err(std::io::Error::other("directory unavailable"))
        }
    }

    fn request(mode: RecipientMode) -> BroadcastRequest {
        BroadcastRequest {
            admin_id: ADMIN,
            from_chat: ADMIN,
            message_id: 42,
            mode,
        }
    }

    fn history(dir: &tempfile::TempDir) -> BroadcastHistory {
        BroadcastHistory::load(dir.path().join("broadcasts.json")).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_records_completed_history() {
        let dir = tempfile::tempdir().unwrap();
        let history = history(&dir);
        let notifier = RecordingNotifier::default();
        let source = StaticSource((1..=3).map(Identity).collect());
        let dispatcher = Dispatcher::new(ScriptedTransport {
            failures: [(Identity(2), DeliveryError::Unreachable("USER_IS_BLOCKED".to_owned()))]
                .into_iter()
                .collect(),
            ..ScriptedTransport::default()
        });

        let tally = BroadcastJob::new(&source, &notifier, &history)
            .run(&dispatcher, request(RecipientMode::All), &42)
            .await
            .unwrap();

        assert_eq!(tally.delivered, 2);
        assert_eq!(tally.unreachable, 1);

        let records = history.recent(10).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, BroadcastStatus::Completed);
        assert_eq!(records[0].tally, tally);
        assert!(records[0].completed_at.is_some());

        // Start notice, then the report edited into it.
        let sent = notifier.sent_to(ADMIN);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("Total: 3 users"));
        let edits = notifier.edits.lock().unwrap();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].1, 1);
        assert!(edits[0].2.contains("Broadcast finished"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_failure_sends_and_records_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let history = history(&dir);
        let notifier = RecordingNotifier::default();
        let dispatcher = Dispatcher::new(ScriptedTransport::default());

        let result = BroadcastJob::new(&FailingSource, &notifier, &history)
            .run(&dispatcher, request(RecipientMode::RecentlyActive), &42)
            .await;

        assert!(result.is_err());
        assert!(history.recent(10).await.is_empty());
        assert!(notifier.sent.lock().unwrap().is_empty());
        assert!(dispatcher.transport().attempts.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_edits_status_message() {
        let dir = tempfile::tempdir().unwrap();
        let history = history(&dir);
        let notifier = RecordingNotifier::default();
        let source = StaticSource((1..=150).map(Identity).collect());
        let dispatcher = Dispatcher::new(ScriptedTransport::default());

        BroadcastJob::new(&source, &notifier, &history)
            .run(&dispatcher, request(RecipientMode::All), &42)
            .await
            .unwrap();

        let edits = notifier.edits.lock().unwrap();
        assert_eq!(edits.len(), 2);
        assert!(edits[0].2.contains("100/150"));
        assert!(edits[1].2.contains("Sent: 150"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_sent_without_status_message() {
        let dir = tempfile::tempdir().unwrap();
        let history = history(&dir);
        let notifier = RecordingNotifier {
            no_message_ids: true,
            ..RecordingNotifier::default()
        };
        let source = StaticSource(vec![Identity(1)]);
        let dispatcher = Dispatcher::new(ScriptedTransport::default());

        BroadcastJob::new(&source, &notifier, &history)
            .run(&dispatcher, request(RecipientMode::All), &42)
            .await
            .unwrap();

        let sent = notifier.sent_to(ADMIN);
        assert_eq!(sent.len(), 2);
        assert!(sent[1].contains("Broadcast finished"));
        assert!(notifier.edits.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_admin_does_not_stop_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let history = history(&dir);
        let notifier = RecordingNotifier {
            unreachable: [ADMIN].into_iter().collect(),
            ..RecordingNotifier::default()
        };
        let source = StaticSource((1..=5).map(Identity).collect());
        let dispatcher = Dispatcher::new(ScriptedTransport::default());

        let tally = BroadcastJob::new(&source, &notifier, &history)
            .run(&dispatcher, request(RecipientMode::All), &42)
            .await
            .unwrap();

        assert_eq!(tally.delivered, 5);
        assert_eq!(history.recent(1).await[0].status, BroadcastStatus::Completed);
    }

    #[test]
    fn test_render_progress() {
        let tally = BroadcastTally {
            total: 300,
            processed: 100,
            delivered: 90,
            transient_failures: 4,
            unreachable: 6,
        };
        let text = render_progress(&tally);
        assert!(text.contains("Sent: 90"));
        assert!(text.contains("Blocked: 6"));
        assert!(text.contains("100/300"));
    }

    #[test]
    fn test_render_report() {
        let tally = BroadcastTally {
            total: 3,
            processed: 3,
            delivered: 3,
            ..BroadcastTally::default()
        };
        let text = render_report(&tally);
        assert!(text.contains("Total: 3"));
        assert!(text.contains("Failed: 0"));
    }
}
