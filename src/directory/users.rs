//! JSON-file backed user directory.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{RecipientMode, RecipientSource};
use crate::identity::Identity;
use crate::persist;

/// Errors that can occur while reading or writing the directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Failed to access user directory file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse user directory file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A user known to the bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Telegram user id.
    pub telegram_id: i64,

    /// Telegram username, without `@`.
    #[serde(default)]
    pub username: Option<String>,

    /// Display name.
    #[serde(default)]
    pub full_name: Option<String>,

    /// Access hash needed to address the user over `MTProto`.
    #[serde(default)]
    pub access_hash: Option<i64>,

    /// Banned users receive no broadcasts and are ignored in chat.
    #[serde(default)]
    pub is_banned: bool,

    /// First time the user talked to the bot.
    pub joined_at: DateTime<Utc>,

    /// Last time the user talked to the bot.
    pub last_active: DateTime<Utc>,
}

/// Profile details seen on an incoming message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub access_hash: Option<i64>,
}

impl UserProfile {
    /// Creates a profile carrying only the user id.
    #[must_use]
    pub fn new(telegram_id: i64) -> Self {
        Self {
            telegram_id,
            ..Self::default()
        }
    }
}

/// Aggregate user counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserStats {
    pub total: usize,
    pub active_week: usize,
    pub joined_today: usize,
    pub banned: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DirectoryFile {
    users: Vec<UserRecord>,
}

/// User directory persisted to a JSON file after every change.
#[derive(Debug)]
pub struct UserDirectory {
    /// Users keyed by Telegram id.
    users: RwLock<BTreeMap<i64, UserRecord>>,

    /// File the directory is saved to.
    path: PathBuf,

    /// Trailing window for `RecipientMode::RecentlyActive`.
    active_window: TimeDelta,
}

impl UserDirectory {
    /// Default trailing window for recently active users.
    pub const DEFAULT_ACTIVE_WINDOW_DAYS: i64 = 30;

    /// Loads the directory from `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let path = path.as_ref().to_path_buf();

        let file = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            debug!("User directory {} not found, starting empty", path.display());
            DirectoryFile::default()
        };

        let users: BTreeMap<i64, UserRecord> = file
            .users
            .into_iter()
            .map(|u| (u.telegram_id, u))
            .collect();

        info!("Loaded {} users from {}", users.len(), path.display());

        Ok(Self {
            users: RwLock::new(users),
            path,
            active_window: TimeDelta::days(Self::DEFAULT_ACTIVE_WINDOW_DAYS),
        })
    }

    /// Sets the trailing window used for recently active users.
    #[must_use]
    pub fn with_active_window_days(mut self, days: i64) -> Self {
        self.active_window = TimeDelta::days(days);
        self
    }

    /// Records activity of a user, creating the record on first contact.
    ///
    /// Returns `true` if the user is new.
    pub async fn touch(&self, profile: UserProfile) -> Result<bool, DirectoryError> {
        self.touch_at(profile, Utc::now()).await
    }

    async fn touch_at(
        &self,
        profile: UserProfile,
        now: DateTime<Utc>,
    ) -> Result<bool, DirectoryError> {
        let mut users = self.users.write().await;

        let is_new = match users.get_mut(&profile.telegram_id) {
            Some(user) => {
                user.last_active = now;
                if profile.username.is_some() {
                    user.username = profile.username;
                }
                if profile.full_name.is_some() {
                    user.full_name = profile.full_name;
                }
                if profile.access_hash.is_some() {
                    user.access_hash = profile.access_hash;
                }
                false
            }
            None => {
                users.insert(
                    profile.telegram_id,
                    UserRecord {
                        telegram_id: profile.telegram_id,
                        username: profile.username,
                        full_name: profile.full_name,
                        access_hash: profile.access_hash,
                        is_banned: false,
                        joined_at: now,
                        last_active: now,
                    },
                );
                true
            }
        };

        self.save(&users)?;
        Ok(is_new)
    }

    /// Looks up a user by id.
    pub async fn get(&self, telegram_id: i64) -> Option<UserRecord> {
        self.users.read().await.get(&telegram_id).cloned()
    }

    /// Bans a known user. Returns `false` if the user does not exist.
    pub async fn ban(&self, telegram_id: i64) -> Result<bool, DirectoryError> {
        self.set_banned(telegram_id, true).await
    }

    /// Lifts a ban. Returns `false` if the user does not exist.
    pub async fn unban(&self, telegram_id: i64) -> Result<bool, DirectoryError> {
        self.set_banned(telegram_id, false).await
    }

    async fn set_banned(&self, telegram_id: i64, banned: bool) -> Result<bool, DirectoryError> {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(&telegram_id) else {
            return Ok(false);
        };

        user.is_banned = banned;
        self.save(&users)?;
        info!("User {} banned: {}", telegram_id, banned);
        Ok(true)
    }

    /// Checks whether a user is banned. Unknown users are not banned.
    pub async fn is_banned(&self, telegram_id: i64) -> bool {
        self.users
            .read()
            .await
            .get(&telegram_id)
            .is_some_and(|u| u.is_banned)
    }

    /// Returns aggregate user counts.
    pub async fn stats(&self) -> UserStats {
        self.stats_at(Utc::now()).await
    }

    async fn stats_at(&self, now: DateTime<Utc>) -> UserStats {
        let users = self.users.read().await;
        let week_ago = now - TimeDelta::days(7);
        let today = now.date_naive();

        users.values().fold(UserStats::default(), |mut stats, u| {
            stats.total += 1;
            if u.last_active >= week_ago {
                stats.active_week += 1;
            }
            if u.joined_at.date_naive() == today {
                stats.joined_today += 1;
            }
            if u.is_banned {
                stats.banned += 1;
            }
            stats
        })
    }

    /// Returns the known access hashes keyed by user id.
    pub async fn access_hashes(&self) -> HashMap<i64, i64> {
        self.users
            .read()
            .await
            .values()
            .filter_map(|u| u.access_hash.map(|hash| (u.telegram_id, hash)))
            .collect()
    }

    async fn recipients_at(&self, mode: RecipientMode, now: DateTime<Utc>) -> Vec<Identity> {
        let since = now - self.active_window;

        self.users
            .read()
            .await
            .values()
            .filter(|u| !u.is_banned)
            .filter(|u| match mode {
                RecipientMode::All => true,
                RecipientMode::RecentlyActive => u.last_active >= since,
            })
            .map(|u| Identity(u.telegram_id))
            .collect()
    }

    fn save(&self, users: &BTreeMap<i64, UserRecord>) -> Result<(), DirectoryError> {
        let file = DirectoryFile {
            users: users.values().cloned().collect(),
        };
        persist::write_json_atomic(&self.path, &file)?;
        Ok(())
    }
}

impl RecipientSource for UserDirectory {
    type Error = DirectoryError;

    async fn list_recipients(&self, mode: RecipientMode) -> Result<Vec<Identity>, DirectoryError> {
        Ok(self.recipients_at(mode, Utc::now()).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory(dir: &tempfile::TempDir) -> UserDirectory {
        UserDirectory::load(dir.path().join("users.json")).unwrap()
    }

    #[tokio::test]
    async fn test_touch_creates_then_updates() {
        let dir = tempfile::tempdir().unwrap();
        let users = directory(&dir);

        let profile = UserProfile {
            username: Some("alice".to_owned()),
            ..UserProfile::new(1)
        };
        assert!(users.touch(profile).await.unwrap());
        assert!(!users.touch(UserProfile::new(1)).await.unwrap());

        let record = users.get(1).await.unwrap();
        assert_eq!(record.username.as_deref(), Some("alice"));
        assert!(record.last_active >= record.joined_at);
    }

    #[tokio::test]
    async fn test_directory_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        {
            let users = directory(&dir);
            users.touch(UserProfile::new(7)).await.unwrap();
            users.ban(7).await.unwrap();
        }

        let reloaded = directory(&dir);
        assert!(reloaded.is_banned(7).await);
    }

    #[tokio::test]
    async fn test_ban_unknown_user() {
        let dir = tempfile::tempdir().unwrap();
        let users = directory(&dir);
        assert!(!users.ban(99).await.unwrap());
        assert!(!users.is_banned(99).await);
    }

    #[tokio::test]
    async fn test_recipients_exclude_banned() {
        let dir = tempfile::tempdir().unwrap();
        let users = directory(&dir);
        for id in [3, 1, 2] {
            users.touch(UserProfile::new(id)).await.unwrap();
        }
        users.ban(2).await.unwrap();

        let all = users.list_recipients(RecipientMode::All).await.unwrap();
        assert_eq!(all, vec![Identity(1), Identity(3)]);

        users.unban(2).await.unwrap();
        let all = users.list_recipients(RecipientMode::All).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_recently_active_uses_trailing_window() {
        let dir = tempfile::tempdir().unwrap();
        let users = directory(&dir);
        let now = Utc::now();

        users
            .touch_at(UserProfile::new(1), now - TimeDelta::days(45))
            .await
            .unwrap();
        users
            .touch_at(UserProfile::new(2), now - TimeDelta::days(29))
            .await
            .unwrap();
        users.touch_at(UserProfile::new(3), now).await.unwrap();
        users.ban(3).await.unwrap();

        let active = users.recipients_at(RecipientMode::RecentlyActive, now).await;
        assert_eq!(active, vec![Identity(2)]);

        let all = users.recipients_at(RecipientMode::All, now).await;
        assert_eq!(all, vec![Identity(1), Identity(2)]);
    }

    #[tokio::test]
    async fn test_custom_active_window() {
        let dir = tempfile::tempdir().unwrap();
        let users = directory(&dir).with_active_window_days(7);
        let now = Utc::now();

        users
            .touch_at(UserProfile::new(1), now - TimeDelta::days(10))
            .await
            .unwrap();

        assert!(users.recipients_at(RecipientMode::RecentlyActive, now).await.is_empty());
    }

    #[tokio::test]
    async fn test_stats() {
        let dir = tempfile::tempdir().unwrap();
        let users = directory(&dir);
        let now = Utc::now();

        users
            .touch_at(UserProfile::new(1), now - TimeDelta::days(20))
            .await
            .unwrap();
        users.touch_at(UserProfile::new(2), now).await.unwrap();
        users.ban(1).await.unwrap();

        let stats = users.stats_at(now).await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active_week, 1);
        assert_eq!(stats.joined_today, 1);
        assert_eq!(stats.banned, 1);
    }

    #[tokio::test]
    async fn test_access_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let users = directory(&dir);
        users
            .touch(UserProfile {
                access_hash: Some(555),
                ..UserProfile::new(1)
            })
            .await
            .unwrap();
        users.touch(UserProfile::new(2)).await.unwrap();

        let hashes = users.access_hashes().await;
        assert_eq!(hashes.len(), 1);
        assert_eq!(hashes.get(&1), Some(&555));
    }

    #[test]
    fn test_load_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            UserDirectory::load(&path),
            Err(DirectoryError::Parse(_))
        ));
    }
}
