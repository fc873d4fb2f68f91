//! User directory and broadcast recipient selection.

mod recipients;
mod users;

pub use recipients::{RecipientMode, RecipientSource};
pub use users::{DirectoryError, UserDirectory, UserProfile, UserRecord, UserStats};
