//! Record Store: persistence for users, listings, offers and sessions.
//!
//! Two interchangeable backends implement [`RecordStore`]: [`SqliteStore`]
//! (indexed document tables queried with native operators) and
//! [`JsonFileStore`] (one JSON file per collection, rewritten atomically on
//! every mutation). Callers only ever see the trait; [`open`] picks the
//! backend from configuration.

mod file;
mod sqlite;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{Config, StoreBackend};
use crate::db::models::{Listing, Offer, Session, User, UserPatch};
use crate::listing::input::ListingPatch;
use crate::listing::normalize::NormalizeError;
use crate::listing::query::ListingFilter;

pub use self::file::JsonFileStore;
pub use self::sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(#[from] NormalizeError),

    #[error("Background task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),

    #[error("Conflict: {0}")]
    Conflict(String),
}

pub const EMAIL_IN_USE: &str = "Email already in use";

/// Persistence contract shared by both backends.
///
/// Inserts assign a fresh id (sessions are keyed by their token instead).
/// Scans return records newest first; records with equal timestamps keep
/// insertion order. Listings come back already normalized.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError>;

    /// `email` must already be lower-cased.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    /// Fails with [`StoreError::Conflict`] if the email is taken.
    async fn insert_user(&self, user: User) -> Result<User, StoreError>;

    /// Fails with [`StoreError::Conflict`] if the new email belongs to another user.
    async fn update_user(&self, id: &str, patch: UserPatch) -> Result<Option<User>, StoreError>;

    async fn delete_user(&self, id: &str) -> Result<Option<User>, StoreError>;

    async fn get_listing(&self, id: &str) -> Result<Option<Listing>, StoreError>;

    async fn scan_listings(&self, filter: &ListingFilter) -> Result<Vec<Listing>, StoreError>;

    async fn insert_listing(&self, listing: Listing) -> Result<Listing, StoreError>;

    /// Read-modify-write of one listing, serialized against other writers.
    async fn update_listing(
        &self,
        id: &str,
        patch: &ListingPatch,
    ) -> Result<Option<Listing>, StoreError>;

    async fn delete_listing(&self, id: &str) -> Result<Option<Listing>, StoreError>;

    async fn insert_offer(&self, offer: Offer) -> Result<Offer, StoreError>;

    async fn scan_offers(&self, listing_id: &str) -> Result<Vec<Offer>, StoreError>;

    /// Returns how many offers were removed.
    async fn delete_offers_for_listing(&self, listing_id: &str) -> Result<usize, StoreError>;

    /// Also drops every session that expired before this one was created.
    async fn insert_session(&self, session: Session) -> Result<Session, StoreError>;

    async fn get_session(&self, token: &str) -> Result<Option<Session>, StoreError>;

    async fn delete_session(&self, token: &str) -> Result<bool, StoreError>;

    async fn delete_sessions_for_user(&self, user_id: &str) -> Result<usize, StoreError>;
}

pub type SharedStore = Arc<dyn RecordStore>;

/// Opens the configured backend. Any failure here is fatal at startup.
pub async fn open(config: &Config) -> anyhow::Result<SharedStore> {
    let store: SharedStore = match config.database.backend {
        StoreBackend::Sqlite => Arc::new(SqliteStore::open(config.db_path())?),
        StoreBackend::File => Arc::new(JsonFileStore::open(config.data_path()).await?),
    };
    tracing::info!("Record store ready ({} backend)", store.backend());
    Ok(store)
}

pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Current time in the one timestamp format every record uses. Fixed
/// millisecond precision keeps lexical and chronological order identical.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
