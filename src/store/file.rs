use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use super::{new_id, RecordStore, StoreError, EMAIL_IN_USE};
use crate::db::models::{Listing, Offer, Session, User, UserPatch};
use crate::listing::input::ListingPatch;
use crate::listing::normalize::{normalize, ListingRecord};
use crate::listing::query::{sort_newest_first, ListingFilter};

/// One JSON array on disk.
///
/// Mutations hold the write half of the lock for the whole
/// read-modify-write cycle, so two writers never interleave on the same
/// file. The new contents go to a sibling temp file that is then renamed
/// over the original; readers see either the old or the new array.
struct Collection<T> {
    path: PathBuf,
    lock: RwLock<()>,
    _records: PhantomData<fn() -> T>,
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned,
{
    fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(format!("{name}.json")),
            lock: RwLock::new(()),
            _records: PhantomData,
        }
    }

    /// Seeds an empty array if the file does not exist yet.
    async fn ensure(&self) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        if !tokio::fs::try_exists(&self.path).await? {
            tracing::info!("Creating {}", self.path.display());
            self.write_all(&[]).await?;
        }
        Ok(())
    }

    async fn read(&self) -> Result<Vec<T>, StoreError> {
        let _guard = self.lock.read().await;
        self.load().await
    }

    /// Runs `f` over the records under the write lock. `f` reports whether it
    /// changed anything; the file is only rewritten if it did.
    async fn mutate<R, F>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Vec<T>) -> Result<(R, bool), StoreError>,
    {
        let _guard = self.lock.write().await;
        let mut records = self.load().await?;
        let (result, changed) = f(&mut records)?;
        if changed {
            self.write_all(&records).await?;
        }
        Ok(result)
    }

    async fn load(&self) -> Result<Vec<T>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        decode_collection(&bytes)
    }

    async fn write_all(&self, records: &[T]) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Accepts the canonical flat array and the legacy layout keyed by parent
/// id (`{"<listingId>": [...]}`), which is flattened in key order.
fn decode_collection<T: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<T>, StoreError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    match serde_json::from_slice::<Value>(bytes)? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(StoreError::from))
            .collect(),
        Value::Object(groups) => groups
            .into_iter()
            .flat_map(|(_, group)| match group {
                Value::Array(items) => items,
                other => vec![other],
            })
            .map(|item| serde_json::from_value(item).map_err(StoreError::from))
            .collect(),
        Value::Null => Ok(Vec::new()),
        other => Err(StoreError::Serialization(serde::de::Error::custom(format!(
            "expected a JSON array, found {other}"
        )))),
    }
}

/// Listings are kept on disk as raw JSON values so that one record of the
/// wrong shape neither hides the others nor gets dropped by a rewrite.
fn record_id(value: &Value) -> Option<&str> {
    value
        .get("id")
        .or_else(|| value.get("_id"))
        .and_then(Value::as_str)
}

fn decode_listing(value: Value) -> Result<Listing, StoreError> {
    let record: ListingRecord = serde_json::from_value(value)?;
    Ok(normalize(record)?)
}

fn encode_listing(listing: &Listing) -> Result<Value, StoreError> {
    Ok(serde_json::to_value(ListingRecord::from(listing))?)
}

fn readable_listings(values: Vec<Value>) -> Vec<Listing> {
    values
        .into_iter()
        .filter_map(|value| match decode_listing(value) {
            Ok(listing) => Some(listing),
            Err(e) => {
                tracing::warn!("Skipping unreadable listing record: {}", e);
                None
            }
        })
        .collect()
}

/// Flat-file backend: `users.json`, `listings.json`, `offers.json` and
/// `sessions.json` under one data directory.
pub struct JsonFileStore {
    dir: PathBuf,
    users: Collection<User>,
    listings: Collection<Value>,
    offers: Collection<Offer>,
    sessions: Collection<Session>,
}

impl JsonFileStore {
    /// Creates the directory and any missing collection files.
    pub async fn open(dir: &Path) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(dir).await?;
        let store = Self {
            dir: dir.to_path_buf(),
            users: Collection::new(dir, "users"),
            listings: Collection::new(dir, "listings"),
            offers: Collection::new(dir, "offers"),
            sessions: Collection::new(dir, "sessions"),
        };
        store.users.ensure().await?;
        store.listings.ensure().await?;
        store.offers.ensure().await?;
        store.sessions.ensure().await?;
        tracing::debug!("Flat-file store at {}", store.dir.display());
        Ok(store)
    }
}

#[async_trait]
impl RecordStore for JsonFileStore {
    fn backend(&self) -> &'static str {
        "file"
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await?;
        Ok(users.into_iter().find(|u| u.id == id))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await?;
        Ok(users.into_iter().find(|u| u.email == email))
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        self.users.read().await
    }

    async fn insert_user(&self, mut user: User) -> Result<User, StoreError> {
        user.id = new_id();
        self.users
            .mutate(|users| {
                if users.iter().any(|u| u.email == user.email) {
                    return Err(StoreError::Conflict(EMAIL_IN_USE.to_string()));
                }
                users.push(user.clone());
                Ok((user, true))
            })
            .await
    }

    async fn update_user(&self, id: &str, patch: UserPatch) -> Result<Option<User>, StoreError> {
        self.users
            .mutate(|users| {
                if let Some(email) = &patch.email {
                    if users.iter().any(|u| &u.email == email && u.id != id) {
                        return Err(StoreError::Conflict(EMAIL_IN_USE.to_string()));
                    }
                }
                let Some(user) = users.iter_mut().find(|u| u.id == id) else {
                    return Ok((None, false));
                };
                if let Some(name) = patch.name {
                    user.name = name;
                }
                if let Some(email) = patch.email {
                    user.email = email;
                }
                if let Some(hash) = patch.password_hash {
                    user.password_hash = hash;
                }
                Ok((Some(user.clone()), true))
            })
            .await
    }

    async fn delete_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        self.users
            .mutate(|users| match users.iter().position(|u| u.id == id) {
                Some(index) => Ok((Some(users.remove(index)), true)),
                None => Ok((None, false)),
            })
            .await
    }

    async fn get_listing(&self, id: &str) -> Result<Option<Listing>, StoreError> {
        let values = self.listings.read().await?;
        match values.into_iter().find(|v| record_id(v) == Some(id)) {
            Some(value) => Ok(Some(decode_listing(value)?)),
            None => Ok(None),
        }
    }

    async fn scan_listings(&self, filter: &ListingFilter) -> Result<Vec<Listing>, StoreError> {
        let values = self.listings.read().await?;
        let mut listings: Vec<Listing> = readable_listings(values)
            .into_iter()
            .filter(|listing| filter.matches(listing))
            .collect();
        sort_newest_first(&mut listings, |l| l.created_at.as_str());
        Ok(listings)
    }

    async fn insert_listing(&self, mut listing: Listing) -> Result<Listing, StoreError> {
        listing.id = new_id();
        let value = encode_listing(&listing)?;
        self.listings
            .mutate(|values| {
                values.push(value);
                Ok((listing, true))
            })
            .await
    }

    async fn update_listing(
        &self,
        id: &str,
        patch: &ListingPatch,
    ) -> Result<Option<Listing>, StoreError> {
        self.listings
            .mutate(|values| {
                let Some(value) = values.iter_mut().find(|v| record_id(v) == Some(id)) else {
                    return Ok((None, false));
                };
                let mut listing = decode_listing(value.clone())?;
                patch.apply(&mut listing);
                *value = encode_listing(&listing)?;
                Ok((Some(listing), true))
            })
            .await
    }

    async fn delete_listing(&self, id: &str) -> Result<Option<Listing>, StoreError> {
        self.listings
            .mutate(
                |values| match values.iter().position(|v| record_id(v) == Some(id)) {
                    Some(index) => {
                        let listing = decode_listing(values[index].clone())?;
                        values.remove(index);
                        Ok((Some(listing), true))
                    }
                    None => Ok((None, false)),
                },
            )
            .await
    }

    async fn insert_offer(&self, mut offer: Offer) -> Result<Offer, StoreError> {
        offer.id = new_id();
        self.offers
            .mutate(|offers| {
                offers.push(offer.clone());
                Ok((offer, true))
            })
            .await
    }

    async fn scan_offers(&self, listing_id: &str) -> Result<Vec<Offer>, StoreError> {
        let mut offers: Vec<Offer> = self
            .offers
            .read()
            .await?
            .into_iter()
            .filter(|o| o.listing_id == listing_id)
            .collect();
        sort_newest_first(&mut offers, |o| o.created_at.as_str());
        Ok(offers)
    }

    async fn delete_offers_for_listing(&self, listing_id: &str) -> Result<usize, StoreError> {
        self.offers
            .mutate(|offers| {
                let before = offers.len();
                offers.retain(|o| o.listing_id != listing_id);
                let removed = before - offers.len();
                Ok((removed, removed > 0))
            })
            .await
    }

    async fn insert_session(&self, session: Session) -> Result<Session, StoreError> {
        self.sessions
            .mutate(|sessions| {
                sessions.retain(|s| !s.is_expired(&session.created_at));
                sessions.push(session.clone());
                Ok((session, true))
            })
            .await
    }

    async fn get_session(&self, token: &str) -> Result<Option<Session>, StoreError> {
        let sessions = self.sessions.read().await?;
        Ok(sessions.into_iter().find(|s| s.token == token))
    }

    async fn delete_session(&self, token: &str) -> Result<bool, StoreError> {
        self.sessions
            .mutate(|sessions| {
                let before = sessions.len();
                sessions.retain(|s| s.token != token);
                let removed = sessions.len() < before;
                Ok((removed, removed))
            })
            .await
    }

    async fn delete_sessions_for_user(&self, user_id: &str) -> Result<usize, StoreError> {
        self.sessions
            .mutate(|sessions| {
                let before = sessions.len();
                sessions.retain(|s| s.user_id != user_id);
                let removed = before - sessions.len();
                Ok((removed, removed > 0))
            })
            .await
    }
}
