use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior,
};
use std::path::Path;

use super::{new_id, RecordStore, StoreError, EMAIL_IN_USE};
use crate::db::models::{
    Availability, Listing, Offer, OfferSender, OfferStatus, Session, User, UserPatch,
};
use crate::db::{self, CONTAINS_FN};
use crate::listing::input::ListingPatch;
use crate::listing::normalize::{normalize, ListingRecord, OwnerRecord, StoredImages};
use crate::listing::query::ListingFilter;
use crate::state::DbPool;

const LISTING_COLUMNS: &str = "id, type, title, description, price, currency, location, \
    condition, images_json, owner_id, owner_name, owner_email, owner_phone, \
    availability_start, availability_end, exchange_desired, status, category, tags, created_at";

const OFFER_COLUMNS: &str =
    "id, listing_id, price, message, from_id, from_name, from_email, status, created_at";

const USER_COLUMNS: &str = "id, name, email, password_hash, created_at";

/// Document backend on SQLite. Every call runs on the blocking pool so a
/// slow disk never stalls the async workers.
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        let pool = db::create_pool(db_path)?;
        db::run_migrations(&pool)?;
        Ok(Self::new(pool))
    }

    /// Wraps an already migrated pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await?
    }
}

/// The only UNIQUE constraint outside primary keys is `users.email`.
fn map_unique_violation(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(e, _) = &err {
        if e.code == ErrorCode::ConstraintViolation {
            return StoreError::Conflict(EMAIL_IN_USE.to_string());
        }
    }
    err.into()
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ListingRecord> {
    let start: Option<String> = row.get(13)?;
    let end: Option<String> = row.get(14)?;
    Ok(ListingRecord {
        id: row.get(0)?,
        kind: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        price: row.get(4)?,
        currency: row.get(5)?,
        location: row.get(6)?,
        condition: row.get(7)?,
        images: row.get::<_, Option<String>>(8)?.map(StoredImages::Encoded),
        owner: Some(OwnerRecord {
            id: row.get(9)?,
            name: row.get(10)?,
            email: row.get(11)?,
            phone: row.get(12)?,
        }),
        availability: Some(Availability { start, end }),
        exchange_desired: row.get(15)?,
        status: row.get(16)?,
        category: row.get(17)?,
        tags: row.get(18)?,
        created_at: row.get(19)?,
    })
}

fn row_to_offer(row: &Row<'_>) -> rusqlite::Result<Offer> {
    let status: String = row.get(7)?;
    Ok(Offer {
        id: row.get(0)?,
        listing_id: row.get(1)?,
        price: row.get(2)?,
        message: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        from: OfferSender {
            id: row.get(4)?,
            name: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            email: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        },
        status: OfferStatus::parse(&status).unwrap_or_default(),
        created_at: row.get(8)?,
    })
}

fn get_listing_in(conn: &Connection, id: &str) -> Result<Option<Listing>, StoreError> {
    let record = conn
        .query_row(
            &format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = ?1"),
            params![id],
            row_to_record,
        )
        .optional()?;
    match record {
        Some(record) => Ok(Some(normalize(record)?)),
        None => Ok(None),
    }
}

/// Writes every column of `listing`; inserts when `insert` is set.
fn write_listing(conn: &Connection, listing: &Listing, insert: bool) -> Result<(), StoreError> {
    let images_json = serde_json::to_string(&listing.images)?;
    let (start, end) = listing
        .availability
        .as_ref()
        .map(|a| (a.start.clone(), a.end.clone()))
        .unwrap_or((None, None));

    let sql = if insert {
        format!(
            "INSERT INTO listings ({LISTING_COLUMNS}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)"
        )
    } else {
        "UPDATE listings SET type = ?2, title = ?3, description = ?4, price = ?5, currency = ?6, \
         location = ?7, condition = ?8, images_json = ?9, owner_id = ?10, owner_name = ?11, \
         owner_email = ?12, owner_phone = ?13, availability_start = ?14, availability_end = ?15, \
         exchange_desired = ?16, status = ?17, category = ?18, tags = ?19, created_at = ?20 \
         WHERE id = ?1"
            .to_string()
    };

    conn.execute(
        &sql,
        params![
            listing.id,
            listing.kind.as_str(),
            listing.title,
            listing.description,
            listing.price,
            listing.currency,
            listing.location,
            listing.condition,
            images_json,
            listing.owner.id,
            listing.owner.name,
            listing.owner.email,
            listing.owner.phone,
            start,
            end,
            listing.exchange_desired,
            listing.status.as_str(),
            listing.category,
            listing.tags,
            listing.created_at,
        ],
    )?;
    Ok(())
}

/// Translates a filter into a WHERE clause using SQLite's own operators.
/// Text matching goes through the registered `zs_contains` function.
pub(crate) fn listing_predicate(filter: &ListingFilter) -> (String, Vec<SqlValue>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();

    let exact = [
        ("type", &filter.kind),
        ("status", &filter.status),
        ("owner_id", &filter.owner_id),
    ];
    for (column, value) in exact {
        if let Some(value) = value {
            values.push(SqlValue::Text(value.clone()));
            clauses.push(format!("{column} = ?{}", values.len()));
        }
    }

    let contains = [
        ("location", &filter.location),
        ("category", &filter.category),
        ("tags", &filter.tags),
        ("condition", &filter.condition),
    ];
    for (column, needle) in contains {
        if let Some(needle) = needle {
            values.push(SqlValue::Text(needle.clone()));
            clauses.push(format!("{CONTAINS_FN}({column}, ?{})", values.len()));
        }
    }

    if let Some(min) = filter.price_min {
        values.push(SqlValue::Real(min));
        clauses.push(format!("(price IS NOT NULL AND price >= ?{})", values.len()));
    }
    if let Some(max) = filter.price_max {
        values.push(SqlValue::Real(max));
        clauses.push(format!("(price IS NOT NULL AND price <= ?{})", values.len()));
    }

    if let Some(q) = &filter.q {
        values.push(SqlValue::Text(q.clone()));
        let n = values.len();
        clauses.push(format!(
            "({f}(title, ?{n}) OR {f}(description, ?{n}) OR {f}(tags, ?{n}) OR {f}(exchange_desired, ?{n}))",
            f = CONTAINS_FN
        ));
    }

    let clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    (clause, values)
}

#[async_trait]
impl RecordStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                    params![id],
                    row_to_user,
                )
                .optional()?)
        })
        .await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let email = email.to_string();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                    params![email],
                    row_to_user,
                )
                .optional()?)
        })
        .await
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        self.run(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY rowid"))?;
            let users = stmt
                .query_map([], row_to_user)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(users)
        })
        .await
    }

    async fn insert_user(&self, mut user: User) -> Result<User, StoreError> {
        user.id = new_id();
        self.run(move |conn| {
            conn.execute(
                &format!("INSERT INTO users ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
                params![
                    user.id,
                    user.name,
                    user.email,
                    user.password_hash,
                    user.created_at
                ],
            )
            .map_err(map_unique_violation)?;
            Ok(user)
        })
        .await
    }

    async fn update_user(&self, id: &str, patch: UserPatch) -> Result<Option<User>, StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let existing = tx
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                    params![id],
                    row_to_user,
                )
                .optional()?;
            let Some(mut user) = existing else {
                return Ok(None);
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

            tx.execute(
                "UPDATE users SET name = ?2, email = ?3, password_hash = ?4 WHERE id = ?1",
                params![user.id, user.name, user.email, user.password_hash],
            )
            .map_err(map_unique_violation)?;
            tx.commit()?;
            Ok(Some(user))
        })
        .await
    }

    async fn delete_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let user = tx
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                    params![id],
                    row_to_user,
                )
                .optional()?;
            if user.is_some() {
                tx.execute("DELETE FROM users WHERE id = ?1", params![id])?;
            }
            tx.commit()?;
            Ok(user)
        })
        .await
    }

    async fn get_listing(&self, id: &str) -> Result<Option<Listing>, StoreError> {
        let id = id.to_string();
        self.run(move |conn| get_listing_in(conn, &id)).await
    }

    async fn scan_listings(&self, filter: &ListingFilter) -> Result<Vec<Listing>, StoreError> {
        let (clause, values) = listing_predicate(filter);
        self.run(move |conn| {
            let sql = format!(
                "SELECT {LISTING_COLUMNS} FROM listings {clause} ORDER BY created_at DESC, rowid ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let records = stmt
                .query_map(params_from_iter(values.iter()), row_to_record)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(records
                .into_iter()
                .filter_map(|record| match normalize(record) {
                    Ok(listing) => Some(listing),
                    Err(e) => {
                        tracing::warn!("Skipping unreadable listing row: {}", e);
                        None
                    }
                })
                .collect())
        })
        .await
    }

    async fn insert_listing(&self, mut listing: Listing) -> Result<Listing, StoreError> {
        listing.id = new_id();
        self.run(move |conn| {
            write_listing(conn, &listing, true)?;
            Ok(listing)
        })
        .await
    }

    async fn update_listing(
        &self,
        id: &str,
        patch: &ListingPatch,
    ) -> Result<Option<Listing>, StoreError> {
        let id = id.to_string();
        let patch = patch.clone();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let Some(mut listing) = get_listing_in(&tx, &id)? else {
                return Ok(None);
            };
            patch.apply(&mut listing);
            write_listing(&tx, &listing, false)?;
            tx.commit()?;
            Ok(Some(listing))
        })
        .await
    }

    async fn delete_listing(&self, id: &str) -> Result<Option<Listing>, StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let listing = get_listing_in(&tx, &id)?;
            if listing.is_some() {
                tx.execute("DELETE FROM listings WHERE id = ?1", params![id])?;
            }
            tx.commit()?;
            Ok(listing)
        })
        .await
    }

    async fn insert_offer(&self, mut offer: Offer) -> Result<Offer, StoreError> {
        offer.id = new_id();
        self.run(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO offers ({OFFER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    offer.id,
                    offer.listing_id,
                    offer.price,
                    offer.message,
                    offer.from.id,
                    offer.from.name,
                    offer.from.email,
                    offer.status.as_str(),
                    offer.created_at,
                ],
            )?;
            Ok(offer)
        })
        .await
    }

    async fn scan_offers(&self, listing_id: &str) -> Result<Vec<Offer>, StoreError> {
        let listing_id = listing_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {OFFER_COLUMNS} FROM offers WHERE listing_id = ?1 \
                 ORDER BY created_at DESC, rowid ASC"
            ))?;
            let offers = stmt
                .query_map(params![listing_id], row_to_offer)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(offers)
        })
        .await
    }

    async fn delete_offers_for_listing(&self, listing_id: &str) -> Result<usize, StoreError> {
        let listing_id = listing_id.to_string();
        self.run(move |conn| {
            Ok(conn.execute(
                "DELETE FROM offers WHERE listing_id = ?1",
                params![listing_id],
            )?)
        })
        .await
    }

    async fn insert_session(&self, session: Session) -> Result<Session, StoreError> {
        self.run(move |conn| {
            let pruned = conn.execute(
                "DELETE FROM sessions WHERE expires_at <= ?1",
                params![session.created_at],
            )?;
            if pruned > 0 {
                tracing::debug!("Pruned {} expired sessions", pruned);
            }
            conn.execute(
                "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    session.token,
                    session.user_id,
                    session.created_at,
                    session.expires_at
                ],
            )?;
            Ok(session)
        })
        .await
    }

    async fn get_session(&self, token: &str) -> Result<Option<Session>, StoreError> {
        let token = token.to_string();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT token, user_id, created_at, expires_at FROM sessions WHERE token = ?1",
                    params![token],
                    |row| {
                        Ok(Session {
                            token: row.get(0)?,
                            user_id: row.get(1)?,
                            created_at: row.get(2)?,
                            expires_at: row.get(3)?,
                        })
                    },
                )
                .optional()?)
        })
        .await
    }

    async fn delete_session(&self, token: &str) -> Result<bool, StoreError> {
        let token = token.to_string();
        self.run(move |conn| {
            let rows = conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
            Ok(rows > 0)
        })
        .await
    }

    async fn delete_sessions_for_user(&self, user_id: &str) -> Result<usize, StoreError> {
        let user_id = user_id.to_string();
        self.run(move |conn| {
            Ok(conn.execute("DELETE FROM sessions WHERE user_id = ?1", params![user_id])?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_has_no_where_clause() {
        let (clause, values) = listing_predicate(&ListingFilter::default());
        assert!(clause.is_empty());
        assert!(values.is_empty());
    }

    #[test]
    fn predicate_numbers_placeholders_in_order() {
        let filter = ListingFilter {
            kind: Some("sell".into()),
            location: Some("bangalore".into()),
            price_min: Some(10.0),
            q: Some("iphone".into()),
            ..ListingFilter::default()
        };
        let (clause, values) = listing_predicate(&filter);
        assert!(clause.starts_with("WHERE type = ?1 AND zs_contains(location, ?2)"));
        assert!(clause.contains("price >= ?3"));
        assert!(clause.contains("zs_contains(exchange_desired, ?4)"));
        assert_eq!(values.len(), 4);
    }
}
