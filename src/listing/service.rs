use serde_json::Value;

use super::input::{self, ListingPatch, NewListing};
use super::query::{ListingFilter, ListingQuery};
use crate::db::models::{Listing, ListingStatus, Offer, OfferSender, OfferStatus, OwnerSnapshot};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::store::{now_timestamp, SharedStore};

const LISTING_NOT_FOUND: &str = "Listing not found";

/// Listing lifecycle: create, partial update, cascade delete and offers.
///
/// Validation and authorization run before the store is touched, so a
/// rejected request never leaves a partial write behind.
#[derive(Clone)]
pub struct ListingService {
    store: SharedStore,
    require_owner: bool,
}

impl ListingService {
    pub fn new(store: SharedStore, require_owner: bool) -> Self {
        Self {
            store,
            require_owner,
        }
    }

    pub async fn search(&self, query: &ListingQuery) -> AppResult<Vec<Listing>> {
        let filter = ListingFilter::from(query);
        Ok(self.store.scan_listings(&filter).await?)
    }

    pub async fn get(&self, id: &str) -> AppResult<Listing> {
        self.store
            .get_listing(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Not found".into()))
    }

    pub async fn create(&self, user: &CurrentUser, body: &Value) -> AppResult<Listing> {
        let new = NewListing::from_json(body).map_err(AppError::Validation)?;

        let listing = Listing {
            id: String::new(),
            kind: new.kind,
            title: new.title,
            description: new.description,
            price: new.price,
            currency: new.currency,
            location: new.location,
            condition: new.condition,
            images: new.images,
            owner: OwnerSnapshot {
                id: user.id.clone(),
                name: user.name.clone(),
                email: user.email.clone(),
                phone: new.phone,
            },
            availability: new.availability,
            exchange_desired: new.exchange_desired,
            status: ListingStatus::Active,
            category: new.category,
            tags: new.tags,
            created_at: now_timestamp(),
        };

        let listing = self.store.insert_listing(listing).await?;
        tracing::info!("Listing {} created by {}", listing.id, user.id);
        Ok(listing)
    }

    pub async fn update(
        &self,
        user: Option<&CurrentUser>,
        id: &str,
        body: &Value,
    ) -> AppResult<Listing> {
        let patch = ListingPatch::from_json(body).map_err(AppError::Validation)?;
        let existing = self.get(id).await?;
        self.authorize(user, &existing)?;

        if patch.is_empty() {
            return Ok(existing);
        }
        self.store
            .update_listing(id, &patch)
            .await?
            .ok_or_else(|| AppError::NotFound("Not found".into()))
    }

    /// Deletes the listing's offers, then the listing, then sweeps offers once
    /// more for any that landed in between. An interruption part way can leave
    /// a listing without offers, never offers without a listing.
    pub async fn delete(&self, user: Option<&CurrentUser>, id: &str) -> AppResult<()> {
        let existing = self.get(id).await?;
        self.authorize(user, &existing)?;
        self.cascade_delete(id).await
    }

    /// Removes every listing owned by `owner_id`, each with its offers.
    pub async fn delete_owned_by(&self, owner_id: &str) -> AppResult<usize> {
        let owned = self
            .store
            .scan_listings(&ListingFilter::owned_by(owner_id))
            .await?;
        for listing in &owned {
            self.cascade_delete(&listing.id).await?;
        }
        Ok(owned.len())
    }

    async fn cascade_delete(&self, id: &str) -> AppResult<()> {
        let mut offers = self.store.delete_offers_for_listing(id).await?;
        if self.store.delete_listing(id).await?.is_none() {
            return Err(AppError::NotFound("Not found".into()));
        }
        offers += self.store.delete_offers_for_listing(id).await?;
        tracing::info!("Listing {} deleted with {} offers", id, offers);
        Ok(())
    }

    fn authorize(&self, user: Option<&CurrentUser>, listing: &Listing) -> AppResult<()> {
        if !self.require_owner {
            return Ok(());
        }
        let user = user.ok_or(AppError::Unauthorized)?;
        if user.id != listing.owner.id {
            return Err(AppError::Forbidden("Not your listing".into()));
        }
        Ok(())
    }

    /// Offers are accepted regardless of the listing's status.
    ///
    /// The listing is looked up again after the insert. If a delete won the
    /// race, the new offer is swept away and the caller gets a 404; together
    /// with the final sweep in `cascade_delete` no offer outlives its listing.
    pub async fn create_offer(
        &self,
        user: &CurrentUser,
        listing_id: &str,
        body: &Value,
    ) -> AppResult<Offer> {
        let price = input::number(body.get("price"), "price").map_err(AppError::Validation)?;
        let message = body.get("message").and_then(input::text).unwrap_or_default();

        if self.store.get_listing(listing_id).await?.is_none() {
            return Err(AppError::NotFound(LISTING_NOT_FOUND.into()));
        }

        let offer = Offer {
            id: String::new(),
            listing_id: listing_id.to_string(),
            price,
            message,
            from: OfferSender {
                id: user.id.clone(),
                name: user.name.clone(),
                email: user.email.clone(),
            },
            status: OfferStatus::Pending,
            created_at: now_timestamp(),
        };
        let offer = self.store.insert_offer(offer).await?;
        if self.store.get_listing(listing_id).await?.is_none() {
            self.store.delete_offers_for_listing(listing_id).await?;
            return Err(AppError::NotFound(LISTING_NOT_FOUND.into()));
        }
        tracing::info!("Offer {} on listing {} from {}", offer.id, listing_id, user.id);
        Ok(offer)
    }

    pub async fn offers(&self, listing_id: &str) -> AppResult<Vec<Offer>> {
        if self.store.get_listing(listing_id).await?.is_none() {
            return Err(AppError::NotFound(LISTING_NOT_FOUND.into()));
        }
        Ok(self.store.scan_offers(listing_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JsonFileStore, SqliteStore};
    use serde_json::json;
    use std::sync::Arc;

    fn alice() -> CurrentUser {
        CurrentUser {
            id: "u-alice".into(),
            name: "Alice".into(),
            email: "alice@example.com".into(),
        }
    }

    fn bob() -> CurrentUser {
        CurrentUser {
            id: "u-bob".into(),
            name: "Bob".into(),
            email: "bob@example.com".into(),
        }
    }

    async fn services(tmp: &tempfile::TempDir, require_owner: bool) -> Vec<ListingService> {
        let sqlite: SharedStore =
            Arc::new(SqliteStore::open(&tmp.path().join("test.db")).unwrap());
        let file: SharedStore =
            Arc::new(JsonFileStore::open(&tmp.path().join("data")).await.unwrap());
        vec![
            ListingService::new(sqlite, require_owner),
            ListingService::new(file, require_owner),
        ]
    }

    #[tokio::test]
    async fn create_snapshots_owner_and_forces_active() {
        let tmp = tempfile::tempdir().unwrap();
        for service in services(&tmp, false).await {
            let listing = service
                .create(
                    &alice(),
                    &json!({
                        "type": "sell", "title": "iPhone 13", "price": 399,
                        "status": "sold", "phone": "555-0100",
                        "owner": { "id": "someone-else" }
                    }),
                )
                .await
                .unwrap();

            assert!(!listing.id.is_empty());
            assert_eq!(listing.status, ListingStatus::Active);
            assert_eq!(listing.owner.id, "u-alice");
            assert_eq!(listing.owner.name, "Alice");
            assert_eq!(listing.owner.phone, "555-0100");
            assert_eq!(listing.price, Some(399.0));
            assert_eq!(service.get(&listing.id).await.unwrap(), listing);
        }
    }

    #[tokio::test]
    async fn create_rejects_invalid_input_without_writing() {
        let tmp = tempfile::tempdir().unwrap();
        for service in services(&tmp, false).await {
            let err = service
                .create(&alice(), &json!({ "type": "gift", "title": "x" }))
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
            assert!(service
                .search(&ListingQuery::default())
                .await
                .unwrap()
                .is_empty());
        }
    }

    #[tokio::test]
    async fn search_finds_by_type_and_text() {
        let tmp = tempfile::tempdir().unwrap();
        for service in services(&tmp, false).await {
            let created = service
                .create(
                    &alice(),
                    &json!({ "type": "sell", "title": "iPhone 13", "price": 399 }),
                )
                .await
                .unwrap();

            let sells = service
                .search(&ListingQuery {
                    kind: Some("sell".into()),
                    q: Some("iphone".into()),
                    ..ListingQuery::default()
                })
                .await
                .unwrap();
            assert_eq!(sells, vec![created]);

            let buys = service
                .search(&ListingQuery {
                    kind: Some("buy".into()),
                    ..ListingQuery::default()
                })
                .await
                .unwrap();
            assert!(buys.is_empty());
        }
    }

    #[tokio::test]
    async fn update_applies_only_allow_listed_fields() {
        let tmp = tempfile::tempdir().unwrap();
        for service in services(&tmp, false).await {
            let listing = service
                .create(&alice(), &json!({ "type": "sell", "title": "Bike", "price": 50 }))
                .await
                .unwrap();

            let updated = service
                .update(
                    None,
                    &listing.id,
                    &json!({ "price": null, "status": "sold", "type": "buy", "createdAt": "x" }),
                )
                .await
                .unwrap();
            assert_eq!(updated.price, None);
            assert_eq!(updated.status, ListingStatus::Sold);
            assert_eq!(updated.kind, listing.kind);
            assert_eq!(updated.created_at, listing.created_at);
            assert_eq!(updated.title, "Bike");
        }
    }

    #[tokio::test]
    async fn update_unknown_listing_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        for service in services(&tmp, false).await {
            let err = service
                .update(None, "missing", &json!({ "title": "x" }))
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::NotFound(_)));
        }
    }

    #[tokio::test]
    async fn delete_cascades_to_offers() {
        let tmp = tempfile::tempdir().unwrap();
        for service in services(&tmp, false).await {
            let listing = service
                .create(&alice(), &json!({ "type": "sell", "title": "Bike" }))
                .await
                .unwrap();
            let other = service
                .create(&alice(), &json!({ "type": "buy", "title": "Desk" }))
                .await
                .unwrap();
            for price in [10, 20] {
                service
                    .create_offer(&bob(), &listing.id, &json!({ "price": price }))
                    .await
                    .unwrap();
            }
            service
                .create_offer(&bob(), &other.id, &json!({ "message": "still want it?" }))
                .await
                .unwrap();

            service.delete(None, &listing.id).await.unwrap();

            assert!(matches!(
                service.get(&listing.id).await,
                Err(AppError::NotFound(_))
            ));
            assert!(service.store.scan_offers(&listing.id).await.unwrap().is_empty());
            assert_eq!(service.offers(&other.id).await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn delete_unknown_listing_changes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        for service in services(&tmp, false).await {
            let listing = service
                .create(&alice(), &json!({ "type": "sell", "title": "Bike" }))
                .await
                .unwrap();
            service
                .create_offer(&bob(), &listing.id, &json!({ "price": 5 }))
                .await
                .unwrap();

            let err = service.delete(None, "does-not-exist").await.unwrap_err();
            assert!(matches!(err, AppError::NotFound(_)));

            let all = service.search(&ListingQuery::default()).await.unwrap();
            assert_eq!(all, vec![listing.clone()]);
            assert_eq!(service.offers(&listing.id).await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn offers_require_an_existing_listing() {
        let tmp = tempfile::tempdir().unwrap();
        for service in services(&tmp, false).await {
            let err = service
                .create_offer(&bob(), "missing", &json!({ "price": 5 }))
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::NotFound(ref m) if m == "Listing not found"));
            assert!(matches!(
                service.offers("missing").await,
                Err(AppError::NotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn offers_on_sold_listings_are_accepted() {
        let tmp = tempfile::tempdir().unwrap();
        for service in services(&tmp, false).await {
            let listing = service
                .create(&alice(), &json!({ "type": "sell", "title": "Bike" }))
                .await
                .unwrap();
            service
                .update(None, &listing.id, &json!({ "status": "sold" }))
                .await
                .unwrap();

            let offer = service
                .create_offer(
                    &bob(),
                    &listing.id,
                    &json!({ "price": "45", "message": "cash today" }),
                )
                .await
                .unwrap();
            assert_eq!(offer.status, OfferStatus::Pending);
            assert_eq!(offer.price, Some(45.0));
            assert_eq!(offer.from.id, "u-bob");
            assert_eq!(offer.from.name, "Bob");
        }
    }

    #[tokio::test]
    async fn ownership_is_enforced_when_required() {
        let tmp = tempfile::tempdir().unwrap();
        for service in services(&tmp, true).await {
            let listing = service
                .create(&alice(), &json!({ "type": "sell", "title": "Bike" }))
                .await
                .unwrap();

            assert!(matches!(
                service.update(None, &listing.id, &json!({ "title": "Mine" })).await,
                Err(AppError::Unauthorized)
            ));
            assert!(matches!(
                service.delete(Some(&bob()), &listing.id).await,
                Err(AppError::Forbidden(_))
            ));
            service
                .update(Some(&alice()), &listing.id, &json!({ "title": "Still mine" }))
                .await
                .unwrap();
            service.delete(Some(&alice()), &listing.id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn concurrent_patches_leave_one_valid_price() {
        let tmp = tempfile::tempdir().unwrap();
        for service in services(&tmp, false).await {
            let listing = service
                .create(
                    &alice(),
                    &json!({ "type": "sell", "title": "Bike", "description": "red", "price": 50 }),
                )
                .await
                .unwrap();

            let patches = [100, 200].map(|price| {
                let service = service.clone();
                let id = listing.id.clone();
                tokio::spawn(async move {
                    service
                        .update(None, &id, &json!({ "price": price }))
                        .await
                })
            });
            for result in futures::future::join_all(patches).await {
                result.unwrap().unwrap();
            }

            let stored = service.get(&listing.id).await.unwrap();
            assert!(matches!(stored.price, Some(p) if p == 100.0 || p == 200.0));
            assert_eq!(stored.description, "red");
            assert_eq!(stored.title, "Bike");
        }
    }

    #[tokio::test]
    async fn offers_racing_a_delete_leave_nothing_behind() {
        let tmp = tempfile::tempdir().unwrap();
        for service in services(&tmp, false).await {
            let listing = service
                .create(&alice(), &json!({ "type": "sell", "title": "Lamp" }))
                .await
                .unwrap();

            let offers: Vec<_> = (0..8)
                .map(|i| {
                    let service = service.clone();
                    let id = listing.id.clone();
                    tokio::spawn(async move {
                        service
                            .create_offer(&bob(), &id, &json!({ "message": format!("offer {i}") }))
                            .await
                    })
                })
                .collect();
            let delete = {
                let service = service.clone();
                let id = listing.id.clone();
                tokio::spawn(async move { service.delete(None, &id).await })
            };

            for result in futures::future::join_all(offers).await {
                match result.unwrap() {
                    Ok(_) | Err(AppError::NotFound(_)) => {}
                    Err(e) => panic!("unexpected {e:?}"),
                }
            }
            delete.await.unwrap().unwrap();

            assert!(service.store.scan_offers(&listing.id).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn delete_owned_by_removes_only_that_owners_listings() {
        let tmp = tempfile::tempdir().unwrap();
        for service in services(&tmp, false).await {
            let mine = service
                .create(&alice(), &json!({ "type": "sell", "title": "Bike" }))
                .await
                .unwrap();
            service
                .create(&bob(), &json!({ "type": "buy", "title": "Desk" }))
                .await
                .unwrap();
            service
                .create_offer(&bob(), &mine.id, &json!({}))
                .await
                .unwrap();

            assert_eq!(service.delete_owned_by("u-alice").await.unwrap(), 1);

            let rest = service.search(&ListingQuery::default()).await.unwrap();
            assert_eq!(rest.len(), 1);
            assert_eq!(rest[0].owner.id, "u-bob");
            assert!(service.store.scan_offers(&mine.id).await.unwrap().is_empty());
        }
    }
}
