//! Demo catalogue for a fresh install (`--seed`).

use crate::auth::password::hash_password;
use crate::db::models::{
    Availability, Listing, ListingStatus, ListingType, OwnerSnapshot, User, DEFAULT_CURRENCY,
};
use crate::listing::query::ListingFilter;
use crate::store::{now_timestamp, RecordStore};

pub const DEMO_EMAIL: &str = "demo@zenswap.local";
pub const DEMO_PASSWORD: &str = "zenswap-demo";

struct DemoListing {
    kind: ListingType,
    title: &'static str,
    description: &'static str,
    price: Option<f64>,
    location: &'static str,
    condition: &'static str,
    category: &'static str,
    tags: &'static str,
    exchange_desired: &'static str,
    availability: Option<(&'static str, &'static str)>,
}

const DEMO_LISTINGS: &[DemoListing] = &[
    DemoListing {
        kind: ListingType::Sell,
        title: "iPhone 13, 128GB",
        description: "Battery health 89%, always in a case.",
        price: Some(399.0),
        location: "Bangalore, IN",
        condition: "good",
        category: "Electronics",
        tags: "iphone,apple,phone",
        exchange_desired: "",
        availability: None,
    },
    DemoListing {
        kind: ListingType::Buy,
        title: "Looking for a standing desk",
        description: "Electric preferred, up to 160cm wide.",
        price: Some(250.0),
        location: "Mumbai, IN",
        condition: "",
        category: "Furniture",
        tags: "desk,office",
        exchange_desired: "",
        availability: None,
    },
    DemoListing {
        kind: ListingType::Exchange,
        title: "Nintendo Switch for PS5 controller",
        description: "Switch with two joy-cons and dock.",
        price: None,
        location: "Pune, IN",
        condition: "like new",
        category: "Gaming",
        tags: "nintendo,switch",
        exchange_desired: "PS5 DualSense controller",
        availability: None,
    },
    DemoListing {
        kind: ListingType::Rent,
        title: "Mountain bike, weekends",
        description: "Helmet and lock included.",
        price: Some(15.0),
        location: "Bangalore, IN",
        condition: "excellent",
        category: "Sports",
        tags: "bike,cycling",
        exchange_desired: "",
        availability: Some(("2025-10-05", "2025-12-31")),
    },
];

/// Inserts the demo user and listings when the store has no listings yet.
/// Returns how many listings were added.
pub async fn seed_demo(store: &dyn RecordStore) -> anyhow::Result<usize> {
    if !store
        .scan_listings(&ListingFilter::default())
        .await?
        .is_empty()
    {
        tracing::info!("Store already has listings, skipping seed");
        return Ok(0);
    }

    let owner = match store.find_user_by_email(DEMO_EMAIL).await? {
        Some(user) => user,
        None => {
            store
                .insert_user(User {
                    id: String::new(),
                    name: "Demo User".to_string(),
                    email: DEMO_EMAIL.to_string(),
                    password_hash: hash_password(DEMO_PASSWORD).await?,
                    created_at: now_timestamp(),
                })
                .await?
        }
    };

    for demo in DEMO_LISTINGS {
        store
            .insert_listing(Listing {
                id: String::new(),
                kind: demo.kind,
                title: demo.title.to_string(),
                description: demo.description.to_string(),
                price: demo.price,
                currency: DEFAULT_CURRENCY.to_string(),
                location: demo.location.to_string(),
                condition: demo.condition.to_string(),
                images: Vec::new(),
                owner: OwnerSnapshot {
                    id: owner.id.clone(),
                    name: owner.name.clone(),
                    email: owner.email.clone(),
                    phone: String::new(),
                },
                availability: demo.availability.map(|(start, end)| Availability {
                    start: Some(start.to_string()),
                    end: Some(end.to_string()),
                }),
                exchange_desired: demo.exchange_desired.to_string(),
                status: ListingStatus::Active,
                category: demo.category.to_string(),
                tags: demo.tags.to_string(),
                created_at: now_timestamp(),
            })
            .await?;
    }

    tracing::info!("Seeded {} demo listings", DEMO_LISTINGS.len());
    Ok(DEMO_LISTINGS.len())
}
