//! Conversion from stored listing records to the canonical [`Listing`].
//!
//! Both backends hand over a [`ListingRecord`]: the SQLite store builds one
//! from a row (images as a JSON string, availability split over two columns),
//! the flat-file store deserializes one straight from disk. Everything that
//! may be missing in a record is optional here and gets its default in
//! [`normalize`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::db::models::{
    Availability, Listing, ListingStatus, ListingType, OwnerSnapshot, DEFAULT_CURRENCY,
};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum NormalizeError {
    #[error("listing record has no id")]
    MissingId,

    #[error("listing {0} has an invalid type")]
    InvalidType(String),
}

/// Images as a backend stores them: an inline list or a serialized JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredImages {
    List(Vec<String>),
    Encoded(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnerRecord {
    pub id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListingRecord {
    #[serde(alias = "_id")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(deserialize_with = "lenient_price")]
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub location: Option<String>,
    pub condition: Option<String>,
    #[serde(deserialize_with = "lenient_images")]
    pub images: Option<StoredImages>,
    pub owner: Option<OwnerRecord>,
    pub availability: Option<Availability>,
    pub exchange_desired: Option<String>,
    pub status: Option<String>,
    pub category: Option<String>,
    pub tags: Option<String>,
    pub created_at: Option<String>,
}

impl From<&Listing> for ListingRecord {
    fn from(listing: &Listing) -> Self {
        Self {
            id: Some(listing.id.clone()),
            kind: Some(listing.kind.as_str().to_string()),
            title: Some(listing.title.clone()),
            description: Some(listing.description.clone()),
            price: listing.price,
            currency: Some(listing.currency.clone()),
            location: Some(listing.location.clone()),
            condition: Some(listing.condition.clone()),
            images: Some(StoredImages::List(listing.images.clone())),
            owner: Some(OwnerRecord {
                id: Some(listing.owner.id.clone()),
                name: Some(listing.owner.name.clone()),
                email: Some(listing.owner.email.clone()),
                phone: Some(listing.owner.phone.clone()),
            }),
            availability: listing.availability.clone(),
            exchange_desired: Some(listing.exchange_desired.clone()),
            status: Some(listing.status.as_str().to_string()),
            category: Some(listing.category.clone()),
            tags: Some(listing.tags.clone()),
            created_at: Some(listing.created_at.clone()),
        }
    }
}

/// Builds the canonical listing. Pure and idempotent:
/// `normalize(ListingRecord::from(&normalize(r)?))` equals `normalize(r)`.
pub fn normalize(record: ListingRecord) -> Result<Listing, NormalizeError> {
    let id = record
        .id
        .filter(|id| !id.is_empty())
        .ok_or(NormalizeError::MissingId)?;
    let kind = record
        .kind
        .as_deref()
        .and_then(ListingType::parse)
        .ok_or_else(|| NormalizeError::InvalidType(id.clone()))?;

    let owner = record.owner.unwrap_or_default();
    let status = record
        .status
        .as_deref()
        .and_then(ListingStatus::parse)
        .unwrap_or_default();

    Ok(Listing {
        id,
        kind,
        title: record.title.unwrap_or_default(),
        description: record.description.unwrap_or_default(),
        price: record.price.filter(|p| p.is_finite()),
        currency: non_empty_or(record.currency, DEFAULT_CURRENCY),
        location: record.location.unwrap_or_default(),
        condition: record.condition.unwrap_or_default(),
        images: decode_images(record.images),
        owner: OwnerSnapshot {
            id: owner.id.unwrap_or_default(),
            name: owner.name.unwrap_or_default(),
            email: owner.email.unwrap_or_default(),
            phone: owner.phone.unwrap_or_default(),
        },
        availability: normalize_availability(record.availability),
        exchange_desired: record.exchange_desired.unwrap_or_default(),
        status,
        category: record.category.unwrap_or_default(),
        tags: record.tags.unwrap_or_default(),
        created_at: record.created_at.unwrap_or_default(),
    })
}

/// Hand-edited data files sometimes carry prices as strings.
fn lenient_price<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Image lists may hold stray non-string entries; those are dropped.
fn lenient_images<'de, D>(deserializer: D) -> Result<Option<StoredImages>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => Some(StoredImages::List(strings(items))),
        Some(Value::String(raw)) => Some(StoredImages::Encoded(raw)),
        _ => None,
    })
}

fn strings(items: Vec<Value>) -> Vec<String> {
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s),
            _ => None,
        })
        .collect()
}

fn non_empty_or(value: Option<String>, default: &str) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn decode_images(images: Option<StoredImages>) -> Vec<String> {
    match images {
        None => Vec::new(),
        Some(StoredImages::List(list)) => list,
        Some(StoredImages::Encoded(raw)) => {
            let raw = raw.trim();
            if raw.is_empty() {
                return Vec::new();
            }
            // A bare string that is not a JSON array is a single reference.
            match serde_json::from_str::<Value>(raw) {
                Ok(Value::Array(items)) => strings(items),
                _ => vec![raw.to_string()],
            }
        }
    }
}

/// Collapses an availability with neither bound set to `None`.
pub fn normalize_availability(availability: Option<Availability>) -> Option<Availability> {
    let availability = availability?;
    let start = availability.start.filter(|s| !s.is_empty());
    let end = availability.end.filter(|s| !s.is_empty());
    if start.is_none() && end.is_none() {
        None
    } else {
        Some(Availability { start, end })
    }
}
