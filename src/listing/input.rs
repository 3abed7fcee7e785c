//! Parsing of create/update request bodies into typed listing inputs.
//!
//! Bodies arrive as loose JSON from the web and mobile clients. Scalars are
//! coerced to text, numbers may be sent as strings, and unknown keys are
//! ignored. Validation failures are returned as user-facing messages.

use serde_json::{Map, Value};

use super::normalize::normalize_availability;
use crate::db::models::{
    Availability, Listing, ListingStatus, ListingType, CONDITIONS, DEFAULT_CURRENCY, MAX_IMAGES,
};

/// Validated fields of a new listing, before ownership and timestamps are attached.
#[derive(Debug, Clone, PartialEq)]
pub struct NewListing {
    pub kind: ListingType,
    pub title: String,
    pub description: String,
    pub price: Option<f64>,
    pub currency: String,
    pub location: String,
    pub condition: String,
    pub images: Vec<String>,
    pub phone: String,
    pub availability: Option<Availability>,
    pub exchange_desired: String,
    pub category: String,
    pub tags: String,
}

impl NewListing {
    pub fn from_json(body: &Value) -> Result<Self, String> {
        let empty = Map::new();
        let fields = body.as_object().unwrap_or(&empty);

        let kind = required(fields, "type")?;
        let title = required(fields, "title")?;
        let kind = ListingType::parse(&kind)
            .ok_or_else(|| "Invalid type. Allowed: sell, buy, exchange, rent".to_string())?;

        let phone = fields
            .get("owner")
            .and_then(|owner| owner.get("phone"))
            .or_else(|| fields.get("phone"))
            .and_then(text)
            .unwrap_or_default();

        let currency = text_field(fields, "currency");

        Ok(Self {
            kind,
            title: title.trim().to_string(),
            description: text_field(fields, "description"),
            price: number(fields.get("price"), "price")?,
            currency: if currency.is_empty() {
                DEFAULT_CURRENCY.to_string()
            } else {
                currency
            },
            location: text_field(fields, "location"),
            condition: condition(fields.get("condition"))?.unwrap_or_default(),
            images: images(fields.get("images")),
            phone,
            availability: availability(fields.get("availability")),
            exchange_desired: text_field(fields, "exchangeDesired"),
            category: text_field(fields, "category"),
            tags: text_field(fields, "tags"),
        })
    }
}

/// Allow-listed partial update. `None` leaves a field untouched; for the
/// nullable fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<Option<f64>>,
    pub currency: Option<String>,
    pub location: Option<String>,
    pub condition: Option<String>,
    pub images: Option<Vec<String>>,
    pub availability: Option<Option<Availability>>,
    pub exchange_desired: Option<String>,
    pub status: Option<ListingStatus>,
    pub category: Option<String>,
    pub tags: Option<String>,
}

impl ListingPatch {
    /// Keys outside the allow-list (`type`, `owner`, `createdAt`, ...) are ignored.
    pub fn from_json(body: &Value) -> Result<Self, String> {
        let empty = Map::new();
        let fields = body.as_object().unwrap_or(&empty);
        let mut patch = Self::default();

        if let Some(value) = fields.get("title") {
            let title = text(value).unwrap_or_default().trim().to_string();
            if title.is_empty() {
                return Err("Title cannot be empty".into());
            }
            patch.title = Some(title);
        }
        if fields.contains_key("price") {
            patch.price = Some(number(fields.get("price"), "price")?);
        }
        if fields.contains_key("condition") {
            patch.condition = Some(condition(fields.get("condition"))?.unwrap_or_default());
        }
        if let Some(value) = fields.get("status") {
            let status = text(value).unwrap_or_default();
            patch.status = Some(
                ListingStatus::parse(&status)
                    .ok_or_else(|| "Invalid status. Allowed: active, sold, inactive".to_string())?,
            );
        }
        if fields.contains_key("images") {
            patch.images = Some(images(fields.get("images")));
        }
        if fields.contains_key("availability") {
            patch.availability = Some(availability(fields.get("availability")));
        }

        patch.description = optional_text(fields, "description");
        patch.currency = optional_text(fields, "currency");
        patch.location = optional_text(fields, "location");
        patch.exchange_desired = optional_text(fields, "exchangeDesired");
        patch.category = optional_text(fields, "category");
        patch.tags = optional_text(fields, "tags");

        Ok(patch)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, listing: &mut Listing) {
        if let Some(title) = &self.title {
            listing.title = title.clone();
        }
        if let Some(description) = &self.description {
            listing.description = description.clone();
        }
        if let Some(price) = self.price {
            listing.price = price;
        }
        if let Some(currency) = &self.currency {
            listing.currency = if currency.is_empty() {
                DEFAULT_CURRENCY.to_string()
            } else {
                currency.clone()
            };
        }
        if let Some(location) = &self.location {
            listing.location = location.clone();
        }
        if let Some(condition) = &self.condition {
            listing.condition = condition.clone();
        }
        if let Some(images) = &self.images {
            listing.images = images.clone();
        }
        if let Some(availability) = &self.availability {
            listing.availability = availability.clone();
        }
        if let Some(exchange_desired) = &self.exchange_desired {
            listing.exchange_desired = exchange_desired.clone();
        }
        if let Some(status) = self.status {
            listing.status = status;
        }
        if let Some(category) = &self.category {
            listing.category = category.clone();
        }
        if let Some(tags) = &self.tags {
            listing.tags = tags.clone();
        }
    }
}

fn required(fields: &Map<String, Value>, key: &str) -> Result<String, String> {
    fields
        .get(key)
        .and_then(text)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| format!("Missing field: {key}"))
}

/// Scalar to text. Null, arrays and objects have no text form.
pub fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Text form of `body[key]`, if the body is an object holding a scalar there.
pub fn text_at(body: &Value, key: &str) -> Option<String> {
    body.get(key).and_then(text)
}

fn text_field(fields: &Map<String, Value>, key: &str) -> String {
    fields.get(key).and_then(text).unwrap_or_default()
}

fn optional_text(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields.get(key).map(|v| text(v).unwrap_or_default())
}

/// Optional number: JSON number or numeric string; null, absent and "" are `None`.
pub fn number(value: Option<&Value>, name: &str) -> Result<Option<f64>, String> {
    let parsed = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    parsed
        .filter(|n| n.is_finite())
        .map(Some)
        .ok_or_else(|| format!("Invalid {name}: must be a number"))
}

fn condition(value: Option<&Value>) -> Result<Option<String>, String> {
    let Some(condition) = value.and_then(text) else {
        return Ok(None);
    };
    if CONDITIONS.contains(&condition.as_str()) {
        Ok(Some(condition))
    } else {
        Err("Invalid condition. Allowed: new, like new, excellent, good, fair, poor".into())
    }
}

fn images(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .take(MAX_IMAGES)
            .collect(),
        _ => Vec::new(),
    }
}

fn availability(value: Option<&Value>) -> Option<Availability> {
    let fields = value?.as_object()?;
    let bound = |key: &str| fields.get(key).and_then(text);
    normalize_availability(Some(Availability {
        start: bound("start"),
        end: bound("end"),
    }))
}
