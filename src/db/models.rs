use serde::{Deserialize, Serialize};

pub const DEFAULT_CURRENCY: &str = "USD";
pub const MAX_IMAGES: usize = 6;

/// Accepted values for `Listing::condition`. The empty string means "unspecified".
pub const CONDITIONS: &[&str] = &["new", "like new", "excellent", "good", "fair", "poor", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingType {
    Sell,
    Buy,
    Exchange,
    Rent,
}

impl ListingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingType::Sell => "sell",
            ListingType::Buy => "buy",
            ListingType::Exchange => "exchange",
            ListingType::Rent => "rent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sell" => Some(ListingType::Sell),
            "buy" => Some(ListingType::Buy),
            "exchange" => Some(ListingType::Exchange),
            "rent" => Some(ListingType::Rent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    #[default]
    Active,
    Sold,
    Inactive,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Active => "active",
            ListingStatus::Sold => "sold",
            ListingStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ListingStatus::Active),
            "sold" => Some(ListingStatus::Sold),
            "inactive" => Some(ListingStatus::Inactive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

impl OfferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferStatus::Pending => "pending",
            OfferStatus::Accepted => "accepted",
            OfferStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OfferStatus::Pending),
            "accepted" => Some(OfferStatus::Accepted),
            "rejected" => Some(OfferStatus::Rejected),
            _ => None,
        }
    }
}

/// Identity fields copied onto a listing when it is created.
///
/// The snapshot is never re-synced with the user record: renaming a user
/// leaves their existing listings showing the old name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OwnerSnapshot {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Availability {
    pub start: Option<String>,
    pub end: Option<String>,
}

/// Canonical, client-facing listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ListingType,
    pub title: String,
    pub description: String,
    pub price: Option<f64>,
    pub currency: String,
    pub location: String,
    pub condition: String,
    pub images: Vec<String>,
    pub owner: OwnerSnapshot,
    pub availability: Option<Availability>,
    pub exchange_desired: String,
    pub status: ListingStatus,
    pub category: String,
    pub tags: String,
    pub created_at: String,
}

/// Submitter snapshot on an offer. Same staleness contract as [`OwnerSnapshot`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OfferSender {
    pub id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub id: String,
    pub listing_id: String,
    pub price: Option<f64>,
    #[serde(default)]
    pub message: String,
    pub from: OfferSender,
    #[serde(default)]
    pub status: OfferStatus,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: String,
}

/// User as exposed over the API: no password hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_at: String,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            created_at: user.created_at.clone(),
        }
    }
}

/// Partial user update. `email` must already be normalized.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub created_at: String,
    pub expires_at: String,
}

impl Session {
    pub fn is_expired(&self, now: &str) -> bool {
        self.expires_at.as_str() <= now
    }
}
