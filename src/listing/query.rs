//! Listing search parameters and the in-memory match predicate.
//!
//! Every supplied constraint is ANDed; `q` alone is an OR across title,
//! description, tags and exchangeDesired. Numeric bounds that fail to parse
//! are dropped rather than rejected, so `?priceMin=abc` behaves like no
//! `priceMin` at all.

use serde::Deserialize;

use crate::db::models::Listing;

/// Raw query string of `GET /api/listings`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub q: Option<String>,
    pub location: Option<String>,
    pub category: Option<String>,
    pub tags: Option<String>,
    pub price_min: Option<String>,
    pub price_max: Option<String>,
    pub condition: Option<String>,
    pub status: Option<String>,
}

/// Parsed filter. Text needles are stored lower-cased.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingFilter {
    pub kind: Option<String>,
    pub status: Option<String>,
    pub owner_id: Option<String>,
    pub q: Option<String>,
    pub location: Option<String>,
    pub category: Option<String>,
    pub tags: Option<String>,
    pub condition: Option<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
}

impl From<&ListingQuery> for ListingFilter {
    fn from(query: &ListingQuery) -> Self {
        Self {
            kind: present(&query.kind),
            status: present(&query.status),
            owner_id: None,
            q: needle(&query.q),
            location: needle(&query.location),
            category: needle(&query.category),
            tags: needle(&query.tags),
            condition: needle(&query.condition),
            price_min: bound(&query.price_min),
            price_max: bound(&query.price_max),
        }
    }
}

fn present(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

fn needle(value: &Option<String>) -> Option<String> {
    present(value).map(|v| v.to_lowercase())
}

fn bound(value: &Option<String>) -> Option<f64> {
    value
        .as_deref()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

impl ListingFilter {
    pub fn owned_by(owner_id: &str) -> Self {
        Self {
            owner_id: Some(owner_id.to_string()),
            ..Self::default()
        }
    }

    pub fn matches(&self, listing: &Listing) -> bool {
        if let Some(kind) = &self.kind {
            if listing.kind.as_str() != kind.as_str() {
                return false;
            }
        }
        if let Some(status) = &self.status {
            if listing.status.as_str() != status.as_str() {
                return false;
            }
        }
        if let Some(owner_id) = &self.owner_id {
            if &listing.owner.id != owner_id {
                return false;
            }
        }

        let text_fields = [
            (&self.location, &listing.location),
            (&self.category, &listing.category),
            (&self.tags, &listing.tags),
            (&self.condition, &listing.condition),
        ];
        for (needle, field) in text_fields {
            if let Some(needle) = needle {
                if !contains_ci(field, needle) {
                    return false;
                }
            }
        }

        if self.price_min.is_some() || self.price_max.is_some() {
            let Some(price) = listing.price else {
                return false;
            };
            if self.price_min.is_some_and(|min| price < min) {
                return false;
            }
            if self.price_max.is_some_and(|max| price > max) {
                return false;
            }
        }

        if let Some(q) = &self.q {
            let hit = [
                &listing.title,
                &listing.description,
                &listing.tags,
                &listing.exchange_desired,
            ]
            .into_iter()
            .any(|field| contains_ci(field, q));
            if !hit {
                return false;
            }
        }

        true
    }
}

/// Case-insensitive substring test. Shared with the SQLite backend, which
/// registers it as a SQL function so both backends agree on every input.
pub fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Stable sort, newest `created_at` first; ties keep their insertion order.
pub fn sort_newest_first<T>(items: &mut [T], created_at: impl Fn(&T) -> &str) {
    items.sort_by(|a, b| created_at(b).cmp(created_at(a)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{ListingStatus, ListingType, OwnerSnapshot};

    fn listing(title: &str) -> Listing {
        Listing {
            id: title.to_lowercase(),
            kind: ListingType::Sell,
            title: title.to_string(),
            description: String::new(),
            price: Some(100.0),
            currency: "USD".into(),
            location: "Bangalore, IN".into(),
            condition: "good".into(),
            images: vec![],
            owner: OwnerSnapshot {
                id: "u1".into(),
                ..OwnerSnapshot::default()
            },
            availability: None,
            exchange_desired: String::new(),
            status: ListingStatus::Active,
            category: "Electronics".into(),
            tags: "iphone,apple".into(),
            created_at: "2025-01-01T00:00:00.000Z".into(),
        }
    }

    fn query(pairs: &[(&str, &str)]) -> ListingFilter {
        let mut q = ListingQuery::default();
        for (key, value) in pairs {
            let value = Some(value.to_string());
            match *key {
                "type" => q.kind = value,
                "q" => q.q = value,
                "location" => q.location = value,
                "category" => q.category = value,
                "tags" => q.tags = value,
                "priceMin" => q.price_min = value,
                "priceMax" => q.price_max = value,
                "condition" => q.condition = value,
                "status" => q.status = value,
                other => panic!("unknown key {other}"),
            }
        }
        ListingFilter::from(&q)
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(ListingFilter::default().matches(&listing("Anything")));
    }

    #[test]
    fn type_and_status_are_exact() {
        let l = listing("iPhone 13");
        assert!(query(&[("type", "sell")]).matches(&l));
        assert!(!query(&[("type", "buy")]).matches(&l));
        assert!(!query(&[("type", "Sell")]).matches(&l));
        assert!(query(&[("status", "active")]).matches(&l));
        assert!(!query(&[("status", "sold")]).matches(&l));
    }

    #[test]
    fn text_fields_match_case_insensitive_substrings() {
        let l = listing("iPhone 13");
        assert!(query(&[("location", "bangalore")]).matches(&l));
        assert!(query(&[("category", "ELECTRON")]).matches(&l));
        assert!(query(&[("tags", "Apple")]).matches(&l));
        assert!(query(&[("condition", "goo")]).matches(&l));
        assert!(!query(&[("location", "chennai")]).matches(&l));
    }

    #[test]
    fn q_searches_any_of_four_fields() {
        let mut l = listing("Trade Switch");
        l.description = "Gently used".into();
        l.tags = "nintendo".into();
        l.exchange_desired = "PS5 Controller".into();

        for needle in ["switch", "GENTLY", "ninten", "ps5"] {
            assert!(query(&[("q", needle)]).matches(&l), "{needle}");
        }
        assert!(!query(&[("q", "xbox")]).matches(&l));
        // category is not searched by q
        assert!(!query(&[("q", "electronics")]).matches(&l));
    }

    #[test]
    fn combined_filters_are_conjunctive() {
        let l = listing("iPhone 13");
        let cases = [
            [("type", "sell"), ("location", "bangalore")],
            [("type", "sell"), ("location", "mumbai")],
            [("type", "buy"), ("location", "bangalore")],
            [("category", "electronics"), ("priceMax", "50")],
        ];
        for pair in cases {
            let combined = query(&pair).matches(&l);
            let separate = query(&pair[..1]).matches(&l) && query(&pair[1..]).matches(&l);
            assert_eq!(combined, separate, "{pair:?}");
        }
        assert!(query(&[("type", "sell"), ("q", "iphone")]).matches(&l));
        assert!(!query(&[("type", "buy"), ("q", "iphone")]).matches(&l));
    }

    #[test]
    fn price_bounds_are_inclusive() {
        let l = listing("iPhone 13");
        assert!(query(&[("priceMin", "100")]).matches(&l));
        assert!(query(&[("priceMax", "100")]).matches(&l));
        assert!(query(&[("priceMin", "50"), ("priceMax", "150")]).matches(&l));
        assert!(!query(&[("priceMin", "100.01")]).matches(&l));
        assert!(!query(&[("priceMax", "99")]).matches(&l));
    }

    #[test]
    fn null_price_never_satisfies_a_bound() {
        let mut l = listing("Trade");
        l.price = None;
        assert!(!query(&[("priceMin", "0")]).matches(&l));
        assert!(!query(&[("priceMax", "1000000")]).matches(&l));
        assert!(!query(&[("type", "sell"), ("priceMax", "10")]).matches(&l));
        assert!(query(&[("type", "sell")]).matches(&l));
    }

    #[test]
    fn malformed_bounds_are_ignored() {
        let mut l = listing("Trade");
        l.price = None;
        assert!(query(&[("priceMin", "abc")]).matches(&l));
        assert!(query(&[("priceMax", "")]).matches(&l));
        assert!(query(&[("priceMax", "NaN")]).matches(&l));
        assert_eq!(query(&[("priceMin", "abc")]).price_min, None);
    }

    #[test]
    fn empty_parameters_are_absent() {
        let l = listing("iPhone 13");
        assert!(query(&[("type", ""), ("q", ""), ("status", "")]).matches(&l));
    }

    #[test]
    fn owner_filter_is_exact() {
        let l = listing("iPhone 13");
        assert!(ListingFilter::owned_by("u1").matches(&l));
        assert!(!ListingFilter::owned_by("u").matches(&l));
    }

    #[test]
    fn sort_is_descending_and_stable() {
        let mut items = vec![
            ("a", "2025-01-01T00:00:00.000Z"),
            ("b", "2025-01-03T00:00:00.000Z"),
            ("c", "2025-01-01T00:00:00.000Z"),
            ("d", "2025-01-02T00:00:00.000Z"),
        ];
        sort_newest_first(&mut items, |item| item.1);
        let order: Vec<&str> = items.iter().map(|i| i.0).collect();
        assert_eq!(order, vec!["b", "d", "a", "c"]);
        for pair in items.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }
}
