//! Listings: normalization, search, input parsing and the lifecycle rules
//! that sit between the HTTP routes and the record store.

pub mod input;
pub mod normalize;
pub mod query;
pub mod service;

pub use service::ListingService;
