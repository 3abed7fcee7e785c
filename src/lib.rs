// Library exports for ZenSwap
// This allows integration tests and external code to use ZenSwap modules

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod listing;
pub mod routes;
pub mod seed;
pub mod state;
pub mod store;
