use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::Config;
use crate::listing::service::ListingService;
use crate::store::SharedStore;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Everything a handler needs. Holds no mutable state of its own: users,
/// listings, offers and sessions all live in the record store.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub config: Config,
}

impl AppState {
    pub fn new(store: SharedStore, config: Config) -> Self {
        Self { store, config }
    }

    pub fn listings(&self) -> ListingService {
        ListingService::new(self.store.clone(), self.config.listings.require_owner)
    }
}
