//! Application state for the API process
//!
//! Leaves first: pool → job store → reservation engine → payment
//! coordinator → order pipeline. Every handler gets a clone.

use std::sync::Arc;

use crate::auth::JwtService;
use crate::config::Config;
use crate::db::DbService;
use crate::inventory::ReservationEngine;
use crate::jobs::JobStore;
use crate::keyspace::{JsonCache, Keyspace, SqliteKeyspace};
use crate::orders::{CheckoutSettings, OrderService};
use crate::payments::PaymentCoordinator;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: DbService,
    pub jobs: JobStore,
    pub engine: ReservationEngine,
    pub orders: OrderService,
    pub payments: PaymentCoordinator,
    pub keyspace: Arc<dyn Keyspace>,
    /// Read-through cache (stock snapshots)
    pub cache: JsonCache,
    pub jwt: Arc<JwtService>,
}

impl AppState {
    /// Open the database file and wire every component
    pub async fn from_config(config: Config) -> Result<Self, BoxError> {
        let db = DbService::new(&config.database_url).await?;
        let keyspace: Arc<dyn Keyspace> = Arc::new(SqliteKeyspace::new(db.pool.clone()));
        Ok(Self::new(config, db, keyspace))
    }

    pub fn new(config: Config, db: DbService, keyspace: Arc<dyn Keyspace>) -> Self {
        let pool = db.pool.clone();
        let jobs = JobStore::new(pool.clone());
        let engine = ReservationEngine::new(pool.clone());
        let payments = PaymentCoordinator::new(pool.clone(), jobs.clone(), &config);
        let orders = OrderService::new(
            pool,
            jobs.clone(),
            payments.clone(),
            CheckoutSettings::from_config(&config),
        );
        let cache = JsonCache::new(keyspace.clone(), config.timeouts.keyspace);
        let jwt = Arc::new(JwtService::new(&config.jwt_secret));

        Self {
            config: Arc::new(config),
            db,
            jobs,
            engine,
            orders,
            payments,
            keyspace,
            cache,
            jwt,
        }
    }

    pub fn get_jwt_service(&self) -> &JwtService {
        &self.jwt
    }
}
