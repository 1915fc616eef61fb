//! Trasferte server - travel request approval, reconciliation and reimbursement

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod workflow;

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::workflow::{Clock, TravelService};

/// Application state shared across handlers
pub struct AppState {
    pub service: TravelService,
}

impl AppState {
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Arc::new(Self {
            service: TravelService::new(store::Store::new(pool)),
        })
    }

    pub fn with_clock(pool: SqlitePool, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            service: TravelService::with_clock(store::Store::new(pool), clock),
        })
    }
}
