//! Shared application state.

use sqlx::PgPool;
use std::sync::Arc;

use crate::engine::PaymentEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PaymentEngine>,
    /// Bearer token guarding `/admin`; admin routes are closed when unset.
    pub admin_token: Option<Arc<str>>,
    /// Present when running against PostgreSQL.
    pub pool: Option<PgPool>,
}

impl AppState {
    pub fn new(engine: PaymentEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            admin_token: None,
            pool: None,
        }
    }

    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token.filter(|t| !t.is_empty()).map(Arc::from);
        self
    }

    pub fn with_pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }
}
