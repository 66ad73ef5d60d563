//! Wallet Server - payment intake and wallet reconciliation
//!
//! Credits every successful top-up to the buyer's wallet exactly once, no
//! matter which of the confirmation channels (checkout redirect, provider
//! webhook, reconciliation scan or operator action) reports it first.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod provider;
pub mod routes;
pub mod state;
pub mod store;

pub use config::ServerConfig;
pub use engine::PaymentEngine;
pub use error::AppError;
pub use routes::create_router;
pub use state::AppState;
