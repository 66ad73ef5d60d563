//! Server configuration from flags and environment variables.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::engine::{EngineConfig, ScanSchedule};
use crate::provider::PaypalConfig;

#[derive(Debug, Clone, Parser)]
#[command(name = "wallet-server")]
#[command(about = "Payment intake and wallet reconciliation server", long_about = None)]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
    pub bind_addr: SocketAddr,

    /// PostgreSQL connection string; in-memory stores when absent
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "PAYPAL_CLIENT_ID")]
    pub paypal_client_id: Option<String>,

    #[arg(long, env = "PAYPAL_CLIENT_SECRET", hide_env_values = true)]
    pub paypal_client_secret: Option<String>,

    #[arg(
        long,
        env = "PAYPAL_API_BASE",
        default_value = "https://api-m.sandbox.paypal.com"
    )]
    pub paypal_api_base: String,

    /// Base URL the buyer returns to after checkout
    #[arg(long, env = "PUBLIC_BASE_URL", default_value = "http://localhost:3000")]
    pub public_base_url: String,

    /// HMAC key for webhook signatures
    #[arg(long, env = "WEBHOOK_SECRET", hide_env_values = true)]
    pub webhook_secret: Option<String>,

    /// Bearer token for the admin routes; admin is disabled when absent
    #[arg(long, env = "ADMIN_TOKEN", hide_env_values = true)]
    pub admin_token: Option<String>,

    #[arg(long, env = "PROVIDER_TIMEOUT_SECS", default_value_t = 15)]
    pub provider_timeout_secs: u64,

    /// Unpaid intents older than this are expired
    #[arg(long, env = "INTENT_EXPIRY_MINUTES", default_value_t = 60)]
    pub intent_expiry_minutes: i64,

    /// Background scan period; 0 disables the scanner
    #[arg(long, env = "SCAN_INTERVAL_SECS", default_value_t = 300)]
    pub scan_interval_secs: u64,

    #[arg(long, env = "SCAN_OLDER_THAN_MINUTES", default_value_t = 10)]
    pub scan_older_than_minutes: i64,

    #[arg(long, env = "SCAN_LIMIT", default_value_t = 50)]
    pub scan_limit: i64,

    /// Comma-separated ISO 4217 codes
    #[arg(
        long,
        env = "SUPPORTED_CURRENCIES",
        value_delimiter = ',',
        default_value = "EUR,USD"
    )]
    pub supported_currencies: Vec<String>,
}

impl ServerConfig {
    /// PayPal settings, when both credentials are present.
    pub fn paypal(&self) -> Option<PaypalConfig> {
        let client_id = self.paypal_client_id.clone().filter(|s| !s.is_empty())?;
        let client_secret = self.paypal_client_secret.clone().filter(|s| !s.is_empty())?;
        Some(PaypalConfig {
            api_base: self.paypal_api_base.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
            return_base_url: self.public_base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(self.provider_timeout_secs),
        })
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            expiry_minutes: self.intent_expiry_minutes,
            webhook_secret: self.webhook_secret.clone().filter(|s| !s.is_empty()),
            supported_currencies: self
                .supported_currencies
                .iter()
                .map(|c| c.trim().to_ascii_uppercase())
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }

    /// Background scan settings, or None when disabled.
    pub fn scan_schedule(&self) -> Option<ScanSchedule> {
        if self.scan_interval_secs == 0 {
            return None;
        }
        Some(ScanSchedule {
            every: Duration::from_secs(self.scan_interval_secs),
            older_than_minutes: self.scan_older_than_minutes,
            limit: self.scan_limit,
        })
    }
}
