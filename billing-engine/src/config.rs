//! Engine configuration.

use crate::error::BillingError;
use config::{Config as Cfg, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// TTL of the per-subscription billing lock, in seconds.
    #[serde(default = "default_billing_lock_ttl_secs")]
    pub billing_lock_ttl_secs: u64,

    /// Invoices older than this are never e-mailed after a billing pass.
    #[serde(default = "default_invoice_email_max_age_days")]
    pub invoice_email_max_age_days: i64,

    /// Whether successful billing passes queue an invoice e-mail at all.
    #[serde(default = "default_send_invoice_emails")]
    pub send_invoice_emails: bool,

    /// Subscriptions may not start further in the past than this.
    #[serde(default = "default_max_past_start_years")]
    pub max_past_start_years: i64,

    /// Tighter past-start window for AutoPay customers.
    #[serde(default = "default_autopay_max_past_start_days")]
    pub autopay_max_past_start_days: i64,

    /// Creation collects synchronously when the first invoice is due within
    /// this many seconds.
    #[serde(default = "default_autopay_collect_window_secs")]
    pub autopay_collect_window_secs: i64,
}

fn default_billing_lock_ttl_secs() -> u64 {
    120
}

fn default_invoice_email_max_age_days() -> i64 {
    32
}

fn default_send_invoice_emails() -> bool {
    true
}

fn default_max_past_start_years() -> i64 {
    5
}

fn default_autopay_max_past_start_days() -> i64 {
    32
}

fn default_autopay_collect_window_secs() -> i64 {
    3600
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            billing_lock_ttl_secs: default_billing_lock_ttl_secs(),
            invoice_email_max_age_days: default_invoice_email_max_age_days(),
            send_invoice_emails: default_send_invoice_emails(),
            max_past_start_years: default_max_past_start_years(),
            autopay_max_past_start_days: default_autopay_max_past_start_days(),
            autopay_collect_window_secs: default_autopay_collect_window_secs(),
        }
    }
}

impl EngineConfig {
    pub fn load() -> Result<Self, BillingError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("BILLING").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_without_file_or_environment_yields_the_defaults() {
        let config = EngineConfig::load().unwrap();
        assert_eq!(config.billing_lock_ttl_secs, 120);
        assert_eq!(config.invoice_email_max_age_days, 32);
        assert!(config.send_invoice_emails);
        assert_eq!(config.max_past_start_years, 5);
        assert_eq!(config.autopay_max_past_start_days, 32);
        assert_eq!(config.autopay_collect_window_secs, 3600);
    }
}
