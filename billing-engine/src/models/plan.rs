//! Billing plan and add-on models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Billing interval for plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Annually,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Daily => "daily",
            BillingInterval::Weekly => "weekly",
            BillingInterval::Monthly => "monthly",
            BillingInterval::Quarterly => "quarterly",
            BillingInterval::Annually => "annually",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "daily" => BillingInterval::Daily,
            "weekly" => BillingInterval::Weekly,
            "quarterly" => BillingInterval::Quarterly,
            "annually" => BillingInterval::Annually,
            _ => BillingInterval::Monthly,
        }
    }
}

/// Billing plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingPlan {
    pub plan_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub billing_interval: String,
    pub interval_count: i32,
    pub base_price: Decimal,
    pub currency: String,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl BillingPlan {
    pub fn interval(&self) -> BillingInterval {
        BillingInterval::from_string(&self.billing_interval)
    }
}

/// Recurring add-on billed alongside a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Addon {
    pub addon_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}
