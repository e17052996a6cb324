//! Subscription aggregate.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Whether a period is billed at its start or at its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillIn {
    Advance,
    Arrears,
}

impl BillIn {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillIn::Advance => "advance",
            BillIn::Arrears => "arrears",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "arrears" => BillIn::Arrears,
            _ => BillIn::Advance,
        }
    }
}

/// What happens when a fixed-cycle contract term completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractRenewalMode {
    None,
    Manual,
    Auto,
    RenewOnce,
}

impl ContractRenewalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractRenewalMode::None => "none",
            ContractRenewalMode::Manual => "manual",
            ContractRenewalMode::Auto => "auto",
            ContractRenewalMode::RenewOnce => "renew_once",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "manual" => ContractRenewalMode::Manual,
            "auto" => ContractRenewalMode::Auto,
            "renew_once" => ContractRenewalMode::RenewOnce,
            _ => ContractRenewalMode::None,
        }
    }
}

/// Subscription.
///
/// The boolean flags are the source of truth for the lifecycle; `status` is
/// derived from them after every mutation and must never disagree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub tenant_id: Uuid,
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    pub addon_ids: Vec<Uuid>,
    pub coupon_redemption_ids: Vec<Uuid>,

    // Billing cycle state
    pub start_date: DateTime<Utc>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    /// Next scheduled bill date; `None` means billing is not scheduled.
    pub renews_next: Option<DateTime<Utc>>,
    pub renewed_last: Option<DateTime<Utc>>,
    /// Invoices billed within the current contract term, not lifetime.
    pub num_invoices: i32,
    pub bill_in: String,
    pub bill_in_advance_days: i64,
    /// Calendar billing anchor; `None` means anniversary billing.
    pub snap_to_nth_day: Option<u32>,

    // Contract state (`cycles == 0` means no fixed contract)
    pub cycles: i32,
    pub contract_period_start: Option<DateTime<Utc>>,
    pub contract_period_end: Option<DateTime<Utc>>,
    pub contract_renewal_mode: String,
    pub contract_renewal_cycles: Option<i32>,
    pub pending_renewal: bool,

    // Lifecycle flags
    pub paused: bool,
    pub canceled: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub cancel_at_period_end: bool,
    pub finished: bool,
    pub status: String,

    // Derived financials, recomputed after every mutation
    pub mrr: Decimal,
    pub recurring_total: Decimal,

    /// Request-scoped: whether the next modification generates proration lines.
    pub prorate: bool,

    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Subscription {
    pub fn billing_mode(&self) -> BillIn {
        BillIn::from_string(&self.bill_in)
    }

    pub fn renewal_mode(&self) -> ContractRenewalMode {
        ContractRenewalMode::from_string(&self.contract_renewal_mode)
    }

    pub fn has_contract(&self) -> bool {
        self.cycles > 0
    }

    pub fn calendar_billing(&self) -> bool {
        self.snap_to_nth_day.unwrap_or(0) > 0
    }

    /// Whether the current contract term has been billed in full.
    pub fn contract_cycles_reached(&self) -> bool {
        self.has_contract() && self.num_invoices >= self.cycles
    }
}

/// Coupon attached at creation time.
#[derive(Debug, Clone)]
pub struct NewCouponRedemption {
    pub coupon_id: Uuid,
    /// Billing passes the coupon applies to; 0 means unlimited.
    pub duration_limit: i32,
}

/// Input for creating a subscription.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub tenant_id: Uuid,
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    pub addon_ids: Vec<Uuid>,
    pub coupons: Vec<NewCouponRedemption>,
    /// Defaults to "now" when absent.
    pub start_date: Option<DateTime<Utc>>,
    pub bill_in: BillIn,
    pub bill_in_advance_days: i64,
    pub snap_to_nth_day: Option<u32>,
    pub cycles: i32,
    pub contract_renewal_mode: ContractRenewalMode,
    pub contract_renewal_cycles: Option<i32>,
}

impl NewSubscription {
    /// Minimal monthly-anniversary input; tests and callers override fields.
    pub fn new(tenant_id: Uuid, customer_id: Uuid, plan_id: Uuid) -> Self {
        Self {
            tenant_id,
            customer_id,
            plan_id,
            addon_ids: Vec::new(),
            coupons: Vec::new(),
            start_date: None,
            bill_in: BillIn::Advance,
            bill_in_advance_days: 0,
            snap_to_nth_day: None,
            cycles: 0,
            contract_renewal_mode: ContractRenewalMode::None,
            contract_renewal_cycles: None,
        }
    }
}

/// Input for editing a subscription. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionPatch {
    pub plan_id: Option<Uuid>,
    pub addon_ids: Option<Vec<Uuid>>,
    /// Rejected whenever it differs from the current customer.
    pub customer_id: Option<Uuid>,
    /// Pause/resume through the edit surface, kept for API compatibility.
    pub paused: Option<bool>,
    pub bill_in: Option<BillIn>,
    pub bill_in_advance_days: Option<i64>,
    /// `Some(0)` clears the calendar anchor.
    pub snap_to_nth_day: Option<u32>,
    pub cycles: Option<i32>,
    pub contract_renewal_mode: Option<ContractRenewalMode>,
    pub contract_renewal_cycles: Option<i32>,
    /// Proration is on by default; callers opt out explicitly.
    pub prorate: Option<bool>,
}
