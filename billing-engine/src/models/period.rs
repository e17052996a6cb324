//! Billing period value object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One billing period and the instant its invoice should be generated.
///
/// `bill_date` falls at the start of the period (minus any advance-billing
/// lead) for in-advance billing, or at the end for arrears billing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub bill_date: DateTime<Utc>,
}
