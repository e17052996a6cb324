//! Customer model, read-only from the engine's point of view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub customer_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    /// Collection is attempted automatically for AutoPay customers.
    pub auto_pay: bool,
    pub has_payment_method: bool,
    pub created_utc: DateTime<Utc>,
}
