//! Coupon redemption bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One coupon attached to one subscription.
///
/// `num_uses` advances once per successful billing pass; the redemption goes
/// inactive when a finite `duration_limit` is reached. Redemption rows are
/// only ever mutated by the lock holder billing the parent subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponRedemption {
    pub redemption_id: Uuid,
    pub coupon_id: Uuid,
    pub subscription_id: Uuid,
    pub num_uses: i32,
    /// 0 means the coupon never expires by use count.
    pub duration_limit: i32,
    pub active: bool,
    pub created_utc: DateTime<Utc>,
}

impl CouponRedemption {
    pub fn exhausted(&self) -> bool {
        self.duration_limit > 0 && self.num_uses >= self.duration_limit
    }
}
