//! Persistence interface.
//!
//! The engine owns the subscription aggregate but not its storage. A store is
//! assumed strongly consistent within a tenant. `commit` is the transaction
//! boundary of a billing pass: the subscription, the invoice and the coupon
//! redemptions persist together or not at all, so an invoice can never exist
//! without its subscription having advanced, or vice versa. No commit ever
//! spans more than one subscription.

use crate::error::BillingError;
use crate::models::{Addon, BillingPlan, CouponRedemption, Customer, Invoice, Subscription};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn load_subscription(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, BillingError>;

    async fn load_plan(
        &self,
        tenant_id: Uuid,
        plan_id: Uuid,
    ) -> Result<Option<BillingPlan>, BillingError>;

    async fn load_addons(
        &self,
        tenant_id: Uuid,
        addon_ids: &[Uuid],
    ) -> Result<Vec<Addon>, BillingError>;

    async fn load_customer(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Option<Customer>, BillingError>;

    async fn load_redemptions(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<CouponRedemption>, BillingError>;

    /// Persist a subscription mutation with no invoice attached.
    async fn save_subscription(&self, sub: &Subscription) -> Result<(), BillingError>;

    /// Atomically persist a subscription together with an optional invoice
    /// and its coupon redemption rows. A failure persists nothing.
    async fn commit(
        &self,
        sub: &Subscription,
        invoice: Option<&Invoice>,
        redemptions: &[CouponRedemption],
    ) -> Result<(), BillingError>;
}
