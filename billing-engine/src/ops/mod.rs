//! Engine operations.
//!
//! [`BillingEngine`] owns the injected collaborators and exposes the billing
//! pass, contract renewal and the mutation entry points. Every state-mutating
//! operation runs under the per-subscription billing lock; each operation
//! touches exactly one subscription.

mod billing;
mod create;
mod mutate;
mod renewal;

pub use billing::contract_term_is_complete;

use crate::collab::{InvoiceBuilder, Outbox, PaymentCollector};
use crate::config::EngineConfig;
use crate::error::BillingError;
use crate::lock::LockProvider;
use crate::models::{BillingPlan, Subscription};
use crate::pricing;
use crate::store::SubscriptionStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

pub struct BillingEngine {
    config: EngineConfig,
    store: Arc<dyn SubscriptionStore>,
    locks: Arc<dyn LockProvider>,
    invoices: Arc<dyn InvoiceBuilder>,
    payments: Arc<dyn PaymentCollector>,
    outbox: Arc<dyn Outbox>,
}

impl BillingEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn SubscriptionStore>,
        locks: Arc<dyn LockProvider>,
        invoices: Arc<dyn InvoiceBuilder>,
        payments: Arc<dyn PaymentCollector>,
        outbox: Arc<dyn Outbox>,
    ) -> Self {
        Self {
            config,
            store,
            locks,
            invoices,
            payments,
            outbox,
        }
    }

    pub(crate) fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.config.billing_lock_ttl_secs)
    }

    /// Run a mutation under the subscription's billing lock, releasing it on
    /// every exit path. Contention surfaces as a conflict: unlike the billing
    /// pass, user-initiated mutations must not be silently skipped.
    pub(crate) async fn with_lock<T>(
        &self,
        key: &str,
        fut: impl Future<Output = Result<T, BillingError>>,
    ) -> Result<T, BillingError> {
        if !self.locks.try_acquire(key, self.lock_ttl()).await? {
            return Err(BillingError::Conflict(anyhow::anyhow!(
                "subscription is locked by a concurrent billing operation, try again shortly"
            )));
        }
        let result = fut.await;
        if let Err(e) = self.locks.release(key).await {
            tracing::error!(error = %e, key, "failed to release billing lock");
        }
        result
    }

    pub(crate) async fn require_subscription(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<Subscription, BillingError> {
        self.store
            .load_subscription(tenant_id, subscription_id)
            .await?
            .ok_or_else(|| {
                BillingError::NotFound(anyhow::anyhow!(
                    "subscription {} not found",
                    subscription_id
                ))
            })
    }

    pub(crate) async fn require_plan(
        &self,
        tenant_id: Uuid,
        plan_id: Uuid,
    ) -> Result<BillingPlan, BillingError> {
        self.store
            .load_plan(tenant_id, plan_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(anyhow::anyhow!("plan {} not found", plan_id)))
    }

    /// Recompute MRR and the recurring total, then persist. Runs outside the
    /// billing transaction: a failure here is logged and never undoes a
    /// committed billing pass or mutation.
    pub(crate) async fn recompute_financials(&self, sub: &mut Subscription) {
        let result: Result<(), BillingError> = async {
            let plan = self.require_plan(sub.tenant_id, sub.plan_id).await?;
            let addons = self.store.load_addons(sub.tenant_id, &sub.addon_ids).await?;
            sub.recurring_total = pricing::recurring_total(&plan, &addons);
            sub.mrr = pricing::mrr(&plan, &addons);
            self.store.save_subscription(sub).await
        }
        .await;

        if let Err(e) = result {
            warn!(
                error = %e,
                subscription_id = %sub.subscription_id,
                "failed to recompute subscription financials"
            );
        }
    }
}
