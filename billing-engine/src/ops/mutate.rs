//! Subscription mutations: pause, resume, cancel and edit.
//!
//! Every mutation takes the subscription's billing lock before touching
//! state; contention is a [`BillingError::Conflict`] rather than a silent
//! skip. Canceled and finished subscriptions are immutable.

use super::BillingEngine;
use crate::collab::EmailTemplate;
use crate::error::BillingError;
use crate::lifecycle::{ensure_mutable, refresh_status};
use crate::lock::billing_lock_key;
use crate::models::{ContractRenewalMode, Invoice, Subscription, SubscriptionPatch};
use crate::period::{contract_period_from, PeriodCalculator};
use crate::proration::ProrationEngine;
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

impl BillingEngine {
    /// Pause billing. The schedule is cleared; the billing period stays put
    /// and is reconciled on resume.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, subscription_id = %subscription_id))]
    pub async fn pause(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<Subscription, BillingError> {
        let key = billing_lock_key(tenant_id, subscription_id);
        self.with_lock(&key, self.pause_locked(tenant_id, subscription_id))
            .await
    }

    async fn pause_locked(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<Subscription, BillingError> {
        let now = Utc::now();
        let mut sub = self.require_subscription(tenant_id, subscription_id).await?;
        ensure_mutable(&sub, now)?;
        if sub.paused {
            return Err(BillingError::InvalidState(anyhow::anyhow!(
                "subscription {} is already paused",
                subscription_id
            )));
        }

        apply_pause(&mut sub);
        refresh_status(&mut sub, now);
        self.store.save_subscription(&sub).await?;
        info!(subscription_id = %subscription_id, "subscription paused");
        Ok(sub)
    }

    /// Resume a paused subscription, optionally with an explicit new period
    /// end. Elapsed periods are never backfilled.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, subscription_id = %subscription_id))]
    pub async fn resume(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        new_period_end: Option<DateTime<Utc>>,
    ) -> Result<Subscription, BillingError> {
        let key = billing_lock_key(tenant_id, subscription_id);
        self.with_lock(
            &key,
            self.resume_locked(tenant_id, subscription_id, new_period_end),
        )
        .await
    }

    async fn resume_locked(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        new_period_end: Option<DateTime<Utc>>,
    ) -> Result<Subscription, BillingError> {
        let now = Utc::now();
        let mut sub = self.require_subscription(tenant_id, subscription_id).await?;
        ensure_mutable(&sub, now)?;
        if !sub.paused {
            return Err(BillingError::InvalidState(anyhow::anyhow!(
                "subscription {} is not paused",
                subscription_id
            )));
        }

        let plan = self.require_plan(tenant_id, sub.plan_id).await?;
        apply_resume(&mut sub, &plan, now, new_period_end)?;
        refresh_status(&mut sub, now);
        self.store.save_subscription(&sub).await?;
        info!(
            subscription_id = %subscription_id,
            period_end = %sub.period_end,
            "subscription resumed"
        );

        self.recompute_financials(&mut sub).await;
        Ok(sub)
    }

    /// Cancel immediately or flag for cancellation at period end.
    #[instrument(skip(self, reason), fields(tenant_id = %tenant_id, subscription_id = %subscription_id, at_period_end))]
    pub async fn cancel(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        reason: Option<String>,
        at_period_end: bool,
    ) -> Result<Subscription, BillingError> {
        let key = billing_lock_key(tenant_id, subscription_id);
        self.with_lock(
            &key,
            self.cancel_locked(tenant_id, subscription_id, reason, at_period_end),
        )
        .await
    }

    async fn cancel_locked(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        reason: Option<String>,
        at_period_end: bool,
    ) -> Result<Subscription, BillingError> {
        let now = Utc::now();
        let mut sub = self.require_subscription(tenant_id, subscription_id).await?;
        if sub.canceled {
            return Err(BillingError::InvalidState(anyhow::anyhow!(
                "subscription {} is already canceled",
                subscription_id
            )));
        }
        ensure_mutable(&sub, now)?;

        if at_period_end {
            sub.cancel_at_period_end = true;
            refresh_status(&mut sub, now);
            self.store.save_subscription(&sub).await?;
            info!(
                subscription_id = %subscription_id,
                "subscription flagged for cancellation at period end"
            );
            return Ok(sub);
        }

        self.apply_cancellation(&mut sub, now, reason);
        self.store.save_subscription(&sub).await?;
        info!(subscription_id = %subscription_id, "subscription canceled");

        if let Err(e) = self
            .outbox
            .spool_subscription_email(&sub, EmailTemplate::SubscriptionCanceled, false)
            .await
        {
            warn!(
                error = %e,
                subscription_id = %subscription_id,
                "failed to spool cancellation email"
            );
        }
        Ok(sub)
    }

    /// Immediate cancellation on an in-memory aggregate; the caller persists.
    pub(crate) fn apply_cancellation(
        &self,
        sub: &mut Subscription,
        now: DateTime<Utc>,
        reason: Option<String>,
    ) {
        sub.canceled = true;
        if sub.canceled_at.is_none() {
            sub.canceled_at = Some(now);
        }
        if reason.is_some() {
            sub.cancellation_reason = reason;
        }
        sub.renews_next = None;
        sub.cancel_at_period_end = false;
        refresh_status(sub, now);
    }

    /// Edit a subscription. Plan and add-on changes generate a proration
    /// invoice unless proration is opted out; changing the billing interval
    /// or its count discards the remainder of the old cycle and runs a fresh
    /// billing pass instead.
    #[instrument(skip(self, patch), fields(tenant_id = %tenant_id, subscription_id = %subscription_id))]
    pub async fn edit(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        patch: SubscriptionPatch,
    ) -> Result<Subscription, BillingError> {
        let key = billing_lock_key(tenant_id, subscription_id);
        self.with_lock(&key, self.edit_locked(tenant_id, subscription_id, patch))
            .await
    }

    async fn edit_locked(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        patch: SubscriptionPatch,
    ) -> Result<Subscription, BillingError> {
        let now = Utc::now();
        let mut sub = self.require_subscription(tenant_id, subscription_id).await?;
        ensure_mutable(&sub, now)?;

        if let Some(customer_id) = patch.customer_id {
            if customer_id != sub.customer_id {
                return Err(BillingError::Validation(anyhow::anyhow!(
                    "the customer of a subscription cannot be changed"
                )));
            }
        }

        let old_plan = self.require_plan(tenant_id, sub.plan_id).await?;

        // Pause/resume through the edit surface behaves exactly like the
        // dedicated endpoints, minus re-locking.
        if let Some(paused) = patch.paused {
            if paused && !sub.paused {
                apply_pause(&mut sub);
            } else if !paused && sub.paused {
                apply_resume(&mut sub, &old_plan, now, None)?;
            }
        }

        let before = sub.clone();

        if let Some(plan_id) = patch.plan_id {
            sub.plan_id = plan_id;
        }
        if let Some(addon_ids) = patch.addon_ids {
            let addons = self.store.load_addons(tenant_id, &addon_ids).await?;
            if addons.len() != addon_ids.len() {
                return Err(BillingError::Validation(anyhow::anyhow!(
                    "one or more add-ons do not exist for this tenant"
                )));
            }
            sub.addon_ids = addon_ids;
        }
        if let Some(bill_in) = patch.bill_in {
            sub.bill_in = bill_in.as_str().into();
        }
        if let Some(days) = patch.bill_in_advance_days {
            sub.bill_in_advance_days = days.max(0);
        }
        if let Some(snap) = patch.snap_to_nth_day {
            sub.snap_to_nth_day = if snap == 0 { None } else { Some(snap) };
        }
        if let Some(cycles) = patch.cycles {
            if cycles < 0 {
                return Err(BillingError::Validation(anyhow::anyhow!(
                    "contract cycles cannot be negative"
                )));
            }
            sub.cycles = cycles;
        }
        if let Some(mode) = patch.contract_renewal_mode {
            sub.contract_renewal_mode = mode.as_str().into();
        }
        if let Some(renewal_cycles) = patch.contract_renewal_cycles {
            sub.contract_renewal_cycles = Some(renewal_cycles);
        }
        sub.prorate = patch.prorate.unwrap_or(true);

        if sub.cycles == 0 && sub.renewal_mode() != ContractRenewalMode::None {
            return Err(BillingError::Validation(anyhow::anyhow!(
                "a contract renewal mode requires a fixed number of cycles"
            )));
        }

        let new_plan = if sub.plan_id == old_plan.plan_id {
            old_plan.clone()
        } else {
            let plan = self.require_plan(tenant_id, sub.plan_id).await?;
            if !plan.is_active {
                return Err(BillingError::Validation(anyhow::anyhow!(
                    "plan '{}' is not active and cannot be subscribed to",
                    plan.name
                )));
            }
            plan
        };
        PeriodCalculator::validate_calendar_billing(&new_plan, sub.snap_to_nth_day)?;

        if sub.has_contract() {
            let anchor = sub.contract_period_start.unwrap_or(sub.period_start);
            let (contract_start, contract_end) =
                contract_period_from(anchor, &new_plan, sub.cycles);
            sub.contract_period_start = Some(contract_start);
            sub.contract_period_end = Some(contract_end);
        } else {
            sub.contract_period_start = None;
            sub.contract_period_end = None;
            sub.pending_renewal = false;
        }

        if ProrationEngine::changed_cycle(&old_plan, &new_plan) {
            // A new interval makes the old period meaningless: the remainder
            // is discarded and a fresh period starts now, billed immediately.
            let period = PeriodCalculator::new(&new_plan, &sub).period_starting(now)?;
            sub.period_start = period.start;
            sub.period_end = period.end;
            if !sub.paused {
                sub.renews_next = Some(period.bill_date);
            }
            refresh_status(&mut sub, now);
            self.store.save_subscription(&sub).await?;
            info!(
                subscription_id = %subscription_id,
                "billing cycle changed, starting fresh period"
            );

            self.bill_locked(tenant_id, subscription_id, false).await?;
            let mut updated = self.require_subscription(tenant_id, subscription_id).await?;
            self.recompute_financials(&mut updated).await;
            return Ok(updated);
        }

        refresh_status(&mut sub, now);

        let proration_invoice: Option<Invoice> = if sub.prorate {
            let deltas = ProrationEngine::deltas(&before, &sub, now);
            self.invoices
                .build_proration(&sub, &new_plan, &deltas)
                .await?
        } else {
            None
        };

        match &proration_invoice {
            Some(invoice) => {
                self.store.commit(&sub, Some(invoice), &[]).await?;
                info!(
                    subscription_id = %subscription_id,
                    invoice_id = %invoice.invoice_id,
                    total = %invoice.total,
                    "subscription edited with proration"
                );
            }
            None => {
                self.store.save_subscription(&sub).await?;
                info!(subscription_id = %subscription_id, "subscription edited");
            }
        }

        self.recompute_financials(&mut sub).await;
        Ok(sub)
    }
}

fn apply_pause(sub: &mut Subscription) {
    sub.paused = true;
    sub.renews_next = None;
}

fn apply_resume(
    sub: &mut Subscription,
    plan: &crate::models::BillingPlan,
    now: DateTime<Utc>,
    new_period_end: Option<DateTime<Utc>>,
) -> Result<(), BillingError> {
    let period = PeriodCalculator::new(plan, sub).resume_period(now, new_period_end)?;
    sub.period_start = period.start;
    sub.period_end = period.end;
    sub.renews_next = Some(period.bill_date);
    sub.paused = false;
    Ok(())
}
