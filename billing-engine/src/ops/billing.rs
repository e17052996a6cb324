//! The recurring billing pass.
//!
//! `bill` is the idempotent heart of the engine: it is safe to call for any
//! subscription at any time and only produces an invoice when one is actually
//! due. Billing daemons call it in a loop; mutations that restructure the
//! cycle call into the locked body directly while already holding the lock.

use super::BillingEngine;
use crate::collab::EmailTemplate;
use crate::error::BillingError;
use crate::lifecycle::refresh_status;
use crate::lock::billing_lock_key;
use crate::models::{
    BillIn, BillingPeriod, BillingPlan, ContractRenewalMode, CouponRedemption, Invoice,
    InvoiceStatus, Subscription,
};
use crate::period::{contract_period_from, PeriodCalculator};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Whether the current contract term has been billed to completion.
///
/// In-advance billing generates the first invoice of the *next* term while
/// the current term is still running, so completion is only reached one
/// invoice later than the cycle count — except for non-renewing contracts,
/// which stop dead at the last paid-for period.
pub fn contract_term_is_complete(sub: &Subscription) -> bool {
    if !sub.has_contract() {
        return false;
    }
    let renews = sub.renewal_mode() != ContractRenewalMode::None;
    let threshold = if sub.billing_mode() == BillIn::Advance && renews {
        sub.cycles + 1
    } else {
        sub.cycles
    };
    sub.num_invoices >= threshold
}

/// Consume one use from every active redemption and drop the exhausted ones
/// from the subscription's active set.
pub(crate) fn apply_coupon_redemptions(
    sub: &mut Subscription,
    redemptions: &mut [CouponRedemption],
) {
    for redemption in redemptions.iter_mut().filter(|r| r.active) {
        redemption.num_uses += 1;
        if redemption.exhausted() {
            redemption.active = false;
        }
    }
    sub.coupon_redemption_ids = redemptions
        .iter()
        .filter(|r| r.active)
        .map(|r| r.redemption_id)
        .collect();
}

/// Roll the contract period forward by one term, chaining off the previous
/// term's end so terms stay adjacent at one-second granularity.
pub(crate) fn advance_contract_period(sub: &mut Subscription, plan: &BillingPlan) {
    let start = sub
        .contract_period_end
        .map(|end| end + Duration::seconds(1))
        .unwrap_or(sub.period_start);
    let (contract_start, contract_end) = contract_period_from(start, plan, sub.cycles);
    sub.contract_period_start = Some(contract_start);
    sub.contract_period_end = Some(contract_end);
}

impl BillingEngine {
    /// Run one billing pass for a subscription.
    ///
    /// Returns `Ok(None)` when nothing is due, the subscription is gone, or
    /// another pass holds the billing lock; lock contention is not an error
    /// because the other holder is doing this exact work.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, subscription_id = %subscription_id))]
    pub async fn bill(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        perform_cancellations: bool,
    ) -> Result<Option<Invoice>, BillingError> {
        let key = billing_lock_key(tenant_id, subscription_id);
        if !self.locks.try_acquire(&key, self.lock_ttl()).await? {
            debug!("billing lock held elsewhere, skipping");
            return Ok(None);
        }

        let result = self
            .bill_locked(tenant_id, subscription_id, perform_cancellations)
            .await;

        if let Err(e) = self.locks.release(&key).await {
            tracing::error!(error = %e, key, "failed to release billing lock");
        }
        result
    }

    /// The billing pass body. Caller must hold the subscription's billing
    /// lock; state is reloaded here so the decision to bill is always made
    /// on post-acquisition data.
    pub(crate) async fn bill_locked(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        perform_cancellations: bool,
    ) -> Result<Option<Invoice>, BillingError> {
        let now = Utc::now();

        let Some(mut sub) = self
            .store
            .load_subscription(tenant_id, subscription_id)
            .await?
        else {
            return Ok(None);
        };

        if !self.needs_billing(&sub, now) {
            return Ok(None);
        }

        // End-of-period cancellation takes precedence over generating the
        // next invoice, but never cuts a contract term short.
        if perform_cancellations
            && sub.cancel_at_period_end
            && (!sub.has_contract() || sub.contract_cycles_reached())
        {
            self.apply_cancellation(&mut sub, now, None);
            self.store.save_subscription(&sub).await?;
            info!(
                subscription_id = %sub.subscription_id,
                "subscription canceled at period end"
            );
            return Ok(None);
        }

        let plan = self
            .store
            .load_plan(tenant_id, sub.plan_id)
            .await?
            .ok_or_else(|| {
                BillingError::NotFound(anyhow::anyhow!("plan {} no longer exists", sub.plan_id))
            })?;

        let period = BillingPeriod {
            start: sub.period_start,
            end: sub.period_end,
            bill_date: sub.renews_next.unwrap_or(sub.period_end),
        };
        let invoice = self.invoices.build(&sub, &plan, &period).await?;

        let mut redemptions = self.store.load_redemptions(sub.subscription_id).await?;
        self.advance_after_invoice(&mut sub, &plan, &mut redemptions, now)?;

        self.store
            .commit(&sub, Some(&invoice), &redemptions)
            .await?;
        info!(
            subscription_id = %sub.subscription_id,
            invoice_id = %invoice.invoice_id,
            total = %invoice.total,
            "billing pass generated invoice"
        );

        self.finish_billing_pass(&sub, &invoice, now).await;
        Ok(Some(invoice))
    }

    /// Whether a bill is due right now.
    pub(crate) fn needs_billing(&self, sub: &Subscription, now: DateTime<Utc>) -> bool {
        let Some(renews_next) = sub.renews_next else {
            return false;
        };
        if sub.canceled || sub.paused {
            return false;
        }
        // Without an advance lead the bill date can never sit before the
        // subscription exists.
        let due = if sub.bill_in_advance_days == 0 {
            renews_next.max(sub.start_date)
        } else {
            renews_next
        };
        due <= now
    }

    /// Bookkeeping after an invoice is built and before the commit: advance
    /// the billing period, count the invoice against the contract term,
    /// resolve term completion and consume coupon redemptions.
    pub(crate) fn advance_after_invoice(
        &self,
        sub: &mut Subscription,
        plan: &BillingPlan,
        redemptions: &mut [CouponRedemption],
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        let next = PeriodCalculator::new(plan, sub).next_period()?;
        sub.period_start = next.start;
        sub.period_end = next.end;
        sub.renews_next = Some(next.bill_date);
        sub.renewed_last = Some(now);
        sub.num_invoices += 1;

        if contract_term_is_complete(sub) {
            self.complete_contract_term(sub, plan)?;
        }

        apply_coupon_redemptions(sub, redemptions);
        refresh_status(sub, now);
        Ok(())
    }

    /// Dispatch on the renewal mode once a contract term is billed in full.
    fn complete_contract_term(
        &self,
        sub: &mut Subscription,
        plan: &BillingPlan,
    ) -> Result<(), BillingError> {
        match sub.renewal_mode() {
            ContractRenewalMode::None => {
                sub.finished = true;
                sub.renews_next = None;
                sub.contract_period_start = None;
                sub.contract_period_end = None;
                info!(
                    subscription_id = %sub.subscription_id,
                    "contract term complete, subscription finished"
                );
            }
            ContractRenewalMode::Manual => {
                sub.pending_renewal = true;
                // Arrears bills the term's last invoice inside the term, so
                // the contract period must roll here; in-advance defers the
                // roll to the explicit renewal.
                if sub.billing_mode() == BillIn::Arrears {
                    advance_contract_period(sub, plan);
                }
                sub.renews_next = None;
                info!(
                    subscription_id = %sub.subscription_id,
                    "contract term complete, awaiting manual renewal"
                );
            }
            ContractRenewalMode::Auto | ContractRenewalMode::RenewOnce => {
                self.renew_contract(sub, plan)?;
            }
        }
        Ok(())
    }

    /// Open a new contract term. The invoice counted just before this call
    /// belongs to the new term.
    pub(crate) fn renew_contract(
        &self,
        sub: &mut Subscription,
        plan: &BillingPlan,
    ) -> Result<(), BillingError> {
        if !sub.has_contract() {
            return Err(BillingError::InvalidState(anyhow::anyhow!(
                "subscription {} has no fixed-cycle contract to renew",
                sub.subscription_id
            )));
        }

        if let Some(next_cycles) = sub.contract_renewal_cycles.filter(|c| *c > 0) {
            sub.cycles = next_cycles;
        }
        if sub.renewal_mode() == ContractRenewalMode::RenewOnce {
            // One automatic renewal, then a human decides again.
            sub.contract_renewal_mode = ContractRenewalMode::Manual.as_str().into();
        }

        sub.num_invoices = 1;
        advance_contract_period(sub, plan);
        sub.pending_renewal = false;

        if sub.renews_next.is_none() {
            let bill_date =
                PeriodCalculator::new(plan, sub).bill_date_for(sub.period_start, sub.period_end);
            sub.renews_next = Some(bill_date);
        }

        info!(
            subscription_id = %sub.subscription_id,
            cycles = sub.cycles,
            "contract renewed"
        );
        Ok(())
    }

    /// Post-commit effects: refresh derived financials and spool the invoice
    /// e-mail. Failures here are logged, never propagated; the invoice is
    /// already committed.
    pub(crate) async fn finish_billing_pass(
        &self,
        sub: &Subscription,
        invoice: &Invoice,
        now: DateTime<Utc>,
    ) {
        let mut updated = sub.clone();
        self.recompute_financials(&mut updated).await;

        if self.invoice_email_qualifies(invoice, now) {
            if let Err(e) = self
                .outbox
                .spool_invoice_email(invoice, EmailTemplate::InvoiceIssued, false)
                .await
            {
                warn!(
                    error = %e,
                    invoice_id = %invoice.invoice_id,
                    "failed to spool invoice email"
                );
            }
        }
    }

    /// Zero-total, draft, already-paid and stale invoices never notify.
    fn invoice_email_qualifies(&self, invoice: &Invoice, now: DateTime<Utc>) -> bool {
        self.config.send_invoice_emails
            && invoice.total > Decimal::ZERO
            && invoice.invoice_status() != InvoiceStatus::Draft
            && invoice.invoice_status() != InvoiceStatus::Paid
            && now - invoice.issue_date <= Duration::days(self.config.invoice_email_max_age_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn subscription() -> Subscription {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        Subscription {
            subscription_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            addon_ids: vec![],
            coupon_redemption_ids: vec![],
            start_date: start,
            period_start: start,
            period_end: start,
            renews_next: None,
            renewed_last: None,
            num_invoices: 0,
            bill_in: BillIn::Advance.as_str().into(),
            bill_in_advance_days: 0,
            snap_to_nth_day: None,
            cycles: 0,
            contract_period_start: None,
            contract_period_end: None,
            contract_renewal_mode: ContractRenewalMode::None.as_str().into(),
            contract_renewal_cycles: None,
            pending_renewal: false,
            paused: false,
            canceled: false,
            canceled_at: None,
            cancellation_reason: None,
            cancel_at_period_end: false,
            finished: false,
            status: "active".into(),
            mrr: Decimal::ZERO,
            recurring_total: Decimal::ZERO,
            prorate: true,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    #[test]
    fn contractless_subscriptions_never_complete_a_term() {
        let mut sub = subscription();
        sub.num_invoices = 100;
        assert!(!contract_term_is_complete(&sub));
    }

    #[test]
    fn advance_renewing_contract_completes_one_invoice_late() {
        let mut sub = subscription();
        sub.cycles = 3;
        sub.contract_renewal_mode = ContractRenewalMode::Auto.as_str().into();

        sub.num_invoices = 3;
        assert!(!contract_term_is_complete(&sub));
        sub.num_invoices = 4;
        assert!(contract_term_is_complete(&sub));
    }

    #[test]
    fn non_renewing_contract_completes_at_cycle_count() {
        let mut sub = subscription();
        sub.cycles = 3;

        sub.num_invoices = 2;
        assert!(!contract_term_is_complete(&sub));
        sub.num_invoices = 3;
        assert!(contract_term_is_complete(&sub));
    }

    #[test]
    fn arrears_contract_completes_at_cycle_count_even_when_renewing() {
        let mut sub = subscription();
        sub.cycles = 3;
        sub.bill_in = BillIn::Arrears.as_str().into();
        sub.contract_renewal_mode = ContractRenewalMode::Manual.as_str().into();

        sub.num_invoices = 3;
        assert!(contract_term_is_complete(&sub));
    }

    #[test]
    fn exhausted_redemptions_leave_the_active_set() {
        let mut sub = subscription();
        let keep = CouponRedemption {
            redemption_id: Uuid::new_v4(),
            coupon_id: Uuid::new_v4(),
            subscription_id: sub.subscription_id,
            num_uses: 0,
            duration_limit: 0,
            active: true,
            created_utc: Utc::now(),
        };
        let drop = CouponRedemption {
            redemption_id: Uuid::new_v4(),
            duration_limit: 1,
            ..keep.clone()
        };
        let mut redemptions = vec![keep.clone(), drop.clone()];

        apply_coupon_redemptions(&mut sub, &mut redemptions);

        assert_eq!(redemptions[0].num_uses, 1);
        assert!(redemptions[0].active);
        assert_eq!(redemptions[1].num_uses, 1);
        assert!(!redemptions[1].active);
        assert_eq!(sub.coupon_redemption_ids, vec![keep.redemption_id]);
    }
}
