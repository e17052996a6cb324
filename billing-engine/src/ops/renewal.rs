//! Explicit contract renewal.
//!
//! Manual-mode contracts stop billing when their term completes and wait in
//! `pending_renewal` until someone approves another term. Approval generates
//! the renewal invoice and opens the new term in one locked pass.

use super::billing::{advance_contract_period, apply_coupon_redemptions};
use super::BillingEngine;
use crate::error::BillingError;
use crate::lifecycle::{ensure_mutable, refresh_status};
use crate::lock::billing_lock_key;
use crate::models::{BillIn, BillingPeriod, ContractRenewalMode, Invoice};
use crate::period::PeriodCalculator;
use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

impl BillingEngine {
    /// Renew a manual-mode contract for another `cycles` billing periods and
    /// return the renewal invoice.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, subscription_id = %subscription_id, cycles))]
    pub async fn renew(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        cycles: i32,
    ) -> Result<Invoice, BillingError> {
        if cycles <= 0 {
            return Err(BillingError::Validation(anyhow::anyhow!(
                "a contract renewal needs at least one cycle"
            )));
        }
        let key = billing_lock_key(tenant_id, subscription_id);
        self.with_lock(
            &key,
            self.renew_locked(tenant_id, subscription_id, cycles),
        )
        .await
    }

    async fn renew_locked(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        cycles: i32,
    ) -> Result<Invoice, BillingError> {
        let now = Utc::now();
        let mut sub = self.require_subscription(tenant_id, subscription_id).await?;
        ensure_mutable(&sub, now)?;

        if sub.renewal_mode() != ContractRenewalMode::Manual {
            return Err(BillingError::InvalidState(anyhow::anyhow!(
                "subscription {} renews {} and cannot be renewed explicitly",
                subscription_id,
                sub.renewal_mode().as_str()
            )));
        }
        if !sub.has_contract() {
            return Err(BillingError::InvalidState(anyhow::anyhow!(
                "subscription {} has no fixed-cycle contract to renew",
                subscription_id
            )));
        }

        let plan = self.require_plan(tenant_id, sub.plan_id).await?;
        sub.cycles = cycles;

        // Line items always describe the period awaiting its invoice, even
        // though in-advance mode rolls the billing period before building.
        let line_period = {
            let calc = PeriodCalculator::new(&plan, &sub);
            BillingPeriod {
                start: sub.period_start,
                end: sub.period_end,
                bill_date: calc.bill_date_for(sub.period_start, sub.period_end),
            }
        };

        if sub.billing_mode() == BillIn::Advance {
            advance_period(&mut sub, &plan)?;
        }

        let invoice = self.invoices.build(&sub, &plan, &line_period).await?;

        if sub.billing_mode() == BillIn::Arrears {
            advance_period(&mut sub, &plan)?;
        }

        // The invoice just built opens the new term.
        sub.num_invoices = 1;
        advance_contract_period(&mut sub, &plan);
        sub.pending_renewal = false;
        sub.renewed_last = Some(now);

        let mut redemptions = self.store.load_redemptions(subscription_id).await?;
        apply_coupon_redemptions(&mut sub, &mut redemptions);
        refresh_status(&mut sub, now);

        self.store
            .commit(&sub, Some(&invoice), &redemptions)
            .await?;
        info!(
            subscription_id = %subscription_id,
            invoice_id = %invoice.invoice_id,
            cycles,
            "contract renewed manually"
        );

        self.finish_billing_pass(&sub, &invoice, now).await;
        Ok(invoice)
    }
}

fn advance_period(
    sub: &mut crate::models::Subscription,
    plan: &crate::models::BillingPlan,
) -> Result<(), BillingError> {
    let next = PeriodCalculator::new(plan, sub).next_period()?;
    sub.period_start = next.start;
    sub.period_end = next.end;
    sub.renews_next = Some(next.bill_date);
    Ok(())
}
