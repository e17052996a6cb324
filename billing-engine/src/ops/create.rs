//! Subscription creation.
//!
//! Creation validates everything up front, assembles the aggregate in memory,
//! runs the first billing pass on that in-memory state when a bill is already
//! due, and only then persists the whole lot in one commit. Auto-pay
//! collection happens before the commit, so a declined card rolls the entire
//! creation back and nothing ever exists half-created.

use super::BillingEngine;
use crate::collab::{EmailTemplate, PaymentMode};
use crate::error::BillingError;
use crate::lifecycle::refresh_status;
use crate::models::{
    BillingPeriod, ContractRenewalMode, CouponRedemption, Customer, Invoice, InvoiceStatus,
    NewSubscription, Subscription,
};
use crate::period::{contract_period_from, PeriodCalculator};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;

impl BillingEngine {
    #[instrument(
        skip(self, input),
        fields(tenant_id = %input.tenant_id, customer_id = %input.customer_id, plan_id = %input.plan_id)
    )]
    pub async fn create(&self, input: NewSubscription) -> Result<Subscription, BillingError> {
        let now = Utc::now();
        let start_date = input.start_date.unwrap_or(now);

        let customer = self
            .store
            .load_customer(input.tenant_id, input.customer_id)
            .await?
            .ok_or_else(|| {
                BillingError::NotFound(anyhow::anyhow!("customer {} not found", input.customer_id))
            })?;
        let plan = self.require_plan(input.tenant_id, input.plan_id).await?;

        if !plan.is_active {
            return Err(BillingError::Validation(anyhow::anyhow!(
                "plan '{}' is not active and cannot be subscribed to",
                plan.name
            )));
        }
        if plan.base_price < Decimal::ZERO {
            return Err(BillingError::Validation(anyhow::anyhow!(
                "plan '{}' has a negative base price",
                plan.name
            )));
        }

        let addons = self
            .store
            .load_addons(input.tenant_id, &input.addon_ids)
            .await?;
        if addons.len() != input.addon_ids.len() {
            return Err(BillingError::Validation(anyhow::anyhow!(
                "one or more add-ons do not exist for this tenant"
            )));
        }

        if input.cycles < 0 {
            return Err(BillingError::Validation(anyhow::anyhow!(
                "contract cycles cannot be negative"
            )));
        }
        if input.cycles == 0 && input.contract_renewal_mode != ContractRenewalMode::None {
            return Err(BillingError::Validation(anyhow::anyhow!(
                "a contract renewal mode requires a fixed number of cycles"
            )));
        }

        self.validate_start_date(&customer, start_date, now)?;
        PeriodCalculator::validate_calendar_billing(&plan, input.snap_to_nth_day)?;

        let subscription_id = Uuid::new_v4();
        let mut sub = Subscription {
            subscription_id,
            tenant_id: input.tenant_id,
            customer_id: input.customer_id,
            plan_id: input.plan_id,
            addon_ids: input.addon_ids.clone(),
            coupon_redemption_ids: Vec::new(),
            start_date,
            period_start: start_date,
            period_end: start_date,
            renews_next: None,
            renewed_last: None,
            num_invoices: 0,
            bill_in: input.bill_in.as_str().into(),
            bill_in_advance_days: input.bill_in_advance_days.max(0),
            snap_to_nth_day: input.snap_to_nth_day.filter(|d| *d > 0),
            cycles: input.cycles,
            contract_period_start: None,
            contract_period_end: None,
            contract_renewal_mode: input.contract_renewal_mode.as_str().into(),
            contract_renewal_cycles: input.contract_renewal_cycles,
            pending_renewal: false,
            paused: false,
            canceled: false,
            canceled_at: None,
            cancellation_reason: None,
            cancel_at_period_end: false,
            finished: false,
            status: String::new(),
            mrr: Decimal::ZERO,
            recurring_total: Decimal::ZERO,
            prorate: true,
            created_utc: now,
            updated_utc: now,
        };

        let initial = PeriodCalculator::new(&plan, &sub).initial()?;
        sub.period_start = initial.start;
        sub.period_end = initial.end;
        sub.renews_next = Some(initial.bill_date);

        if sub.has_contract() {
            let (contract_start, contract_end) =
                contract_period_from(start_date, &plan, sub.cycles);
            sub.contract_period_start = Some(contract_start);
            sub.contract_period_end = Some(contract_end);
        }

        let mut redemptions: Vec<CouponRedemption> = input
            .coupons
            .iter()
            .map(|coupon| CouponRedemption {
                redemption_id: Uuid::new_v4(),
                coupon_id: coupon.coupon_id,
                subscription_id,
                num_uses: 0,
                duration_limit: coupon.duration_limit,
                active: true,
                created_utc: now,
            })
            .collect();
        sub.coupon_redemption_ids = redemptions.iter().map(|r| r.redemption_id).collect();

        refresh_status(&mut sub, now);

        // Day-one billing runs entirely on the in-memory aggregate; a pricing
        // or payment failure here aborts the creation with nothing persisted.
        let mut invoice = None;
        if self.needs_billing(&sub, now) {
            let period = BillingPeriod {
                start: sub.period_start,
                end: sub.period_end,
                bill_date: sub.renews_next.unwrap_or(sub.period_end),
            };
            let mut built = self.invoices.build(&sub, &plan, &period).await?;
            self.advance_after_invoice(&mut sub, &plan, &mut redemptions, now)?;

            if self.should_collect_now(&customer, &built, now) {
                self.payments.collect(&built, PaymentMode::AutoPay).await?;
                built.mark_paid();
                info!(
                    subscription_id = %subscription_id,
                    invoice_id = %built.invoice_id,
                    "first invoice collected via auto-pay"
                );
            }
            invoice = Some(built);
        }

        self.store
            .commit(&sub, invoice.as_ref(), &redemptions)
            .await?;
        info!(
            subscription_id = %subscription_id,
            status = %sub.status,
            billed_at_creation = invoice.is_some(),
            "subscription created"
        );

        self.recompute_financials(&mut sub).await;
        if let Err(e) = self
            .outbox
            .spool_subscription_email(&sub, EmailTemplate::SubscriptionConfirmed, false)
            .await
        {
            warn!(
                error = %e,
                subscription_id = %subscription_id,
                "failed to spool confirmation email"
            );
        }

        Ok(sub)
    }

    fn validate_start_date(
        &self,
        customer: &Customer,
        start_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        let hard_floor = now - Duration::days(365 * self.config.max_past_start_years);
        if start_date < hard_floor {
            return Err(BillingError::Validation(anyhow::anyhow!(
                "start date lies more than {} years in the past",
                self.config.max_past_start_years
            )));
        }

        // Backdating an auto-pay subscription would charge the card for a
        // pile of historical periods in one go.
        if customer.auto_pay
            && start_date < now - Duration::days(self.config.autopay_max_past_start_days)
        {
            return Err(BillingError::Validation(anyhow::anyhow!(
                "auto-pay subscriptions cannot start more than {} days in the past",
                self.config.autopay_max_past_start_days
            )));
        }
        Ok(())
    }

    /// Collect synchronously only when the customer can actually be charged
    /// and the invoice is both payable and due within the collection window.
    fn should_collect_now(
        &self,
        customer: &Customer,
        invoice: &Invoice,
        now: DateTime<Utc>,
    ) -> bool {
        customer.auto_pay
            && customer.has_payment_method
            && invoice.total > Decimal::ZERO
            && invoice.invoice_status() != InvoiceStatus::Draft
            && invoice
                .due_date
                .map(|due| due <= now + Duration::seconds(self.config.autopay_collect_window_secs))
                .unwrap_or(true)
    }
}
