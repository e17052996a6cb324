//! Derived financials.
//!
//! Recomputed after every mutation, outside the billing transaction. Coupon
//! discounts are applied by the invoice builder and are deliberately not
//! reflected here.

use crate::models::{Addon, BillingInterval, BillingPlan};
use rust_decimal::Decimal;

/// Recurring charge per billing period: plan base price plus active add-ons.
pub fn recurring_total(plan: &BillingPlan, addons: &[Addon]) -> Decimal {
    let addon_total: Decimal = addons
        .iter()
        .filter(|a| a.is_active)
        .map(|a| a.price)
        .sum();
    plan.base_price + addon_total
}

/// Monthly-recurring-revenue equivalent of a per-period amount.
pub fn monthly_equivalent(
    amount: Decimal,
    interval: BillingInterval,
    interval_count: i32,
) -> Decimal {
    let count = Decimal::from(interval_count.max(1));
    match interval {
        BillingInterval::Daily => amount * Decimal::from(30) / count,
        BillingInterval::Weekly => amount * Decimal::from(30) / (Decimal::from(7) * count),
        BillingInterval::Monthly => amount / count,
        BillingInterval::Quarterly => amount / (Decimal::from(3) * count),
        BillingInterval::Annually => amount / (Decimal::from(12) * count),
    }
}

/// MRR for one subscription under its plan and add-ons.
pub fn mrr(plan: &BillingPlan, addons: &[Addon]) -> Decimal {
    monthly_equivalent(
        recurring_total(plan, addons),
        plan.interval(),
        plan.interval_count,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn plan(interval: BillingInterval, count: i32, price: i64) -> BillingPlan {
        BillingPlan {
            plan_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "Test".into(),
            description: None,
            billing_interval: interval.as_str().into(),
            interval_count: count,
            base_price: Decimal::from(price),
            currency: "USD".into(),
            is_active: true,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    #[test]
    fn annual_plan_mrr_is_one_twelfth() {
        let p = plan(BillingInterval::Annually, 1, 1200);
        assert_eq!(mrr(&p, &[]), Decimal::from(100));
    }

    #[test]
    fn quarterly_plan_mrr_is_one_third() {
        let p = plan(BillingInterval::Quarterly, 1, 300);
        assert_eq!(mrr(&p, &[]), Decimal::from(100));
    }

    #[test]
    fn inactive_addons_are_excluded_from_recurring_total() {
        let p = plan(BillingInterval::Monthly, 1, 100);
        let addons = vec![
            Addon {
                addon_id: Uuid::new_v4(),
                tenant_id: p.tenant_id,
                name: "Support".into(),
                price: Decimal::from(20),
                is_active: true,
                created_utc: Utc::now(),
            },
            Addon {
                addon_id: Uuid::new_v4(),
                tenant_id: p.tenant_id,
                name: "Legacy".into(),
                price: Decimal::from(50),
                is_active: false,
                created_utc: Utc::now(),
            },
        ];
        assert_eq!(recurring_total(&p, &addons), Decimal::from(120));
        assert_eq!(mrr(&p, &addons), Decimal::from(120));
    }

    #[test]
    fn multi_month_interval_divides_down() {
        let p = plan(BillingInterval::Monthly, 6, 600);
        assert_eq!(mrr(&p, &[]), Decimal::from(100));
    }
}
