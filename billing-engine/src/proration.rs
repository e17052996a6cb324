//! Mid-cycle modification analysis.
//!
//! Compares a subscription's pre- and post-modification snapshots and decides
//! which compensating line items the invoice builder must produce, and at what
//! dates. The pricing math itself stays with the (out-of-scope) builder.
//!
//! A modification that changes the billing interval or its duration is not
//! prorated at all: the caller discards the remainder of the old cycle and
//! starts a fresh one immediately.

use crate::models::{BillingPlan, Subscription};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of a compensating line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    /// Unused time on the old plan or add-on is credited back.
    Credit,
    /// Time on the new plan or add-on is charged.
    Charge,
}

/// What the delta applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProrationItem {
    Plan(Uuid),
    Addon(Uuid),
}

/// One compensating line item the invoice builder should price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProrationDelta {
    pub kind: DeltaKind,
    pub item: ProrationItem,
    /// Proration instant: start of the compensated window.
    pub from: DateTime<Utc>,
    /// End of the compensated window, the current period end.
    pub to: DateTime<Utc>,
}

pub struct ProrationEngine;

impl ProrationEngine {
    /// True when the modification altered the billing cycle itself rather
    /// than price or composition. Such edits restart the cycle instead of
    /// prorating within it.
    pub fn changed_cycle(before: &BillingPlan, after: &BillingPlan) -> bool {
        before.interval() != after.interval() || before.interval_count != after.interval_count
    }

    /// Compensating deltas for a plan/add-on change effective at `at`.
    ///
    /// Only called when the subscription's `prorate` flag is set for this
    /// modification; an unchanged composition yields no deltas.
    pub fn deltas(
        before: &Subscription,
        after: &Subscription,
        at: DateTime<Utc>,
    ) -> Vec<ProrationDelta> {
        let to = before.period_end;
        let mut deltas = Vec::new();

        if before.plan_id != after.plan_id {
            deltas.push(ProrationDelta {
                kind: DeltaKind::Credit,
                item: ProrationItem::Plan(before.plan_id),
                from: at,
                to,
            });
            deltas.push(ProrationDelta {
                kind: DeltaKind::Charge,
                item: ProrationItem::Plan(after.plan_id),
                from: at,
                to,
            });
        }

        for removed in before
            .addon_ids
            .iter()
            .filter(|id| !after.addon_ids.contains(id))
        {
            deltas.push(ProrationDelta {
                kind: DeltaKind::Credit,
                item: ProrationItem::Addon(*removed),
                from: at,
                to,
            });
        }

        for added in after
            .addon_ids
            .iter()
            .filter(|id| !before.addon_ids.contains(id))
        {
            deltas.push(ProrationDelta {
                kind: DeltaKind::Charge,
                item: ProrationItem::Addon(*added),
                from: at,
                to,
            });
        }

        deltas
    }
}
