//! Subscription lifecycle.
//!
//! The persisted boolean flags are the source of truth; exactly one state
//! applies at any instant, derived here and nowhere else. Operations ask
//! [`lifecycle_state`] (or the guards below) instead of re-deriving state
//! from flags inline.

use crate::error::BillingError;
use crate::models::Subscription;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Trialing,
    Active,
    Paused,
    PendingRenewal,
    Finished,
    Canceled,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Trialing => "trialing",
            LifecycleState::Active => "active",
            LifecycleState::Paused => "paused",
            LifecycleState::PendingRenewal => "pending_renewal",
            LifecycleState::Finished => "finished",
            LifecycleState::Canceled => "canceled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "trialing" => LifecycleState::Trialing,
            "paused" => LifecycleState::Paused,
            "pending_renewal" => LifecycleState::PendingRenewal,
            "finished" => LifecycleState::Finished,
            "canceled" => LifecycleState::Canceled,
            _ => LifecycleState::Active,
        }
    }

    /// Canceled and Finished admit no further mutation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Canceled | LifecycleState::Finished)
    }
}

/// Derive the single lifecycle state from a subscription's flags.
///
/// Flag priority mirrors the transition rules: terminal flags win, then
/// paused, then a pending manual renewal, then the trial window.
pub fn lifecycle_state(sub: &Subscription, now: DateTime<Utc>) -> LifecycleState {
    if sub.canceled {
        LifecycleState::Canceled
    } else if sub.finished {
        LifecycleState::Finished
    } else if sub.paused {
        LifecycleState::Paused
    } else if sub.pending_renewal {
        LifecycleState::PendingRenewal
    } else if now < sub.start_date {
        LifecycleState::Trialing
    } else {
        LifecycleState::Active
    }
}

/// Re-derive and store the subscription's `status` field.
pub fn refresh_status(sub: &mut Subscription, now: DateTime<Utc>) {
    sub.status = lifecycle_state(sub, now).as_str().to_string();
    sub.updated_utc = now;
}

/// Reject any mutation of a terminally canceled or finished subscription.
pub fn ensure_mutable(sub: &Subscription, now: DateTime<Utc>) -> Result<(), BillingError> {
    let state = lifecycle_state(sub, now);
    if state.is_terminal() {
        return Err(BillingError::InvalidState(anyhow::anyhow!(
            "subscription {} is {} and cannot be reactivated - create a new subscription",
            sub.subscription_id,
            state.as_str()
        )));
    }
    Ok(())
}
