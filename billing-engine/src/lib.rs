//! Recurring subscription billing engine.
//!
//! Computes billing periods, generates recurring and proration invoices,
//! enforces fixed-cycle contract terms and drives the subscription lifecycle.
//! Persistence, invoice pricing, payment collection and e-mail delivery are
//! injected behind traits; the in-memory implementations in [`memory`] back
//! the test suite and single-node deployments.

pub mod collab;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod memory;
pub mod models;
pub mod ops;
pub mod period;
pub mod pricing;
pub mod proration;
pub mod store;

pub use config::EngineConfig;
pub use error::BillingError;
pub use lifecycle::{lifecycle_state, LifecycleState};
pub use models::{
    Addon, BillIn, BillingInterval, BillingPeriod, BillingPlan, ContractRenewalMode,
    CouponRedemption, Customer, Invoice, InvoiceStatus, NewCouponRedemption, NewSubscription,
    Subscription, SubscriptionPatch,
};
pub use ops::{contract_term_is_complete, BillingEngine};
pub use period::PeriodCalculator;
