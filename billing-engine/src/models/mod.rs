//! Data models for the billing engine.

mod coupon;
mod customer;
mod invoice;
mod period;
mod plan;
mod subscription;

pub use coupon::CouponRedemption;
pub use customer::Customer;
pub use invoice::{Invoice, InvoiceStatus, LineItem};
pub use period::BillingPeriod;
pub use plan::{Addon, BillingInterval, BillingPlan};
pub use subscription::{
    BillIn, ContractRenewalMode, NewCouponRedemption, NewSubscription, Subscription,
    SubscriptionPatch,
};
