//! External collaborator interfaces.
//!
//! Invoice construction, payment collection and e-mail spooling live outside
//! the engine; the operations only decide when to call them and how failures
//! propagate. E-mail spooling with `required = false` is best-effort: the
//! orchestrator logs and swallows its failures after the transaction commits.

use crate::error::BillingError;
use crate::models::{BillingPeriod, BillingPlan, Invoice, Subscription};
use crate::proration::ProrationDelta;
use async_trait::async_trait;

/// How a payment is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMode {
    AutoPay,
    Manual,
}

impl PaymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMode::AutoPay => "auto_pay",
            PaymentMode::Manual => "manual",
        }
    }
}

/// E-mail template selected by the engine for outbox documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailTemplate {
    InvoiceIssued,
    SubscriptionConfirmed,
    SubscriptionCanceled,
}

impl EmailTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailTemplate::InvoiceIssued => "invoice_issued",
            EmailTemplate::SubscriptionConfirmed => "subscription_confirmed",
            EmailTemplate::SubscriptionCanceled => "subscription_canceled",
        }
    }
}

/// Builds invoice documents; pricing and tax math live behind this seam.
/// Line-item period dates come from the explicit `period` argument, never
/// from transient subscription state.
#[async_trait]
pub trait InvoiceBuilder: Send + Sync {
    /// Build the recurring invoice for one billing period. Pricing or tax
    /// failures surface as [`BillingError::Pricing`].
    async fn build(
        &self,
        sub: &Subscription,
        plan: &BillingPlan,
        period: &BillingPeriod,
    ) -> Result<Invoice, BillingError>;

    /// Build a proration invoice from compensating deltas. `None` when the
    /// deltas net out to nothing worth invoicing.
    async fn build_proration(
        &self,
        sub: &Subscription,
        plan: &BillingPlan,
        deltas: &[ProrationDelta],
    ) -> Result<Option<Invoice>, BillingError>;
}

/// Collects payment for an invoice through the tenant's payment gateway.
#[async_trait]
pub trait PaymentCollector: Send + Sync {
    async fn collect(&self, invoice: &Invoice, mode: PaymentMode) -> Result<(), BillingError>;
}

/// Post-commit side-effect channel. Writes happen strictly outside the
/// billing transaction so a spool failure can never undo a billing pass.
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn spool_invoice_email(
        &self,
        invoice: &Invoice,
        template: EmailTemplate,
        required: bool,
    ) -> Result<(), BillingError>;

    async fn spool_subscription_email(
        &self,
        sub: &Subscription,
        template: EmailTemplate,
        required: bool,
    ) -> Result<(), BillingError>;
}
