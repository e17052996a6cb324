//! In-process collaborator implementations.
//!
//! Single-node store, flat-rate invoice builder, recording outbox and a
//! scriptable payment collector. Production deployments substitute their own
//! implementations behind the same traits; the engine never knows the
//! difference.

use crate::collab::{EmailTemplate, InvoiceBuilder, Outbox, PaymentCollector, PaymentMode};
use crate::error::BillingError;
use crate::models::{
    Addon, BillingPeriod, BillingPlan, CouponRedemption, Customer, Invoice, InvoiceStatus,
    LineItem, Subscription,
};
use crate::proration::{DeltaKind, ProrationDelta};
use crate::store::SubscriptionStore;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Default)]
struct StoreInner {
    subscriptions: HashMap<Uuid, Subscription>,
    plans: HashMap<Uuid, BillingPlan>,
    addons: HashMap<Uuid, Addon>,
    customers: HashMap<Uuid, Customer>,
    redemptions: HashMap<Uuid, CouponRedemption>,
    invoices: HashMap<Uuid, Invoice>,
}

/// In-memory store. All maps sit behind one lock, which is what makes
/// `commit` genuinely atomic here.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_plan(&self, plan: BillingPlan) {
        self.inner.write().unwrap().plans.insert(plan.plan_id, plan);
    }

    pub fn seed_addon(&self, addon: Addon) {
        self.inner
            .write()
            .unwrap()
            .addons
            .insert(addon.addon_id, addon);
    }

    pub fn seed_customer(&self, customer: Customer) {
        self.inner
            .write()
            .unwrap()
            .customers
            .insert(customer.customer_id, customer);
    }

    pub fn seed_redemption(&self, redemption: CouponRedemption) {
        self.inner
            .write()
            .unwrap()
            .redemptions
            .insert(redemption.redemption_id, redemption);
    }

    pub fn subscription(&self, subscription_id: Uuid) -> Option<Subscription> {
        self.inner
            .read()
            .unwrap()
            .subscriptions
            .get(&subscription_id)
            .cloned()
    }

    pub fn invoices_for(&self, subscription_id: Uuid) -> Vec<Invoice> {
        let mut invoices: Vec<Invoice> = self
            .inner
            .read()
            .unwrap()
            .invoices
            .values()
            .filter(|i| i.subscription_id == subscription_id)
            .cloned()
            .collect();
        invoices.sort_by_key(|i| i.created_utc);
        invoices
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.read().unwrap().subscriptions.len()
    }

    pub fn invoice_count(&self) -> usize {
        self.inner.read().unwrap().invoices.len()
    }

    pub fn redemption(&self, redemption_id: Uuid) -> Option<CouponRedemption> {
        self.inner
            .read()
            .unwrap()
            .redemptions
            .get(&redemption_id)
            .cloned()
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn load_subscription(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, BillingError> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .subscriptions
            .get(&subscription_id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    async fn load_plan(
        &self,
        tenant_id: Uuid,
        plan_id: Uuid,
    ) -> Result<Option<BillingPlan>, BillingError> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .plans
            .get(&plan_id)
            .filter(|p| p.tenant_id == tenant_id)
            .cloned())
    }

    async fn load_addons(
        &self,
        tenant_id: Uuid,
        addon_ids: &[Uuid],
    ) -> Result<Vec<Addon>, BillingError> {
        let inner = self.inner.read().unwrap();
        Ok(addon_ids
            .iter()
            .filter_map(|id| inner.addons.get(id))
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn load_customer(
        &self,
        tenant_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Option<Customer>, BillingError> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .customers
            .get(&customer_id)
            .filter(|c| c.tenant_id == tenant_id)
            .cloned())
    }

    async fn load_redemptions(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<CouponRedemption>, BillingError> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .redemptions
            .values()
            .filter(|r| r.subscription_id == subscription_id)
            .cloned()
            .collect())
    }

    async fn save_subscription(&self, sub: &Subscription) -> Result<(), BillingError> {
        self.inner
            .write()
            .unwrap()
            .subscriptions
            .insert(sub.subscription_id, sub.clone());
        Ok(())
    }

    async fn commit(
        &self,
        sub: &Subscription,
        invoice: Option<&Invoice>,
        redemptions: &[CouponRedemption],
    ) -> Result<(), BillingError> {
        let mut inner = self.inner.write().unwrap();
        inner.subscriptions.insert(sub.subscription_id, sub.clone());
        if let Some(invoice) = invoice {
            inner.invoices.insert(invoice.invoice_id, invoice.clone());
        }
        for redemption in redemptions {
            inner
                .redemptions
                .insert(redemption.redemption_id, redemption.clone());
        }
        Ok(())
    }
}

/// Invoice builder that charges the plan's base price per period and prorates
/// by elapsed seconds. Stands in for the real pricing/tax pipeline.
#[derive(Default)]
pub struct FlatRateInvoiceBuilder {
    fail_with_pricing_error: AtomicBool,
}

impl FlatRateInvoiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent build fail, to exercise error propagation.
    pub fn fail_builds(&self, fail: bool) {
        self.fail_with_pricing_error.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl InvoiceBuilder for FlatRateInvoiceBuilder {
    async fn build(
        &self,
        sub: &Subscription,
        plan: &BillingPlan,
        period: &BillingPeriod,
    ) -> Result<Invoice, BillingError> {
        if self.fail_with_pricing_error.load(Ordering::SeqCst) {
            return Err(BillingError::Pricing(anyhow::anyhow!(
                "scripted pricing failure"
            )));
        }

        let now = Utc::now();
        Ok(Invoice {
            invoice_id: Uuid::new_v4(),
            tenant_id: sub.tenant_id,
            subscription_id: sub.subscription_id,
            customer_id: sub.customer_id,
            status: InvoiceStatus::Issued.as_str().into(),
            currency: plan.currency.clone(),
            total: plan.base_price,
            issue_date: now,
            due_date: Some(period.bill_date),
            line_items: vec![LineItem {
                description: plan.name.clone(),
                amount: plan.base_price,
                period_start: period.start,
                period_end: period.end,
                prorated: false,
            }],
            created_utc: now,
        })
    }

    async fn build_proration(
        &self,
        sub: &Subscription,
        plan: &BillingPlan,
        deltas: &[ProrationDelta],
    ) -> Result<Option<Invoice>, BillingError> {
        if self.fail_with_pricing_error.load(Ordering::SeqCst) {
            return Err(BillingError::Pricing(anyhow::anyhow!(
                "scripted pricing failure"
            )));
        }
        if deltas.is_empty() {
            return Ok(None);
        }

        let now = Utc::now();
        let mut total = Decimal::ZERO;
        let mut line_items = Vec::with_capacity(deltas.len());
        for delta in deltas {
            let window = (delta.to - delta.from).num_seconds().max(0);
            let period = (delta.to - sub.period_start).num_seconds().max(1);
            let fraction = Decimal::from(window) / Decimal::from(period);
            let amount = match delta.kind {
                DeltaKind::Charge => plan.base_price * fraction,
                DeltaKind::Credit => -(plan.base_price * fraction),
            };
            total += amount;
            line_items.push(LineItem {
                description: format!("{:?} adjustment", delta.kind),
                amount,
                period_start: delta.from,
                period_end: delta.to,
                prorated: true,
            });
        }

        Ok(Some(Invoice {
            invoice_id: Uuid::new_v4(),
            tenant_id: sub.tenant_id,
            subscription_id: sub.subscription_id,
            customer_id: sub.customer_id,
            status: InvoiceStatus::Issued.as_str().into(),
            currency: plan.currency.clone(),
            total,
            issue_date: now,
            due_date: Some(now),
            line_items,
            created_utc: now,
        }))
    }
}

/// Outbox that records every spooled document instead of sending anything.
#[derive(Default)]
pub struct RecordingOutbox {
    fail_spools: AtomicBool,
    invoice_emails: Mutex<Vec<(Uuid, &'static str)>>,
    subscription_emails: Mutex<Vec<(Uuid, &'static str)>>,
}

impl RecordingOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent spool fail, to verify best-effort semantics.
    pub fn fail_spools(&self, fail: bool) {
        self.fail_spools.store(fail, Ordering::SeqCst);
    }

    pub fn invoice_emails(&self) -> Vec<(Uuid, &'static str)> {
        self.invoice_emails.lock().unwrap().clone()
    }

    pub fn subscription_emails(&self) -> Vec<(Uuid, &'static str)> {
        self.subscription_emails.lock().unwrap().clone()
    }
}

#[async_trait]
impl Outbox for RecordingOutbox {
    async fn spool_invoice_email(
        &self,
        invoice: &Invoice,
        template: EmailTemplate,
        _required: bool,
    ) -> Result<(), BillingError> {
        if self.fail_spools.load(Ordering::SeqCst) {
            return Err(BillingError::Email("scripted spool failure".into()));
        }
        self.invoice_emails
            .lock()
            .unwrap()
            .push((invoice.invoice_id, template.as_str()));
        Ok(())
    }

    async fn spool_subscription_email(
        &self,
        sub: &Subscription,
        template: EmailTemplate,
        _required: bool,
    ) -> Result<(), BillingError> {
        if self.fail_spools.load(Ordering::SeqCst) {
            return Err(BillingError::Email("scripted spool failure".into()));
        }
        self.subscription_emails
            .lock()
            .unwrap()
            .push((sub.subscription_id, template.as_str()));
        Ok(())
    }
}

/// Payment collector that succeeds or fails on command.
#[derive(Default)]
pub struct ScriptedCollector {
    fail_collections: AtomicBool,
    collected: Mutex<Vec<Uuid>>,
}

impl ScriptedCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_collections(&self, fail: bool) {
        self.fail_collections.store(fail, Ordering::SeqCst);
    }

    pub fn collected(&self) -> Vec<Uuid> {
        self.collected.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentCollector for ScriptedCollector {
    async fn collect(&self, invoice: &Invoice, _mode: PaymentMode) -> Result<(), BillingError> {
        if self.fail_collections.load(Ordering::SeqCst) {
            return Err(BillingError::Payment(anyhow::anyhow!(
                "card declined by gateway"
            )));
        }
        self.collected.lock().unwrap().push(invoice.invoice_id);
        Ok(())
    }
}
