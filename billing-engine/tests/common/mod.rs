//! Shared test harness: an engine wired to in-memory collaborators with
//! handles kept around for seeding and inspection.

#![allow(dead_code)]

use billing_engine::memory::{
    FlatRateInvoiceBuilder, MemoryStore, RecordingOutbox, ScriptedCollector,
};
use billing_engine::lock::MemoryLockProvider;
use billing_engine::store::SubscriptionStore;
use billing_engine::{
    Addon, BillingEngine, BillingInterval, BillingPlan, Customer, EngineConfig, Subscription,
};
use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

static TRACING: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub struct Harness {
    pub engine: BillingEngine,
    pub store: Arc<MemoryStore>,
    pub locks: Arc<MemoryLockProvider>,
    pub invoices: Arc<FlatRateInvoiceBuilder>,
    pub payments: Arc<ScriptedCollector>,
    pub outbox: Arc<RecordingOutbox>,
    pub tenant_id: Uuid,
}

impl Harness {
    pub fn new() -> Self {
        Lazy::force(&TRACING);
        let store = Arc::new(MemoryStore::new());
        let locks = Arc::new(MemoryLockProvider::new());
        let invoices = Arc::new(FlatRateInvoiceBuilder::new());
        let payments = Arc::new(ScriptedCollector::new());
        let outbox = Arc::new(RecordingOutbox::new());

        let engine = BillingEngine::new(
            EngineConfig::default(),
            store.clone(),
            locks.clone(),
            invoices.clone(),
            payments.clone(),
            outbox.clone(),
        );

        Self {
            engine,
            store,
            locks,
            invoices,
            payments,
            outbox,
            tenant_id: Uuid::new_v4(),
        }
    }

    pub fn seed_plan(&self, interval: BillingInterval, count: i32, price: i64) -> BillingPlan {
        let now = Utc::now();
        let plan = BillingPlan {
            plan_id: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            name: format!("{} plan", interval.as_str()),
            description: None,
            billing_interval: interval.as_str().into(),
            interval_count: count,
            base_price: Decimal::from(price),
            currency: "USD".into(),
            is_active: true,
            created_utc: now,
            updated_utc: now,
        };
        self.store.seed_plan(plan.clone());
        plan
    }

    pub fn seed_monthly_plan(&self, price: i64) -> BillingPlan {
        self.seed_plan(BillingInterval::Monthly, 1, price)
    }

    pub fn seed_inactive_plan(&self, price: i64) -> BillingPlan {
        let mut plan = self.seed_monthly_plan(price);
        plan.is_active = false;
        self.store.seed_plan(plan.clone());
        plan
    }

    pub fn seed_customer(&self, auto_pay: bool, has_payment_method: bool) -> Customer {
        let customer = Customer {
            customer_id: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            name: "Ada Example".into(),
            email: Some("ada@example.com".into()),
            auto_pay,
            has_payment_method,
            created_utc: Utc::now(),
        };
        self.store.seed_customer(customer.clone());
        customer
    }

    pub fn seed_addon(&self, price: i64, is_active: bool) -> Addon {
        let addon = Addon {
            addon_id: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            name: "Priority support".into(),
            price: Decimal::from(price),
            is_active,
            created_utc: Utc::now(),
        };
        self.store.seed_addon(addon.clone());
        addon
    }

    pub fn subscription(&self, subscription_id: Uuid) -> Subscription {
        self.store
            .subscription(subscription_id)
            .expect("subscription should exist")
    }

    /// Pull the next bill date into the past so the next pass finds a bill due.
    pub async fn make_due(&self, subscription_id: Uuid) {
        let mut sub = self.subscription(subscription_id);
        sub.renews_next = Some(Utc::now() - Duration::seconds(5));
        self.store.save_subscription(&sub).await.unwrap();
    }
}
