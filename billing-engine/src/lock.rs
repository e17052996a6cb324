//! Per-subscription billing locks.
//!
//! Every state-mutating billing operation runs under a named, time-bounded
//! mutex keyed by subscription. Acquisition failure means another worker owns
//! the subscription right now; it is expected contention, never an error.
//! A stuck lock self-heals when its TTL expires, but holders still release on
//! every exit path so future passes are not starved for the full TTL.

use crate::error::BillingError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Lock key for one subscription's billing mutations. Scoped per tenant so
/// no lock ever spans more than one subscription.
pub fn billing_lock_key(tenant_id: Uuid, subscription_id: Uuid) -> String {
    format!("billing:{}:{}", tenant_id, subscription_id)
}

/// Mutual-exclusion provider. Implementations may back onto a distributed
/// lock service; the engine depends only on this interface.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Try to take the named lock for `ttl`. Returns false when another
    /// holder owns it and its TTL has not yet expired.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool, BillingError>;

    /// Release the named lock. Releasing an expired or absent lock is a no-op.
    async fn release(&self, key: &str) -> Result<(), BillingError>;
}

/// In-process lock provider for single-node deployments and tests.
#[derive(Default)]
pub struct MemoryLockProvider {
    held: DashMap<String, Instant>,
}

impl MemoryLockProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockProvider for MemoryLockProvider {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool, BillingError> {
        let now = Instant::now();
        match self.held.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() <= now {
                    // Previous holder's TTL elapsed; the lock self-heals.
                    entry.insert(now + ttl);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now + ttl);
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str) -> Result<(), BillingError> {
        self.held.remove(key);
        Ok(())
    }
}
