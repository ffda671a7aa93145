//! In-memory backends.
//!
//! Used by the test suites and for local runs. Cloning shares the same data.
//! The store keeps insertion order so classification sees records in the
//! order they were created, like the production API returns them.

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicU32, Ordering},
    },
};

use async_trait::async_trait;
use chrono::Days;
use uuid::Uuid;

use super::traits::{
    AddressBook, DeliveryAddress, ModifyRequest, NewSubscription, PlanCatalog, SubscriptionPatch,
    SubscriptionStore,
};
use crate::{
    error::{EngineError, Result},
    subscriptions::{
        AddressId, DietaryPreference, Plan, Subscription, SubscriptionId, SubscriptionStatus,
        UserId,
    },
};

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| EngineError::StoreError("in-memory store lock poisoned".into()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| EngineError::StoreError("in-memory store lock poisoned".into()))
}

/// Consumes one injected failure, if any are pending.
fn take_failure(counter: &AtomicU32, operation: &str) -> Result<()> {
    let pending = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    if pending.is_ok() {
        return Err(EngineError::StoreError(format!("injected {operation} failure")));
    }
    Ok(())
}

/// In-memory [`SubscriptionStore`].
#[derive(Debug, Default, Clone)]
pub struct InMemorySubscriptionStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    subscriptions: RwLock<Vec<Subscription>>,
    failing_patches: AtomicU32,
    failing_modifies: AtomicU32,
    failing_creates: AtomicU32,
    writes: AtomicU32,
}

impl InMemorySubscriptionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `subscriptions` in the given order.
    #[must_use]
    pub fn with_subscriptions(subscriptions: Vec<Subscription>) -> Self {
        let store = Self::default();
        if let Ok(mut guard) = store.inner.subscriptions.write() {
            *guard = subscriptions;
        }
        store
    }

    /// Returns a snapshot of a stored record.
    ///
    /// # Errors
    ///
    /// Returns error if the store lock is poisoned.
    pub fn get(&self, id: &SubscriptionId) -> Result<Option<Subscription>> {
        Ok(read(&self.inner.subscriptions)?.iter().find(|sub| &sub.id == id).cloned())
    }

    /// Number of successful writes since creation.
    #[must_use]
    pub fn write_count(&self) -> u32 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Makes the next `count` patch calls fail with a store error.
    pub fn fail_next_patches(&self, count: u32) {
        self.inner.failing_patches.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` modify calls fail with a store error.
    pub fn fail_next_modifies(&self, count: u32) {
        self.inner.failing_modifies.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` create calls fail with a store error.
    pub fn fail_next_creates(&self, count: u32) {
        self.inner.failing_creates.store(count, Ordering::SeqCst);
    }

    fn update<F>(&self, id: &SubscriptionId, apply: F) -> Result<Subscription>
    where
        F: FnOnce(&mut Subscription) -> Result<()>,
    {
        let mut subscriptions = write(&self.inner.subscriptions)?;
        let record = subscriptions
            .iter_mut()
            .find(|sub| &sub.id == id)
            .ok_or_else(|| EngineError::SubscriptionNotFound(id.to_string()))?;

        apply(record)?;
        record.version += 1;
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(record.clone())
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn list_subscriptions(&self, user_id: &UserId) -> Result<Vec<Subscription>> {
        Ok(read(&self.inner.subscriptions)?
            .iter()
            .filter(|sub| &sub.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn create_subscription(&self, payload: NewSubscription) -> Result<Subscription> {
        take_failure(&self.inner.failing_creates, "create")?;

        let id = SubscriptionId::new(format!("sub-{}", Uuid::new_v4().simple()))?;
        let subscription = Subscription {
            id,
            user_id: payload.user_id,
            plan_type: payload.plan_type,
            dietary_preference: payload.dietary_preference,
            price: Some(payload.price),
            person_count: payload.person_count,
            meals_per_month: payload.meals_per_month,
            start_date: payload.start_date,
            end_date: None,
            status: SubscriptionStatus::Active,
            delivery_address_id: payload.delivery_address_id,
            time_slot: payload.time_slot,
            wallet_credit_applied: None,
            extra_charge_applied: None,
            version: 1,
        };

        write(&self.inner.subscriptions)?.push(subscription.clone());
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(subscription)
    }

    async fn patch_subscription(
        &self,
        id: &SubscriptionId,
        patch: SubscriptionPatch,
    ) -> Result<Subscription> {
        take_failure(&self.inner.failing_patches, "patch")?;

        self.update(id, |record| {
            if record.version != patch.expected_version {
                return Err(EngineError::VersionConflict {
                    id: id.to_string(),
                    expected: patch.expected_version,
                });
            }
            record.plan_type = patch.plan_type;
            record.dietary_preference = patch.dietary_preference;
            record.price = Some(patch.price);
            record.person_count = patch.person_count;
            record.meals_per_month = patch.meals_per_month;
            record.start_date = patch.start_date;
            record.end_date = None;
            record.status = SubscriptionStatus::Active;
            record.delivery_address_id = patch.delivery_address_id;
            record.time_slot = patch.time_slot;
            record.wallet_credit_applied = patch.wallet_credit_applied;
            record.extra_charge_applied = patch.extra_charge_applied;
            Ok(())
        })
    }

    async fn modify_subscription(
        &self,
        id: &SubscriptionId,
        request: ModifyRequest,
    ) -> Result<Subscription> {
        take_failure(&self.inner.failing_modifies, "modify")?;

        self.update(id, |record| {
            // Keep the cycle length when the start day moves.
            if record.end_date.is_some() {
                record.end_date = request
                    .resume_date
                    .checked_add_days(Days::new(u64::from(record.meals_per_month)));
            }
            record.start_date = request.resume_date;
            record.time_slot = request.time_slot;
            record.delivery_address_id = request.delivery_address_id;
            record.person_count = request.person_count;
            Ok(())
        })
    }

    async fn update_subscription_status(
        &self,
        id: &SubscriptionId,
        status: SubscriptionStatus,
    ) -> Result<Subscription> {
        self.update(id, |record| {
            record.status = status;
            Ok(())
        })
    }

    async fn extend_subscription(&self, id: &SubscriptionId, days: u32) -> Result<Subscription> {
        self.update(id, |record| {
            let extended = record
                .effective_end_date()
                .checked_add_days(Days::new(u64::from(days)))
                .ok_or_else(|| EngineError::InvalidDate("extension overflows the calendar".into()))?;
            record.end_date = Some(extended);
            Ok(())
        })
    }
}

/// In-memory [`PlanCatalog`].
#[derive(Debug, Default, Clone)]
pub struct InMemoryPlanCatalog {
    plans: Arc<RwLock<Vec<Plan>>>,
}

impl InMemoryPlanCatalog {
    /// Creates a catalog holding `plans`.
    #[must_use]
    pub fn new(plans: Vec<Plan>) -> Self {
        Self { plans: Arc::new(RwLock::new(plans)) }
    }
}

#[async_trait]
impl PlanCatalog for InMemoryPlanCatalog {
    async fn list_plans(&self, diet: DietaryPreference) -> Result<Vec<Plan>> {
        Ok(read(&self.plans)?
            .iter()
            .filter(|plan| plan.dietary_preference == diet)
            .cloned()
            .collect())
    }
}

/// In-memory [`AddressBook`].
#[derive(Debug, Default, Clone)]
pub struct InMemoryAddressBook {
    addresses: Arc<RwLock<HashMap<AddressId, DeliveryAddress>>>,
}

impl InMemoryAddressBook {
    /// Creates an address book holding `addresses`.
    #[must_use]
    pub fn new(addresses: Vec<DeliveryAddress>) -> Self {
        let map = addresses.into_iter().map(|address| (address.id.clone(), address)).collect();
        Self { addresses: Arc::new(RwLock::new(map)) }
    }
}

#[async_trait]
impl AddressBook for InMemoryAddressBook {
    async fn address(&self, id: &AddressId) -> Result<Option<DeliveryAddress>> {
        Ok(read(&self.addresses)?.get(id).cloned())
    }
}
