//! Per-user settlement locks.
//!
//! A second settlement for a user who already has one running fails fast
//! instead of queueing: the first one may be waiting minutes on a checkout.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::{
    error::{EngineError, Result},
    subscriptions::UserId,
};

/// Map of per-user advisory locks.
#[derive(Debug, Default, Clone)]
pub struct SettlementLocks {
    locks: Arc<Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>>,
}

/// Held while a settlement runs; released on drop.
#[derive(Debug)]
pub struct SettlementGuard {
    _guard: OwnedMutexGuard<()>,
}

impl SettlementLocks {
    /// Creates an empty lock map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lock for `user_id` without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SettlementInProgress`] if the lock is held.
    pub fn try_acquire(&self, user_id: &UserId) -> Result<SettlementGuard> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);

        // Entries referenced only by the map are not held by anyone.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);

        let lock = Arc::clone(locks.entry(user_id.clone()).or_default());
        drop(locks);

        lock.try_lock_owned()
            .map(|guard| SettlementGuard { _guard: guard })
            .map_err(|_| EngineError::SettlementInProgress(user_id.to_string()))
    }

    /// Number of users with a tracked lock.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
