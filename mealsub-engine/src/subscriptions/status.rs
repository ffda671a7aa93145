//! Display status resolution.
//!
//! Status is derived from dates on every call and never cached, so a record
//! that was `inactive` yesterday resolves to `active` on its start day without
//! any write to the store.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::models::Subscription;

/// Status of a subscription as seen by the customer at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedStatus {
    /// Deliveries are running today.
    Active,
    /// Paid, first delivery is in the future.
    Inactive,
    /// The cycle has ended.
    Completed,
    /// Cancelled regardless of dates.
    Cancelled,
}

impl ResolvedStatus {
    /// Returns `true` for statuses that make a record the user's current plan.
    #[must_use]
    pub const fn is_current(self) -> bool {
        matches!(self, Self::Active | Self::Inactive)
    }

    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ResolvedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves a status from raw dates.
///
/// Rules, first match wins:
///
/// 1. cancelled flag set → `Cancelled`
/// 2. today is the start day → `Active`
/// 3. today is on or after the end day → `Completed`
/// 4. today is after the start day → `Active`
/// 5. otherwise → `Inactive`
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use mealsub_engine::subscriptions::{ResolvedStatus, resolve_dates};
///
/// let start = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
/// let end = NaiveDate::from_ymd_opt(2025, 3, 31).unwrap();
///
/// let today = NaiveDate::from_ymd_opt(2025, 3, 15).unwrap();
/// assert_eq!(resolve_dates(start, end, false, today), ResolvedStatus::Active);
/// assert_eq!(resolve_dates(start, end, false, end), ResolvedStatus::Completed);
/// ```
#[must_use]
pub fn resolve_dates(
    start_date: NaiveDate,
    end_date: NaiveDate,
    cancelled: bool,
    today: NaiveDate,
) -> ResolvedStatus {
    if cancelled {
        return ResolvedStatus::Cancelled;
    }
    if today == start_date {
        return ResolvedStatus::Active;
    }
    if today >= end_date {
        return ResolvedStatus::Completed;
    }
    if today > start_date {
        return ResolvedStatus::Active;
    }
    ResolvedStatus::Inactive
}

/// Resolves the status of a stored subscription at `now`.
#[must_use]
pub fn resolve_status(subscription: &Subscription, now: DateTime<Utc>) -> ResolvedStatus {
    resolve_dates(
        subscription.start_date,
        subscription.effective_end_date(),
        subscription.is_cancelled(),
        now.date_naive(),
    )
}
