//! Action classification for a new plan selection.
//!
//! Decides whether a selection modifies, upgrades or renews the customer's
//! existing subscription, or starts a fresh one.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    models::{DietaryPreference, PlanType, Subscription},
    status::{ResolvedStatus, resolve_status},
};

/// Action to take for a selection, without the matched record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// No current or past plan; create a fresh subscription.
    None,
    /// Same diet and tier as the current plan; change delivery details only.
    Modify,
    /// Different diet or tier than the current plan.
    Upgrade,
    /// Only completed plans exist.
    Renew,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "NONE",
            Self::Modify => "MODIFY",
            Self::Upgrade => "UPGRADE",
            Self::Renew => "RENEW",
        })
    }
}

/// Classification result carrying the record that decided it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification<'a> {
    /// No subscription history.
    None,
    /// Current plan matches the selection.
    Modify {
        /// The current subscription.
        current: &'a Subscription,
        /// Its resolved status (`Active` or `Inactive`).
        status: ResolvedStatus,
    },
    /// Current plan differs from the selection.
    Upgrade {
        /// The current subscription.
        previous: &'a Subscription,
        /// Its resolved status (`Active` or `Inactive`).
        status: ResolvedStatus,
    },
    /// Only a completed plan exists.
    Renew {
        /// The completed subscription.
        previous: &'a Subscription,
    },
}

impl<'a> Classification<'a> {
    /// Returns the action tag.
    #[must_use]
    pub const fn action(&self) -> Action {
        match self {
            Self::None => Action::None,
            Self::Modify { .. } => Action::Modify,
            Self::Upgrade { .. } => Action::Upgrade,
            Self::Renew { .. } => Action::Renew,
        }
    }

    /// Returns the subscription the classification is based on, if any.
    #[must_use]
    pub const fn subscription(&self) -> Option<&'a Subscription> {
        match *self {
            Self::None => None,
            Self::Modify { current, .. } => Some(current),
            Self::Upgrade { previous, .. } | Self::Renew { previous } => Some(previous),
        }
    }

    /// Returns the resolved status of the matched subscription, if any.
    #[must_use]
    pub const fn previous_status(&self) -> Option<ResolvedStatus> {
        match *self {
            Self::None => None,
            Self::Modify { status, .. } | Self::Upgrade { status, .. } => Some(status),
            Self::Renew { .. } => Some(ResolvedStatus::Completed),
        }
    }
}

/// Classifies a selection against a user's subscriptions.
///
/// The first record resolving to `active` or `inactive` is the current plan.
/// Only when there is none is the first `completed` record consulted. Records
/// are examined in slice order; no recency sort is applied.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use mealsub_engine::subscriptions::{Action, DietaryPreference, PlanType, classify};
///
/// let classification = classify(&[], DietaryPreference::Veg, PlanType::Basic, Utc::now());
/// assert_eq!(classification.action(), Action::None);
/// ```
#[must_use]
pub fn classify(
    subscriptions: &[Subscription],
    diet: DietaryPreference,
    plan_type: PlanType,
    now: DateTime<Utc>,
) -> Classification<'_> {
    if let Some((current, status)) = first_current(subscriptions, now) {
        return classify_against_current(current, status, diet, plan_type);
    }
    match first_completed(subscriptions, now) {
        Some(previous) => Classification::Renew { previous },
        None => Classification::None,
    }
}

fn first_current(
    subscriptions: &[Subscription],
    now: DateTime<Utc>,
) -> Option<(&Subscription, ResolvedStatus)> {
    subscriptions.iter().find_map(|sub| {
        let status = resolve_status(sub, now);
        status.is_current().then_some((sub, status))
    })
}

fn first_completed(subscriptions: &[Subscription], now: DateTime<Utc>) -> Option<&Subscription> {
    subscriptions.iter().find(|sub| resolve_status(sub, now) == ResolvedStatus::Completed)
}

fn classify_against_current(
    current: &Subscription,
    status: ResolvedStatus,
    diet: DietaryPreference,
    plan_type: PlanType,
) -> Classification<'_> {
    if current.dietary_preference == diet && current.plan_type == plan_type {
        Classification::Modify { current, status }
    } else {
        Classification::Upgrade { previous: current, status }
    }
}
