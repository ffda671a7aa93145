//! Settlement coordinator.
//!
//! Validates a selection, classifies it against the customer's subscriptions,
//! prices it, then captures payment or records a wallet credit before
//! committing the new state through the store.
//!
//! A subscription is never written before the money for it is captured, and a
//! cancelled or failed payment writes nothing. When the store write fails
//! after a capture the caller gets [`EngineError::ReconciliationRequired`]
//! carrying the full payment proof.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{Span, error, field, info, instrument, warn};
use uuid::Uuid;

use super::{
    lifecycle::{AwaitingPayment, FirstStep, Idle, Settled, Settlement, SettlementState},
    lock::SettlementLocks,
    quote::{ChargeDecision, PlanSelection, Quote},
};
use crate::{
    audit,
    audit::AuditEventType,
    backend::{
        AddressBook, ModifyRequest, NewSubscription, PlanCatalog, SubscriptionPatch,
        SubscriptionStore,
    },
    config::EngineConfig,
    error::{EngineError, Result},
    payment::{PaymentGateway, PaymentOutcome, PaymentProof, PaymentRequest},
    reliability::{is_retryable, retry_with_backoff},
    subscriptions::{
        Action, Classification, Money, Plan, PreviousPlan, ProrationResult, ResolvedStatus,
        SelectedPlan, Subscription, classify, prorate,
    },
};

/// Result of a settlement that did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// Delivery details changed in place (MODIFY).
    Modified {
        /// Updated record.
        subscription: Subscription,
    },
    /// Existing subscription replaced after settlement (UPGRADE, RENEW).
    Settled {
        /// `Upgrade` or `Renew`.
        action: Action,
        /// Updated record.
        subscription: Subscription,
        /// What was charged or credited.
        charge: ChargeDecision,
        /// Proof of the captured payment, when money was charged.
        proof: Option<PaymentProof>,
        /// Proration behind the charge.
        proration: Option<ProrationResult>,
    },
    /// New subscription created (NONE).
    Created {
        /// New record.
        subscription: Subscription,
        /// What was charged.
        charge: ChargeDecision,
        /// Proof of the captured payment, when money was charged.
        proof: Option<PaymentProof>,
    },
    /// Customer dismissed the checkout; nothing was written.
    Cancelled {
        /// Action the customer backed out of.
        action: Action,
    },
}

impl SettlementOutcome {
    /// Terminal runtime state.
    #[must_use]
    pub const fn state(&self) -> SettlementState {
        match self {
            Self::Cancelled { .. } => SettlementState::Cancelled,
            Self::Modified { .. } | Self::Settled { .. } | Self::Created { .. } => {
                SettlementState::Committed
            }
        }
    }

    /// Stored record, unless the settlement was cancelled.
    #[must_use]
    pub const fn subscription(&self) -> Option<&Subscription> {
        match self {
            Self::Modified { subscription }
            | Self::Settled { subscription, .. }
            | Self::Created { subscription, .. } => Some(subscription),
            Self::Cancelled { .. } => None,
        }
    }
}

enum Capture {
    Paid(Settlement<Settled>),
    Cancelled,
}

/// Orchestrates classification, pricing, payment and persistence.
///
/// # Examples
///
/// ```no_run
/// use chrono::Utc;
/// use mealsub_engine::{
///     backend::{InMemoryAddressBook, InMemoryPlanCatalog, InMemorySubscriptionStore},
///     config::EngineConfig,
///     payment::PaymentGateway,
///     settlement::{PlanSelection, SettlementCoordinator},
/// };
///
/// # async fn example(gateway: impl PaymentGateway, selection: PlanSelection)
/// #     -> mealsub_engine::Result<()> {
/// let coordinator = SettlementCoordinator::new(
///     InMemorySubscriptionStore::new(),
///     InMemoryPlanCatalog::default(),
///     InMemoryAddressBook::default(),
///     gateway,
///     EngineConfig::default(),
/// );
///
/// let quote = coordinator.quote(&selection, Utc::now()).await?;
/// println!("{} costs {}", quote.action, quote.charge.amount());
///
/// let outcome = coordinator.settle(selection, Utc::now()).await?;
/// println!("settled: {}", outcome.state());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SettlementCoordinator<S, C, A, P> {
    store: S,
    catalog: C,
    addresses: A,
    payments: P,
    config: EngineConfig,
    locks: SettlementLocks,
}

impl<S, C, A, P> SettlementCoordinator<S, C, A, P>
where
    S: SubscriptionStore,
    C: PlanCatalog,
    A: AddressBook,
    P: PaymentGateway,
{
    /// Creates a coordinator over the given collaborators.
    pub fn new(store: S, catalog: C, addresses: A, payments: P, config: EngineConfig) -> Self {
        Self { store, catalog, addresses, payments, config, locks: SettlementLocks::new() }
    }

    /// Subscription store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Active configuration.
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Prices a selection without side effects.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad selection, or a store/catalog
    /// error when lookups fail.
    #[instrument(skip(self, selection), fields(user_id = %selection.user_id))]
    pub async fn quote(&self, selection: &PlanSelection, now: DateTime<Utc>) -> Result<Quote> {
        self.validate(selection, now).await?;

        let plan =
            self.catalog.find_plan(selection.dietary_preference, selection.plan_type).await?;
        let subscriptions = self.store.list_subscriptions(&selection.user_id).await?;

        price_selection(&subscriptions, plan, selection.person_count, now)
    }

    /// Settles a selection.
    ///
    /// Holds the per-user lock for the whole settlement.
    ///
    /// # Errors
    ///
    /// - validation errors before anything happens
    /// - [`EngineError::SettlementInProgress`] when the user already has one running
    /// - [`EngineError::PaymentFailed`] / [`EngineError::PaymentTimedOut`] with nothing written
    /// - store errors when nothing was captured
    /// - [`EngineError::ReconciliationRequired`] when a captured payment could not be saved
    #[instrument(
        skip(self, selection),
        fields(user_id = %selection.user_id, request_id = field::Empty, action = field::Empty)
    )]
    pub async fn settle(
        &self,
        selection: PlanSelection,
        now: DateTime<Utc>,
    ) -> Result<SettlementOutcome> {
        let _guard = self.locks.try_acquire(&selection.user_id)?;

        let request_id = Uuid::new_v4();
        Span::current().record("request_id", field::display(request_id));

        let quote = self.quote(&selection, now).await?;
        Span::current().record("action", field::display(quote.action));

        info!(
            charge = ?quote.charge,
            previous = quote.previous.as_ref().map(|s| s.id.as_str()),
            "Settlement started"
        );
        audit!(
            AuditEventType::SettlementStarted,
            selection.user_id.as_str(),
            request_id,
            with_action(quote.action.to_string()),
            with_amount(quote.charge.amount().minor()),
        );

        if quote.charge.is_fallback() {
            warn!(
                amount = %quote.charge.amount(),
                previous = quote.previous.as_ref().map(|s| s.id.as_str()),
                "Proration failed on plan data, charging full plan price"
            );
            audit!(
                AuditEventType::ProrationFallback,
                selection.user_id.as_str(),
                request_id,
                with_subscription_id(
                    quote.previous.as_ref().map_or_else(String::new, |s| s.id.to_string())
                ),
                with_amount(quote.charge.amount().minor()),
            );
        }

        let settlement =
            Settlement::new(request_id, selection.user_id.clone(), quote.action, quote.charge);

        match quote.previous {
            Some(ref current) if quote.action == Action::Modify => {
                self.commit_modify(settlement, current, &selection).await
            }
            Some(ref previous) => {
                self.settle_change(settlement, previous, &quote, &selection).await
            }
            None => self.settle_fresh(settlement, &quote.plan, &selection).await,
        }
    }

    async fn validate(&self, selection: &PlanSelection, now: DateTime<Utc>) -> Result<()> {
        let max = self.config.max_person_count;
        if selection.person_count == 0 || selection.person_count > max {
            return Err(EngineError::InvalidPersonCount { count: selection.person_count, max });
        }

        if selection.time_slot.trim().is_empty() {
            return Err(EngineError::InvalidSelection("time slot is required".into()));
        }

        let today = now.date_naive();
        if selection.start_date < today {
            return Err(EngineError::InvalidDate(format!(
                "start date {} is before today ({today})",
                selection.start_date
            )));
        }

        // Another customer's address is reported as missing.
        match self.addresses.address(&selection.delivery_address_id).await? {
            Some(address) if address.user_id == selection.user_id => Ok(()),
            _ => Err(EngineError::AddressNotFound(selection.delivery_address_id.to_string())),
        }
    }

    async fn commit_modify(
        &self,
        settlement: Settlement<Idle>,
        current: &Subscription,
        selection: &PlanSelection,
    ) -> Result<SettlementOutcome> {
        let request = ModifyRequest {
            resume_date: selection.start_date,
            time_slot: selection.time_slot.clone(),
            delivery_address_id: selection.delivery_address_id.clone(),
            person_count: selection.person_count,
        };

        let subscription =
            self.store.modify_subscription(&current.id, request).await.inspect_err(|e| {
                warn!(subscription_id = %current.id, error = %e, "Modify failed");
            })?;

        let committed = settlement.commit_directly(subscription);
        info!(subscription_id = %current.id, state = %committed.state(), "Subscription modified");
        audit!(
            AuditEventType::SubscriptionCommitted,
            selection.user_id.as_str(),
            committed.request_id(),
            with_subscription_id(current.id.to_string()),
            with_action(Action::Modify.to_string()),
        );

        let (_, subscription) = committed.into_parts();
        Ok(SettlementOutcome::Modified { subscription })
    }

    async fn settle_change(
        &self,
        settlement: Settlement<Idle>,
        previous: &Subscription,
        quote: &Quote,
        selection: &PlanSelection,
    ) -> Result<SettlementOutcome> {
        let charge = quote.charge;
        let description = format!(
            "{} {} plan ({}) for {} person(s)",
            quote.action, quote.plan.plan_type, quote.plan.dietary_preference, selection.person_count
        );

        let settled = match settlement.begin() {
            FirstStep::Capture(awaiting, amount) => {
                match self.capture(awaiting, amount, previous.id.to_string(), description).await? {
                    Capture::Paid(settled) => settled,
                    Capture::Cancelled => {
                        return Ok(SettlementOutcome::Cancelled { action: quote.action });
                    }
                }
            }
            FirstStep::NothingOwed(settled) => settled,
        };

        let patch = SubscriptionPatch {
            plan_type: quote.plan.plan_type,
            dietary_preference: quote.plan.dietary_preference,
            price: quote.plan.price,
            person_count: selection.person_count,
            meals_per_month: quote.plan.duration,
            start_date: selection.start_date,
            delivery_address_id: selection.delivery_address_id.clone(),
            time_slot: selection.time_slot.clone(),
            payment: settled.proof().cloned(),
            wallet_credit_applied: charge.wallet_credit(),
            extra_charge_applied: Some(charge.amount()).filter(|amount| amount.is_positive()),
            expected_version: previous.version,
        };

        let store = &self.store;
        let id = &previous.id;
        let written = retry_with_backoff(&self.config.retry_policy(), is_retryable, || {
            store.patch_subscription(id, patch.clone())
        })
        .await;

        let subscription = match written {
            Ok(subscription) => subscription,
            Err(e) => return Err(persistence_failure(&settled, id.to_string(), e)),
        };

        if let Some(credit) = charge.wallet_credit() {
            info!(subscription_id = %id, credit = %credit, "Wallet credited");
            audit!(
                AuditEventType::WalletCredited,
                selection.user_id.as_str(),
                settled.request_id(),
                with_subscription_id(id.to_string()),
                with_wallet_credit(credit.minor()),
            );
        }

        let committed = settled.commit(subscription);
        info!(subscription_id = %id, state = %committed.state(), "Subscription replaced");
        audit!(
            AuditEventType::SubscriptionCommitted,
            selection.user_id.as_str(),
            committed.request_id(),
            with_subscription_id(id.to_string()),
            with_action(quote.action.to_string()),
            with_amount(charge.amount().minor()),
        );

        let (data, subscription) = committed.into_parts();
        Ok(SettlementOutcome::Settled {
            action: data.action,
            subscription,
            charge,
            proof: data.proof,
            proration: quote.proration,
        })
    }

    async fn settle_fresh(
        &self,
        settlement: Settlement<Idle>,
        plan: &Plan,
        selection: &PlanSelection,
    ) -> Result<SettlementOutcome> {
        let charge = settlement.data().charge;
        let description = format!(
            "New {} plan ({}) for {} person(s)",
            plan.plan_type, plan.dietary_preference, selection.person_count
        );

        let settled = match settlement.begin() {
            FirstStep::Capture(awaiting, amount) => {
                match self
                    .capture(awaiting, amount, selection.user_id.to_string(), description)
                    .await?
                {
                    Capture::Paid(settled) => settled,
                    Capture::Cancelled => {
                        return Ok(SettlementOutcome::Cancelled { action: Action::None });
                    }
                }
            }
            FirstStep::NothingOwed(settled) => settled,
        };

        let payload = NewSubscription {
            user_id: selection.user_id.clone(),
            plan_type: plan.plan_type,
            dietary_preference: plan.dietary_preference,
            price: plan.price,
            person_count: selection.person_count,
            meals_per_month: plan.duration,
            start_date: selection.start_date,
            delivery_address_id: selection.delivery_address_id.clone(),
            time_slot: selection.time_slot.clone(),
            payment: settled.proof().cloned(),
        };

        let store = &self.store;
        let written = retry_with_backoff(&self.config.retry_policy(), is_retryable, || {
            store.create_subscription(payload.clone())
        })
        .await;

        let subscription = match written {
            Ok(subscription) => subscription,
            Err(e) => {
                return Err(persistence_failure(&settled, selection.user_id.to_string(), e));
            }
        };

        let committed = settled.commit(subscription);
        let id = committed.subscription().id.clone();
        info!(subscription_id = %id, state = %committed.state(), "Subscription created");
        audit!(
            AuditEventType::SubscriptionCommitted,
            selection.user_id.as_str(),
            committed.request_id(),
            with_subscription_id(id.to_string()),
            with_action(Action::None.to_string()),
            with_amount(charge.amount().minor()),
        );

        let (data, subscription) = committed.into_parts();
        Ok(SettlementOutcome::Created { subscription, charge, proof: data.proof })
    }

    /// Captures `amount`, bounded by the configured timeout.
    async fn capture(
        &self,
        awaiting: Settlement<AwaitingPayment>,
        amount: Money,
        reference: String,
        description: String,
    ) -> Result<Capture> {
        let user_id = awaiting.data().user_id.clone();
        let request_id = awaiting.request_id();
        let timeout = self.config.payment_timeout();
        let request = PaymentRequest {
            amount,
            currency: self.config.currency.clone(),
            reference: reference.clone(),
            description,
        };

        info!(amount = %amount, state = %awaiting.state(), "Awaiting payment");
        let started = tokio::time::Instant::now();

        let Ok(outcome) = tokio::time::timeout(timeout, self.payments.capture(request)).await else {
            let state = awaiting.fail();
            warn!(timeout_secs = timeout.as_secs(), state = %state, "Payment capture timed out");
            audit!(
                AuditEventType::PaymentFailed,
                user_id.as_str(),
                request_id,
                with_subscription_id(reference),
                with_amount(amount.minor()),
                with_error("timed out"),
                with_duration(started.elapsed()),
            );
            return Err(EngineError::PaymentTimedOut { after: timeout });
        };

        match outcome {
            PaymentOutcome::Succeeded(proof) => {
                info!(payment_id = %proof.payment_id, "Payment captured");
                audit!(
                    AuditEventType::PaymentCaptured,
                    user_id.as_str(),
                    request_id,
                    with_subscription_id(reference),
                    with_amount(amount.minor()),
                    with_payment(proof.payment_id.clone(), proof.order_reference.clone()),
                    with_duration(started.elapsed()),
                );
                Ok(Capture::Paid(awaiting.paid(proof)))
            }
            PaymentOutcome::Cancelled => {
                let state = awaiting.cancel();
                info!(state = %state, "Payment cancelled by customer");
                audit!(
                    AuditEventType::PaymentCancelled,
                    user_id.as_str(),
                    request_id,
                    with_subscription_id(reference),
                    with_amount(amount.minor()),
                );
                Ok(Capture::Cancelled)
            }
            PaymentOutcome::Failed { reason } => {
                let state = awaiting.fail();
                warn!(reason = %reason, state = %state, "Payment failed");
                audit!(
                    AuditEventType::PaymentFailed,
                    user_id.as_str(),
                    request_id,
                    with_subscription_id(reference),
                    with_amount(amount.minor()),
                    with_error(reason.clone()),
                    with_duration(started.elapsed()),
                );
                Err(EngineError::PaymentFailed { reason })
            }
        }
    }
}

/// Maps a failed store write. Once money is captured this is a
/// reconciliation case.
fn persistence_failure(
    settled: &Settlement<Settled>,
    reference: String,
    source: EngineError,
) -> EngineError {
    let Some(proof) = settled.proof().cloned() else {
        warn!(
            reference = %reference,
            error = %source,
            state = %SettlementState::Failed,
            "Store write failed"
        );
        return source;
    };

    error!(
        reference = %reference,
        payment_id = %proof.payment_id,
        order_reference = %proof.order_reference,
        signature = %proof.signature,
        amount = %settled.data().charge.amount(),
        error = %source,
        "Payment captured but subscription not saved; manual reconciliation required"
    );
    audit!(
        AuditEventType::ReconciliationRequired,
        settled.data().user_id.as_str(),
        settled.request_id(),
        with_subscription_id(reference.clone()),
        with_amount(settled.data().charge.amount().minor()),
        with_payment(proof.payment_id.clone(), proof.order_reference.clone()),
        with_signature(proof.signature.clone()),
        with_error(source.to_string()),
    );

    EngineError::ReconciliationRequired { reference, proof, source: Box::new(source) }
}

/// Classifies and prices a selection against a user's subscriptions.
///
/// # Errors
///
/// Returns [`EngineError::InvalidSelection`] if the plan price for
/// `person_count` people overflows.
pub fn price_selection(
    subscriptions: &[Subscription],
    plan: Plan,
    person_count: u8,
    now: DateTime<Utc>,
) -> Result<Quote> {
    let classification = classify(subscriptions, plan.dietary_preference, plan.plan_type, now);
    let action = classification.action();
    let previous = classification.subscription().cloned();
    let previous_status = classification.previous_status();

    let (proration, charge) = match classification {
        Classification::None => (None, ChargeDecision::Charge(full_price(&plan, person_count)?)),
        Classification::Modify { .. } => (None, ChargeDecision::Free),
        Classification::Upgrade { previous, status } => {
            prorated(previous, status, &plan, person_count, now)?
        }
        Classification::Renew { previous } => {
            prorated(previous, ResolvedStatus::Completed, &plan, person_count, now)?
        }
    };

    Ok(Quote { action, previous, previous_status, plan, proration, charge })
}

/// Plan price for every person served.
fn full_price(plan: &Plan, person_count: u8) -> Result<Money> {
    plan.price.checked_mul(i64::from(person_count)).ok_or_else(|| {
        EngineError::InvalidSelection(format!(
            "price {} for {person_count} people overflows",
            plan.price
        ))
    })
}

fn prorated(
    previous: &Subscription,
    status: ResolvedStatus,
    plan: &Plan,
    person_count: u8,
    now: DateTime<Utc>,
) -> Result<(Option<ProrationResult>, ChargeDecision)> {
    let result = prorate(
        &PreviousPlan::from_subscription(previous, status),
        &SelectedPlan::from_plan(plan, person_count),
        now,
    );
    let charge = ChargeDecision::from_proration(&result, full_price(plan, person_count)?);
    Ok((Some(result), charge))
}
