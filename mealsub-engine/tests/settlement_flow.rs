//! Integration tests for the settlement coordinator.
//!
//! Runs full settlements against the in-memory backends with scripted payment
//! gateways and checks what was charged, credited and written.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use mealsub_engine::{
    EngineConfig, EngineError,
    backend::{
        DeliveryAddress, InMemoryAddressBook, InMemoryPlanCatalog, InMemorySubscriptionStore,
        SubscriptionStore,
    },
    payment::{
        CallbackGateway, PaymentCallbacks, PaymentGateway, PaymentOutcome, PaymentProof,
        PaymentRequest, PaymentWidget,
    },
    settlement::{ChargeDecision, PlanSelection, SettlementCoordinator, SettlementOutcome},
    subscriptions::{
        Action, AddressId, ChangeType, DietaryPreference, Money, Plan, PlanId, PlanType,
        Subscription, SubscriptionId, SubscriptionStatus, UserId,
    },
};
use tokio::sync::Notify;

// ============================================================================
// Fixtures
// ============================================================================

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 15, 10, 0, 0).unwrap()
}

fn today() -> NaiveDate {
    now().date_naive()
}

fn user() -> UserId {
    UserId::new("user-1").unwrap()
}

fn plan(diet: DietaryPreference, plan_type: PlanType, price: i64) -> Plan {
    Plan {
        id: PlanId::new(format!("{diet}-{plan_type}")).unwrap(),
        plan_type,
        dietary_preference: diet,
        price: Money::from_minor(price),
        duration: 30,
        features: vec![],
    }
}

fn catalog() -> InMemoryPlanCatalog {
    InMemoryPlanCatalog::new(vec![
        plan(DietaryPreference::Veg, PlanType::Basic, 2500),
        plan(DietaryPreference::Veg, PlanType::Premium, 4000),
        plan(DietaryPreference::Veg, PlanType::Family, 1000),
    ])
}

fn addresses() -> InMemoryAddressBook {
    InMemoryAddressBook::new(vec![
        DeliveryAddress {
            id: AddressId::new("addr-1").unwrap(),
            user_id: user(),
            label: "Home".into(),
        },
        DeliveryAddress {
            id: AddressId::new("addr-2").unwrap(),
            user_id: UserId::new("user-2").unwrap(),
            label: "Someone else's home".into(),
        },
    ])
}

/// Veg basic, 2500 for 30 meals, started ten days ago.
fn current_basic() -> Subscription {
    Subscription {
        id: SubscriptionId::new("sub-1").unwrap(),
        user_id: user(),
        plan_type: PlanType::Basic,
        dietary_preference: DietaryPreference::Veg,
        price: Some(Money::from_minor(2500)),
        person_count: 1,
        meals_per_month: 30,
        start_date: today() - Duration::days(10),
        end_date: None,
        status: SubscriptionStatus::Active,
        delivery_address_id: AddressId::new("addr-1").unwrap(),
        time_slot: "lunch".into(),
        wallet_credit_applied: None,
        extra_charge_applied: None,
        version: 1,
    }
}

fn selection(plan_type: PlanType) -> PlanSelection {
    PlanSelection {
        user_id: user(),
        dietary_preference: DietaryPreference::Veg,
        plan_type,
        person_count: 1,
        start_date: today(),
        delivery_address_id: AddressId::new("addr-1").unwrap(),
        time_slot: "lunch".into(),
    }
}

fn proof() -> PaymentProof {
    PaymentProof {
        payment_id: "pay_1".into(),
        order_reference: "order_1".into(),
        signature: "sig_1".into(),
    }
}

#[derive(Debug, Clone, Copy)]
enum Script {
    Succeed,
    Cancel,
    Fail,
    Hang,
}

/// Gateway that answers every capture the same way and records requests.
#[derive(Debug, Clone)]
struct ScriptedGateway {
    script: Script,
    requests: Arc<Mutex<Vec<PaymentRequest>>>,
}

impl ScriptedGateway {
    fn new(script: Script) -> Self {
        Self { script, requests: Arc::default() }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_request(&self) -> PaymentRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn capture(&self, request: PaymentRequest) -> PaymentOutcome {
        self.requests.lock().unwrap().push(request);
        match self.script {
            Script::Succeed => PaymentOutcome::Succeeded(proof()),
            Script::Cancel => PaymentOutcome::Cancelled,
            Script::Fail => PaymentOutcome::Failed { reason: "card declined".into() },
            Script::Hang => std::future::pending().await,
        }
    }
}

type Coordinator<P> =
    SettlementCoordinator<InMemorySubscriptionStore, InMemoryPlanCatalog, InMemoryAddressBook, P>;

fn coordinator<P: PaymentGateway>(
    subscriptions: Vec<Subscription>,
    payments: P,
) -> Coordinator<P> {
    SettlementCoordinator::new(
        InMemorySubscriptionStore::with_subscriptions(subscriptions),
        catalog(),
        addresses(),
        payments,
        EngineConfig::default(),
    )
}

fn stored(coordinator: &Coordinator<impl PaymentGateway>, id: &str) -> Subscription {
    coordinator.store().get(&SubscriptionId::new(id).unwrap()).unwrap().unwrap()
}

// ============================================================================
// UPGRADE
// ============================================================================

#[tokio::test]
async fn test_upgrade_charges_prorated_difference() {
    let gateway = ScriptedGateway::new(Script::Succeed);
    let coordinator = coordinator(vec![current_basic()], gateway.clone());

    let outcome = coordinator.settle(selection(PlanType::Premium), now()).await.unwrap();

    let SettlementOutcome::Settled { action, subscription, charge, proof: paid, proration } =
        outcome
    else {
        panic!("expected a settled upgrade");
    };
    assert_eq!(action, Action::Upgrade);
    assert_eq!(charge, ChargeDecision::Charge(Money::from_minor(1000)));
    assert_eq!(paid, Some(proof()));
    let proration = proration.unwrap();
    assert_eq!(proration.change_type, ChangeType::PriceUp);
    assert_eq!(proration.units_consumed, Some(10));

    assert_eq!(subscription.plan_type, PlanType::Premium);
    assert_eq!(subscription.price, Some(Money::from_minor(4000)));
    assert_eq!(subscription.start_date, today());
    assert_eq!(subscription.extra_charge_applied, Some(Money::from_minor(1000)));
    assert_eq!(subscription.wallet_credit_applied, None);
    assert_eq!(subscription.version, 2);
    assert_eq!(stored(&coordinator, "sub-1"), subscription);

    assert_eq!(gateway.calls(), 1);
    let request = gateway.last_request();
    assert_eq!(request.amount, Money::from_minor(1000));
    assert_eq!(request.currency, "INR");
    assert_eq!(request.reference, "sub-1");
}

#[tokio::test]
async fn test_downgrade_credits_wallet_without_payment() {
    let gateway = ScriptedGateway::new(Script::Succeed);
    let coordinator = coordinator(vec![current_basic()], gateway.clone());

    let outcome = coordinator.settle(selection(PlanType::Family), now()).await.unwrap();

    let SettlementOutcome::Settled { charge, proof, subscription, .. } = outcome else {
        panic!("expected a settled downgrade");
    };
    assert_eq!(charge, ChargeDecision::WalletCredit(Money::from_minor(1000)));
    assert_eq!(proof, None);
    assert_eq!(subscription.plan_type, PlanType::Family);
    assert_eq!(subscription.wallet_credit_applied, Some(Money::from_minor(1000)));
    assert_eq!(subscription.extra_charge_applied, None);
    assert_eq!(gateway.calls(), 0);
}

#[tokio::test]
async fn test_missing_previous_price_charges_full_plan_price() {
    let gateway = ScriptedGateway::new(Script::Succeed);
    let previous = Subscription { price: None, ..current_basic() };
    let coordinator = coordinator(vec![previous], gateway.clone());

    let outcome = coordinator.settle(selection(PlanType::Premium), now()).await.unwrap();

    let SettlementOutcome::Settled { charge, proration, .. } = outcome else {
        panic!("expected a settled upgrade");
    };
    assert_eq!(charge, ChargeDecision::FullPriceFallback(Money::from_minor(4000)));
    assert_eq!(proration.map(|p| p.change_type), Some(ChangeType::InvalidPlanData));
    assert_eq!(gateway.last_request().amount, Money::from_minor(4000));
}

#[tokio::test]
async fn test_price_fallback_covers_every_person() {
    let gateway = ScriptedGateway::new(Script::Succeed);
    let previous = Subscription { price: None, ..current_basic() };
    let coordinator = coordinator(vec![previous], gateway.clone());

    let couple = PlanSelection { person_count: 2, ..selection(PlanType::Premium) };
    let outcome = coordinator.settle(couple, now()).await.unwrap();

    let SettlementOutcome::Settled { charge, subscription, .. } = outcome else {
        panic!("expected a settled upgrade");
    };
    assert_eq!(charge, ChargeDecision::FullPriceFallback(Money::from_minor(8000)));
    assert_eq!(subscription.person_count, 2);
    assert_eq!(gateway.last_request().amount, Money::from_minor(8000));
}

// ============================================================================
// RENEW
// ============================================================================

#[tokio::test]
async fn test_renew_charges_full_plan_price() {
    let gateway = ScriptedGateway::new(Script::Succeed);
    let expired = Subscription { start_date: today() - Duration::days(40), ..current_basic() };
    let coordinator = coordinator(vec![expired], gateway.clone());

    let outcome = coordinator.settle(selection(PlanType::Basic), now()).await.unwrap();

    let SettlementOutcome::Settled { action, charge, subscription, .. } = outcome else {
        panic!("expected a renewal");
    };
    assert_eq!(action, Action::Renew);
    assert_eq!(charge.amount(), Money::from_minor(2500));
    assert_eq!(subscription.start_date, today());
    assert_eq!(subscription.status, SubscriptionStatus::Active);
    assert_eq!(gateway.calls(), 1);
}

#[tokio::test]
async fn test_renew_charges_plan_price_for_every_person() {
    let expired = || Subscription { start_date: today() - Duration::days(40), ..current_basic() };

    for (person_count, expected) in [(1, 2500), (2, 5000), (4, 10_000)] {
        let gateway = ScriptedGateway::new(Script::Succeed);
        let coordinator = coordinator(vec![expired()], gateway.clone());

        let renewal = PlanSelection { person_count, ..selection(PlanType::Basic) };
        let outcome = coordinator.settle(renewal, now()).await.unwrap();

        let SettlementOutcome::Settled { action, charge, .. } = outcome else {
            panic!("expected a renewal");
        };
        assert_eq!(action, Action::Renew);
        assert_eq!(charge, ChargeDecision::FullPriceFallback(Money::from_minor(expected)));
        assert_eq!(gateway.last_request().amount, Money::from_minor(expected));
    }
}

// ============================================================================
// MODIFY
// ============================================================================

#[tokio::test]
async fn test_modify_updates_delivery_without_payment() {
    let gateway = ScriptedGateway::new(Script::Succeed);
    let coordinator = coordinator(vec![current_basic()], gateway.clone());

    let modified = PlanSelection {
        person_count: 2,
        start_date: today() + Duration::days(3),
        time_slot: "dinner".into(),
        ..selection(PlanType::Basic)
    };
    let outcome = coordinator.settle(modified, now()).await.unwrap();

    let SettlementOutcome::Modified { subscription } = outcome else {
        panic!("expected a modification");
    };
    assert_eq!(subscription.plan_type, PlanType::Basic);
    assert_eq!(subscription.price, Some(Money::from_minor(2500)));
    assert_eq!(subscription.person_count, 2);
    assert_eq!(subscription.start_date, today() + Duration::days(3));
    assert_eq!(subscription.time_slot, "dinner");
    assert_eq!(gateway.calls(), 0);
}

#[tokio::test]
async fn test_failed_modify_is_surfaced() {
    let gateway = ScriptedGateway::new(Script::Succeed);
    let coordinator = coordinator(vec![current_basic()], gateway.clone());
    coordinator.store().fail_next_modifies(1);

    let modified = PlanSelection { time_slot: "dinner".into(), ..selection(PlanType::Basic) };
    let result = coordinator.settle(modified, now()).await;

    assert!(matches!(result, Err(EngineError::StoreError(_))), "got {result:?}");
    assert_eq!(gateway.calls(), 0);
    assert_eq!(stored(&coordinator, "sub-1"), current_basic());
    assert_eq!(coordinator.store().write_count(), 0);
}

// ============================================================================
// NONE
// ============================================================================

#[tokio::test]
async fn test_first_purchase_charges_price_per_person() {
    let gateway = ScriptedGateway::new(Script::Succeed);
    let coordinator = coordinator(vec![], gateway.clone());

    let first = PlanSelection { person_count: 2, ..selection(PlanType::Premium) };
    let outcome = coordinator.settle(first, now()).await.unwrap();

    let SettlementOutcome::Created { subscription, charge, proof: paid } = outcome else {
        panic!("expected a new subscription");
    };
    assert_eq!(charge, ChargeDecision::Charge(Money::from_minor(8000)));
    assert_eq!(paid, Some(proof()));
    assert_eq!(subscription.user_id, user());
    assert_eq!(subscription.person_count, 2);
    assert_eq!(subscription.version, 1);

    assert_eq!(gateway.last_request().reference, "user-1");
    let listed = coordinator.store().list_subscriptions(&user()).await.unwrap();
    assert_eq!(listed, vec![subscription]);
}

// ============================================================================
// Payment outcomes
// ============================================================================

#[tokio::test]
async fn test_cancelled_payment_leaves_record_untouched() {
    let gateway = ScriptedGateway::new(Script::Cancel);
    let coordinator = coordinator(vec![current_basic()], gateway.clone());

    let outcome = coordinator.settle(selection(PlanType::Premium), now()).await.unwrap();

    assert_eq!(outcome, SettlementOutcome::Cancelled { action: Action::Upgrade });
    assert!(outcome.subscription().is_none());
    assert_eq!(stored(&coordinator, "sub-1"), current_basic());
    assert_eq!(coordinator.store().write_count(), 0);
}

#[tokio::test]
async fn test_cancelled_first_purchase_creates_nothing() {
    let coordinator = coordinator(vec![], ScriptedGateway::new(Script::Cancel));

    let outcome = coordinator.settle(selection(PlanType::Basic), now()).await.unwrap();

    assert_eq!(outcome, SettlementOutcome::Cancelled { action: Action::None });
    assert!(coordinator.store().list_subscriptions(&user()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_payment_writes_nothing() {
    let coordinator = coordinator(vec![current_basic()], ScriptedGateway::new(Script::Fail));

    let err = coordinator.settle(selection(PlanType::Premium), now()).await.unwrap_err();

    assert!(matches!(err, EngineError::PaymentFailed { ref reason } if reason == "card declined"));
    assert_eq!(stored(&coordinator, "sub-1"), current_basic());
    assert_eq!(coordinator.store().write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_payment_times_out() {
    let coordinator = coordinator(vec![current_basic()], ScriptedGateway::new(Script::Hang));

    let err = coordinator.settle(selection(PlanType::Premium), now()).await.unwrap_err();

    assert!(
        matches!(err, EngineError::PaymentTimedOut { after } if after.as_secs() == 300),
        "unexpected error: {err}"
    );
    assert_eq!(coordinator.store().write_count(), 0);
}

/// Widget that dismisses the checkout through its callbacks.
struct DismissingWidget;

impl PaymentWidget for DismissingWidget {
    fn open(&self, _request: PaymentRequest, callbacks: PaymentCallbacks) {
        callbacks.on_cancelled();
    }
}

#[tokio::test]
async fn test_callback_widget_cancellation() {
    let coordinator =
        coordinator(vec![current_basic()], CallbackGateway::new(DismissingWidget));

    let outcome = coordinator.settle(selection(PlanType::Premium), now()).await.unwrap();

    assert_eq!(outcome.state().as_str(), "cancelled");
    assert_eq!(coordinator.store().write_count(), 0);
}

// ============================================================================
// Persistence failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_transient_store_failure_is_retried() {
    let coordinator = coordinator(vec![current_basic()], ScriptedGateway::new(Script::Succeed));
    coordinator.store().fail_next_patches(2);

    let outcome = coordinator.settle(selection(PlanType::Premium), now()).await.unwrap();

    assert_eq!(outcome.subscription().map(|s| s.plan_type), Some(PlanType::Premium));
}

#[tokio::test(start_paused = true)]
async fn test_store_failure_after_capture_requires_reconciliation() {
    let coordinator = coordinator(vec![current_basic()], ScriptedGateway::new(Script::Succeed));
    coordinator.store().fail_next_patches(10);

    let err = coordinator.settle(selection(PlanType::Premium), now()).await.unwrap_err();

    let EngineError::ReconciliationRequired { reference, proof: paid, source } = err else {
        panic!("expected reconciliation, got {err}");
    };
    assert_eq!(reference, "sub-1");
    assert_eq!(paid, proof());
    assert!(matches!(*source, EngineError::StoreError(_)));
    assert_eq!(stored(&coordinator, "sub-1"), current_basic());
}

#[tokio::test(start_paused = true)]
async fn test_failed_create_after_capture_requires_reconciliation() {
    let coordinator = coordinator(vec![], ScriptedGateway::new(Script::Succeed));
    coordinator.store().fail_next_creates(10);

    let err = coordinator.settle(selection(PlanType::Basic), now()).await.unwrap_err();

    assert!(
        matches!(err, EngineError::ReconciliationRequired { ref reference, .. } if reference == "user-1")
    );
}

#[tokio::test(start_paused = true)]
async fn test_store_failure_without_capture_is_plain_error() {
    let coordinator = coordinator(vec![current_basic()], ScriptedGateway::new(Script::Succeed));
    coordinator.store().fail_next_patches(10);

    let err = coordinator.settle(selection(PlanType::Family), now()).await.unwrap_err();

    assert!(matches!(err, EngineError::StoreError(_)), "unexpected error: {err}");
}

/// Gateway that edits the subscription while the customer is paying.
struct ConcurrentEditGateway {
    store: InMemorySubscriptionStore,
}

#[async_trait]
impl PaymentGateway for ConcurrentEditGateway {
    async fn capture(&self, _request: PaymentRequest) -> PaymentOutcome {
        let id = SubscriptionId::new("sub-1").unwrap();
        self.store.extend_subscription(&id, 5).await.unwrap();
        PaymentOutcome::Succeeded(proof())
    }
}

#[tokio::test]
async fn test_concurrent_edit_is_a_version_conflict() {
    let store = InMemorySubscriptionStore::with_subscriptions(vec![current_basic()]);
    let coordinator = SettlementCoordinator::new(
        store.clone(),
        catalog(),
        addresses(),
        ConcurrentEditGateway { store },
        EngineConfig::default(),
    );

    let err = coordinator.settle(selection(PlanType::Premium), now()).await.unwrap_err();

    let EngineError::ReconciliationRequired { source, .. } = err else {
        panic!("expected reconciliation, got {err}");
    };
    assert!(matches!(*source, EngineError::VersionConflict { expected: 1, .. }));
    assert_eq!(coordinator.store().write_count(), 1);
}

// ============================================================================
// Concurrency
// ============================================================================

/// Gateway that blocks until released.
struct GatedGateway {
    entered: Arc<Notify>,
    release: Arc<Notify>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl PaymentGateway for GatedGateway {
    async fn capture(&self, _request: PaymentRequest) -> PaymentOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        PaymentOutcome::Succeeded(proof())
    }
}

#[tokio::test]
async fn test_second_settlement_for_same_user_is_rejected() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let coordinator = Arc::new(coordinator(
        vec![current_basic()],
        GatedGateway {
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
            calls: Arc::clone(&calls),
        },
    ));

    let first = tokio::spawn({
        let coordinator = Arc::clone(&coordinator);
        async move { coordinator.settle(selection(PlanType::Premium), now()).await }
    });
    entered.notified().await;

    let err = coordinator.settle(selection(PlanType::Family), now()).await.unwrap_err();
    assert!(matches!(err, EngineError::SettlementInProgress(ref id) if id == "user-1"));

    release.notify_one();
    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome.subscription().map(|s| s.plan_type), Some(PlanType::Premium));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Validation and quotes
// ============================================================================

#[tokio::test]
async fn test_invalid_selections_are_rejected_before_payment() {
    let gateway = ScriptedGateway::new(Script::Succeed);
    let coordinator = coordinator(vec![current_basic()], gateway.clone());

    let nobody = PlanSelection { person_count: 0, ..selection(PlanType::Premium) };
    assert!(matches!(
        coordinator.settle(nobody, now()).await,
        Err(EngineError::InvalidPersonCount { count: 0, max: 10 })
    ));

    let crowd = PlanSelection { person_count: 11, ..selection(PlanType::Premium) };
    assert!(matches!(
        coordinator.settle(crowd, now()).await,
        Err(EngineError::InvalidPersonCount { count: 11, .. })
    ));

    let yesterday =
        PlanSelection { start_date: today() - Duration::days(1), ..selection(PlanType::Premium) };
    assert!(matches!(coordinator.settle(yesterday, now()).await, Err(EngineError::InvalidDate(_))));

    let foreign = PlanSelection {
        delivery_address_id: AddressId::new("addr-2").unwrap(),
        ..selection(PlanType::Premium)
    };
    assert!(matches!(
        coordinator.settle(foreign, now()).await,
        Err(EngineError::AddressNotFound(ref id)) if id == "addr-2"
    ));

    let no_slot = PlanSelection { time_slot: "  ".into(), ..selection(PlanType::Premium) };
    assert!(matches!(
        coordinator.settle(no_slot, now()).await,
        Err(EngineError::InvalidSelection(_))
    ));

    let unlisted = PlanSelection {
        dietary_preference: DietaryPreference::Nonveg,
        ..selection(PlanType::Premium)
    };
    assert!(matches!(
        coordinator.settle(unlisted, now()).await,
        Err(EngineError::PlanNotFound { .. })
    ));

    assert_eq!(gateway.calls(), 0);
    assert_eq!(coordinator.store().write_count(), 0);
}

#[tokio::test]
async fn test_quote_has_no_side_effects() {
    let gateway = ScriptedGateway::new(Script::Succeed);
    let coordinator = coordinator(vec![current_basic()], gateway.clone());

    let quote = coordinator.quote(&selection(PlanType::Premium), now()).await.unwrap();

    assert_eq!(quote.action, Action::Upgrade);
    assert_eq!(quote.previous.map(|s| s.id.to_string()), Some("sub-1".to_string()));
    assert_eq!(quote.charge.amount(), Money::from_minor(1000));
    assert_eq!(gateway.calls(), 0);
    assert_eq!(coordinator.store().write_count(), 0);
}

#[tokio::test]
async fn test_settled_outcome_serializes_with_tag() {
    let coordinator = coordinator(vec![current_basic()], ScriptedGateway::new(Script::Succeed));

    let outcome = coordinator.settle(selection(PlanType::Premium), now()).await.unwrap();
    let json = serde_json::to_value(&outcome).unwrap();

    assert_eq!(json["outcome"], "settled");
    assert_eq!(json["action"], "UPGRADE");
    assert_eq!(json["charge"], serde_json::json!({ "kind": "charge", "amount": 1000 }));
    assert_eq!(json["proof"]["payment_id"], "pay_1");
}
