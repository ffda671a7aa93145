//! Upgrade settlement against the in-memory backends.
//!
//! A customer ten days into a basic veg plan switches to premium. The
//! checkout widget approves the payment through its callbacks, and the
//! coordinator replaces the subscription.
//!
//! # Running this example
//!
//! ```bash
//! RUST_LOG=info cargo run --example upgrade_flow
//! ```

#![allow(
    clippy::print_stdout,
    clippy::unwrap_used,
    reason = "examples are allowed to use println and unwrap"
)]

use chrono::{Duration, Utc};
use mealsub_engine::{
    EngineConfig,
    backend::{DeliveryAddress, InMemoryAddressBook, InMemoryPlanCatalog, InMemorySubscriptionStore},
    payment::{CallbackGateway, PaymentCallbacks, PaymentProof, PaymentRequest, PaymentWidget},
    settlement::{PlanSelection, SettlementCoordinator},
    subscriptions::{
        AddressId, DietaryPreference, Money, Plan, PlanId, PlanType, Subscription, SubscriptionId,
        SubscriptionStatus, UserId,
    },
};

/// Widget that approves every checkout after a short delay.
struct ApprovingWidget;

impl PaymentWidget for ApprovingWidget {
    fn open(&self, request: PaymentRequest, callbacks: PaymentCallbacks) {
        println!("checkout opened: {} {} ({})", request.amount, request.currency, request.description);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            callbacks.on_success(PaymentProof {
                payment_id: "pay_demo_001".into(),
                order_reference: "order_demo_001".into(),
                signature: "demo-signature".into(),
            });
        });
    }
}

fn plan(plan_type: PlanType, price: i64) -> Plan {
    Plan {
        id: PlanId::new(format!("veg-{plan_type}")).unwrap(),
        plan_type,
        dietary_preference: DietaryPreference::Veg,
        price: Money::from_minor(price),
        duration: 30,
        features: vec!["30 lunches".into()],
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let now = Utc::now();
    let user_id = UserId::new("user-demo")?;
    let address_id = AddressId::new("addr-home")?;

    let current = Subscription {
        id: SubscriptionId::new("sub-demo")?,
        user_id: user_id.clone(),
        plan_type: PlanType::Basic,
        dietary_preference: DietaryPreference::Veg,
        price: Some(Money::from_minor(2500)),
        person_count: 1,
        meals_per_month: 30,
        start_date: (now - Duration::days(10)).date_naive(),
        end_date: None,
        status: SubscriptionStatus::Active,
        delivery_address_id: address_id.clone(),
        time_slot: "lunch".into(),
        wallet_credit_applied: None,
        extra_charge_applied: None,
        version: 1,
    };

    let coordinator = SettlementCoordinator::new(
        InMemorySubscriptionStore::with_subscriptions(vec![current]),
        InMemoryPlanCatalog::new(vec![plan(PlanType::Basic, 2500), plan(PlanType::Premium, 4000)]),
        InMemoryAddressBook::new(vec![DeliveryAddress {
            id: address_id.clone(),
            user_id: user_id.clone(),
            label: "Home".into(),
        }]),
        CallbackGateway::new(ApprovingWidget),
        EngineConfig::default(),
    );

    let selection = PlanSelection {
        user_id,
        dietary_preference: DietaryPreference::Veg,
        plan_type: PlanType::Premium,
        person_count: 1,
        start_date: now.date_naive(),
        delivery_address_id: address_id,
        time_slot: "lunch".into(),
    };

    let quote = coordinator.quote(&selection, now).await?;
    println!("quote: {} -> {:?}", quote.action, quote.charge);

    let outcome = coordinator.settle(selection, now).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(())
}
