mod common;

use anyhow::Result;
use cassa::application::{ExpensePaid, InvoicePaid, LedgerError};
use cassa::domain::{LocationType, MovementType, ReferenceType};
use cassa::storage::MovementFilter;
use chrono::Utc;
use common::{StandardLocations, test_service};
use uuid::Uuid;

#[tokio::test]
async fn test_payment_received_credits_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let locations = StandardLocations::create(&service).await?;

    let outcome = service
        .record_payment_received(locations.register.id, 10000, "INV-1", Utc::now(), "u1")
        .await?;

    assert!(!outcome.already_recorded);
    assert_eq!(outcome.movement.movement_type, MovementType::PaymentReceived);
    assert_eq!(outcome.movement.reference_type, ReferenceType::Invoice);
    assert_eq!(outcome.movement.to_location, Some(locations.register.id));
    assert_eq!(outcome.movement.from_location, None);

    assert_eq!(service.get_balance(locations.register.id).await?, 10000);
    Ok(())
}

#[tokio::test]
async fn test_payment_received_is_idempotent() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let locations = StandardLocations::create(&service).await?;

    let first = service
        .record_payment_received(locations.register.id, 10000, "INV-1", Utc::now(), "u1")
        .await?;
    let second = service
        .record_payment_received(locations.register.id, 10000, "INV-1", Utc::now(), "u1")
        .await?;

    assert!(!first.already_recorded);
    assert!(second.already_recorded);
    assert_eq!(second.movement.id, first.movement.id);

    // Exactly one movement, exactly one credit
    let movements = service.list_movements(&MovementFilter::default()).await?;
    assert_eq!(movements.len(), 1);
    assert_eq!(service.get_balance(locations.register.id).await?, 10000);
    Ok(())
}

#[tokio::test]
async fn test_expense_paid_debits_balance_and_is_idempotent() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let locations = StandardLocations::create(&service).await?;
    locations.fund_register(&service, 50000).await?;

    let first = service
        .record_expense_paid(locations.register.id, 12000, "EXP-1", Utc::now(), "u1")
        .await?;
    let second = service
        .record_expense_paid(locations.register.id, 12000, "EXP-1", Utc::now(), "u1")
        .await?;

    assert!(!first.already_recorded);
    assert!(second.already_recorded);
    assert_eq!(first.movement.movement_type, MovementType::ExpensePaid);
    assert_eq!(first.movement.from_location, Some(locations.register.id));

    assert_eq!(service.get_balance(locations.register.id).await?, 38000);
    Ok(())
}

#[tokio::test]
async fn test_same_reference_different_types_do_not_collide() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let locations = StandardLocations::create(&service).await?;

    // An invoice and an expense may share the literal reference id "42"
    let payment = service
        .record_payment_received(locations.register.id, 10000, "42", Utc::now(), "u1")
        .await?;
    let expense = service
        .record_expense_paid(locations.register.id, 4000, "42", Utc::now(), "u1")
        .await?;

    assert!(!payment.already_recorded);
    assert!(!expense.already_recorded);
    assert_eq!(service.get_balance(locations.register.id).await?, 6000);
    Ok(())
}

#[tokio::test]
async fn test_invalid_amounts_rejected_before_any_write() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let locations = StandardLocations::create(&service).await?;

    let zero = service
        .record_expense_paid(locations.register.id, 0, "EXP-1", Utc::now(), "u1")
        .await;
    assert!(matches!(zero, Err(LedgerError::InvalidAmount(0))));

    let negative = service
        .record_expense_paid(locations.register.id, -500, "EXP-1", Utc::now(), "u1")
        .await;
    assert!(matches!(negative, Err(LedgerError::InvalidAmount(-500))));

    let payment = service
        .record_payment_received(locations.register.id, 0, "INV-1", Utc::now(), "u1")
        .await;
    assert!(matches!(payment, Err(LedgerError::InvalidAmount(0))));

    // Nothing written, nothing moved
    let movements = service.list_movements(&MovementFilter::default()).await?;
    assert!(movements.is_empty());
    assert_eq!(service.get_balance(locations.register.id).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_inactive_location_rejects_movements() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let locations = StandardLocations::create(&service).await?;

    service.deactivate_location("Cash Register").await?;

    let result = service
        .record_payment_received(locations.register.id, 10000, "INV-1", Utc::now(), "u1")
        .await;
    assert!(matches!(result, Err(LedgerError::LocationInactive(_))));

    let result = service
        .record_deposit(locations.register.id, 5000, Utc::now(), None, "u1")
        .await;
    assert!(matches!(result, Err(LedgerError::LocationInactive(_))));
    Ok(())
}

#[tokio::test]
async fn test_retried_payment_survives_location_deactivation() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let locations = StandardLocations::create(&service).await?;

    let first = service
        .record_payment_received(locations.register.id, 10000, "INV-1", Utc::now(), "u1")
        .await?;
    service.deactivate_location("Cash Register").await?;

    // The retry resolves through the guard before any location check
    let retried = service
        .record_payment_received(locations.register.id, 10000, "INV-1", Utc::now(), "u1")
        .await?;

    assert!(retried.already_recorded);
    assert_eq!(retried.movement.id, first.movement.id);
    assert_eq!(service.get_balance(locations.register.id).await?, 10000);
    Ok(())
}

#[tokio::test]
async fn test_unknown_location_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardLocations::create(&service).await?;

    let result = service
        .record_payment_received(Uuid::new_v4(), 10000, "INV-1", Utc::now(), "u1")
        .await;
    assert!(matches!(result, Err(LedgerError::LocationNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_deposit_and_withdrawal() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let locations = StandardLocations::create(&service).await?;

    service
        .record_deposit(
            locations.bank.id,
            100000,
            Utc::now(),
            Some("opening balance".into()),
            "u1",
        )
        .await?;
    service
        .record_withdrawal(locations.bank.id, 25000, Utc::now(), None, "u1")
        .await?;

    assert_eq!(service.get_balance(locations.bank.id).await?, 75000);

    let movements = service.list_movements(&MovementFilter::default()).await?;
    assert_eq!(movements.len(), 2);
    assert!(
        movements
            .iter()
            .all(|m| m.reference_type == ReferenceType::Manual)
    );
    Ok(())
}

#[tokio::test]
async fn test_movement_filtering() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let locations = StandardLocations::create(&service).await?;

    service
        .record_deposit(locations.register.id, 50000, Utc::now(), None, "u1")
        .await?;
    service
        .record_payment_received(locations.register.id, 10000, "INV-1", Utc::now(), "u1")
        .await?;
    service
        .record_deposit(locations.bank.id, 30000, Utc::now(), None, "u1")
        .await?;

    let register_only = service
        .list_movements(&MovementFilter {
            location: Some(locations.register.id),
            ..MovementFilter::default()
        })
        .await?;
    assert_eq!(register_only.len(), 2);

    let payments_only = service
        .list_movements(&MovementFilter {
            movement_type: Some(MovementType::PaymentReceived),
            ..MovementFilter::default()
        })
        .await?;
    assert_eq!(payments_only.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_on_invoice_paid_matches_location_by_name() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let locations = StandardLocations::create(&service).await?;

    let outcome = service
        .on_invoice_paid(InvoicePaid {
            invoice_id: "INV-77".into(),
            amount_cents: 45000,
            payment_method: "cash".into(),
            paid_at: Utc::now(),
            actor_id: "u1".into(),
        })
        .await?;

    // "cash" matches "Cash Register" by name fragment
    assert_eq!(outcome.movement.to_location, Some(locations.register.id));
    assert_eq!(service.get_balance(locations.register.id).await?, 45000);
    Ok(())
}

#[tokio::test]
async fn test_on_invoice_paid_falls_back_to_type_match() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let locations = StandardLocations::create(&service).await?;

    // No location named anything like "instapay", but the label infers a
    // digital wallet and one exists
    let outcome = service
        .on_invoice_paid(InvoicePaid {
            invoice_id: "INV-78".into(),
            amount_cents: 20000,
            payment_method: "InstaPay".into(),
            paid_at: Utc::now(),
            actor_id: "u1".into(),
        })
        .await?;

    assert_eq!(outcome.movement.to_location, Some(locations.wallet.id));
    assert_eq!(service.get_balance(locations.wallet.id).await?, 20000);
    Ok(())
}

#[tokio::test]
async fn test_on_invoice_paid_creates_default_location_as_last_resort() -> Result<()> {
    let (service, _temp) = test_service().await?;
    StandardLocations::create(&service).await?;

    let outcome = service
        .on_invoice_paid(InvoicePaid {
            invoice_id: "INV-79".into(),
            amount_cents: 15000,
            payment_method: "Cheque".into(),
            paid_at: Utc::now(),
            actor_id: "u1".into(),
        })
        .await?;

    let created = service.get_location_by_name("Cheque").await?;
    assert_eq!(created.location_type, LocationType::Other);
    assert_eq!(outcome.movement.to_location, Some(created.id));
    assert_eq!(created.balance_cents, 15000);
    Ok(())
}

#[tokio::test]
async fn test_on_expense_paid_retried_event_is_noop() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let locations = StandardLocations::create(&service).await?;
    locations.fund_register(&service, 100000).await?;

    let event = ExpensePaid {
        expense_id: "EXP-5".into(),
        amount_cents: 30000,
        payment_method: "cash".into(),
        paid_at: Utc::now(),
        actor_id: "u1".into(),
    };

    let first = service.on_expense_paid(event.clone()).await?;
    let second = service.on_expense_paid(event).await?;

    assert!(!first.already_recorded);
    assert!(second.already_recorded);
    assert_eq!(service.get_balance(locations.register.id).await?, 70000);
    Ok(())
}
