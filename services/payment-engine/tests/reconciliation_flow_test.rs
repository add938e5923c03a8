// End-to-end reconciliation against the in-memory ledger

use payment_engine::errors::PaymentError;
use payment_engine::models::{
    Acknowledgement, CashPaymentRequest, GatewayEnvironment, ListPaymentsQuery,
    PaymentConfigUpsert, ShortCodeType,
};
use payment_engine::reconciliation::ReconciliationEngine;
use payment_engine::store::{InMemoryLedgerStore, LedgerStore};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

const LANDLORD: i64 = 1;

fn setup() -> (Arc<InMemoryLedgerStore>, Arc<ReconciliationEngine>) {
    let store = Arc::new(InMemoryLedgerStore::new());
    let engine = Arc::new(ReconciliationEngine::new(
        store.clone() as Arc<dyn LedgerStore>,
        Duration::from_secs(5),
    ));
    (store, engine)
}

fn till_confirmation(till: &str, phone: &str, amount: &str, receipt: &str) -> Vec<u8> {
    format!(
        r#"{{"TransactionType":"Buy Goods","TransID":"{receipt}","TransTime":"20240601120000","TransAmount":"{amount}","BusinessShortCode":"{till}","BillRefNumber":"","MSISDN":"{phone}","FirstName":"JOHN"}}"#
    )
    .into_bytes()
}

fn paybill_confirmation(paybill: &str, account: &str, phone: &str, amount: &str, receipt: &str) -> Vec<u8> {
    format!(
        r#"{{"TransID":"{receipt}","TransAmount":{amount},"BusinessShortCode":"{paybill}","BillRefNumber":"{account}","MSISDN":"{phone}"}}"#
    )
    .into_bytes()
}

#[tokio::test]
async fn test_till_payment_debits_matched_tenant_once() {
    let (store, engine) = setup();
    store.add_till("111111", LANDLORD, true).await;
    let tenant = store
        .add_tenant(LANDLORD, "Alice", "254712345678", "", dec!(5000))
        .await;

    let body = till_confirmation("111111", "0712345678", "2000", "R1");

    let ack = engine.handle_confirmation(&body).await;
    assert_eq!(ack, Acknowledgement::success());

    let payments = store.payments().await;
    assert_eq!(payments.len(), 1);
    let payment = &payments[0];
    assert_eq!(payment.landlord_id, LANDLORD);
    assert_eq!(payment.tenant_id, Some(tenant));
    assert_eq!(payment.amount, dec!(2000));
    assert_eq!(payment.status, "COMPLETED");
    assert_eq!(payment.method, "MPESA_TILL");
    assert_eq!(payment.receipt, "R1");
    assert_eq!(store.tenant(tenant).await.unwrap().balance, dec!(3000));

    // Redelivery is a no-op acknowledged as success
    let ack = engine.handle_confirmation(&body).await;
    assert_eq!(ack, Acknowledgement::success());
    assert_eq!(store.payments().await.len(), 1);
    assert_eq!(store.tenant(tenant).await.unwrap().balance, dec!(3000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deliveries_record_one_payment() {
    let (store, engine) = setup();
    store.add_till("111111", LANDLORD, true).await;
    let tenant = store
        .add_tenant(LANDLORD, "Alice", "254712345678", "", dec!(5000))
        .await;

    let body = Arc::new(till_confirmation("111111", "+254712345678", "1000", "RACE1"));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let engine = engine.clone();
            let body = body.clone();
            tokio::spawn(async move { engine.handle_confirmation(&body).await })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap(), Acknowledgement::success());
    }

    assert_eq!(store.payments().await.len(), 1);
    assert_eq!(store.tenant(tenant).await.unwrap().balance, dec!(4000));
}

#[tokio::test]
async fn test_unknown_short_code_records_nothing() {
    let (store, engine) = setup();
    store.add_till("111111", LANDLORD, true).await;

    let ack = engine
        .handle_confirmation(&till_confirmation("999999", "0712345678", "2000", "R2"))
        .await;

    assert_eq!(ack.result_code, 0);
    assert_eq!(ack, Acknowledgement::received());
    assert!(store.payments().await.is_empty());
}

#[tokio::test]
async fn test_lowest_tenant_id_wins_on_shared_phone() {
    let (store, engine) = setup();
    store.add_till("111111", LANDLORD, true).await;
    let first = store
        .add_tenant(LANDLORD, "First", "254700000001", "254712345678", dec!(1000))
        .await;
    let second = store
        .add_tenant(LANDLORD, "Second", "254712345678", "", dec!(1000))
        .await;

    engine
        .handle_confirmation(&till_confirmation("111111", "0712345678", "100", "R3"))
        .await;

    assert_eq!(store.payments().await[0].tenant_id, Some(first));
    assert_eq!(store.tenant(first).await.unwrap().balance, dec!(900));
    assert_eq!(store.tenant(second).await.unwrap().balance, dec!(1000));
}

#[tokio::test]
async fn test_phone_matching_is_scoped_to_landlord() {
    let (store, engine) = setup();
    store.add_till("111111", LANDLORD, true).await;
    let other = store
        .add_tenant(2, "Elsewhere", "254712345678", "", dec!(1000))
        .await;

    engine
        .handle_confirmation(&till_confirmation("111111", "0712345678", "100", "R4"))
        .await;

    let payments = store.payments().await;
    assert_eq!(payments[0].status, "PENDING");
    assert_eq!(payments[0].tenant_id, None);
    assert_eq!(store.tenant(other).await.unwrap().balance, dec!(1000));
}

#[tokio::test]
async fn test_empty_phone_stays_pending() {
    let (store, engine) = setup();
    store.add_till("111111", LANDLORD, true).await;
    // A tenant with a blank second number must not match a blank MSISDN
    store.add_tenant(LANDLORD, "Blank", "254700000009", "", dec!(1000)).await;

    engine
        .handle_confirmation(&till_confirmation("111111", "", "100", "R5"))
        .await;

    let payments = store.payments().await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, "PENDING");
    assert_eq!(payments[0].phone, None);
}

#[tokio::test]
async fn test_paybill_routes_by_account() {
    let (store, engine) = setup();
    store.add_paybill("600100", "HSE-4", LANDLORD, true).await;
    store.add_paybill("600100", "HSE-5", 2, true).await;
    let tenant = store
        .add_tenant(LANDLORD, "Bob", "254722000000", "", dec!(8000))
        .await;

    let ack = engine
        .handle_confirmation(&paybill_confirmation("600100", "HSE-4", "0722000000", "2500.50", "R6"))
        .await;
    assert_eq!(ack, Acknowledgement::success());

    let payment = &store.payments().await[0];
    assert_eq!(payment.method, "MPESA_PAYBILL");
    assert_eq!(payment.account_ref.as_deref(), Some("HSE-4"));
    assert_eq!(store.tenant(tenant).await.unwrap().balance, dec!(5499.50));
}

#[tokio::test]
async fn test_gateway_config_routes_regardless_of_bill_ref() {
    let (store, engine) = setup();
    store
        .upsert_payment_config(PaymentConfigUpsert {
            landlord_id: LANDLORD,
            short_code: "600100".into(),
            short_code_type: ShortCodeType::Paybill,
            encrypted_key: "k".into(),
            encrypted_secret: "s".into(),
            environment: GatewayEnvironment::Sandbox,
            validation_enabled: false,
        })
        .await
        .unwrap();
    let tenant = store
        .add_tenant(LANDLORD, "Alice", "254712345678", "", dec!(5000))
        .await;

    // Paybill short code, but the payer left BillRefNumber empty
    let ack = engine
        .handle_confirmation(&till_confirmation("600100", "0712345678", "2000", "R9"))
        .await;
    assert_eq!(ack, Acknowledgement::success());

    let payments = store.payments().await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].landlord_id, LANDLORD);
    assert_eq!(payments[0].tenant_id, Some(tenant));
    assert_eq!(store.tenant(tenant).await.unwrap().balance, dec!(3000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_assignments_debit_once() {
    let (store, engine) = setup();
    store.add_till("111111", LANDLORD, true).await;
    let tenant = store
        .add_tenant(LANDLORD, "Carol", "254733000000", "", dec!(3000))
        .await;

    engine
        .handle_confirmation(&till_confirmation("111111", "0799999999", "1200", "R7"))
        .await;
    let payment_id = store.payments().await[0].id;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.assign_payment(LANDLORD, payment_id, tenant).await })
        })
        .collect();

    let mut assigned = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(payment) => {
                assigned += 1;
                assert_eq!(payment.status, "COMPLETED");
                assert_eq!(payment.tenant_id, Some(tenant));
            }
            Err(e) => assert!(matches!(e, PaymentError::AlreadyAssigned(id) if id == payment_id)),
        }
    }

    assert_eq!(assigned, 1);
    assert_eq!(store.tenant(tenant).await.unwrap().balance, dec!(1800));
}

#[tokio::test]
async fn test_assignment_checks_ownership() {
    let (store, engine) = setup();
    store.add_till("111111", LANDLORD, true).await;
    let foreign = store.add_tenant(2, "Dave", "254744000000", "", dec!(100)).await;

    engine
        .handle_confirmation(&till_confirmation("111111", "0799999999", "50", "R8"))
        .await;
    let payment_id = store.payments().await[0].id;

    assert!(matches!(
        engine.assign_payment(LANDLORD, payment_id, foreign).await,
        Err(PaymentError::NotFound(_))
    ));
    // Another landlord cannot see this payment at all
    assert!(matches!(
        engine.assign_payment(2, payment_id, foreign).await,
        Err(PaymentError::NotFound(_))
    ));
    assert_eq!(store.payments().await[0].status, "PENDING");
}

#[tokio::test]
async fn test_cash_payment_and_history() {
    let (store, engine) = setup();
    let tenant = store.add_tenant(LANDLORD, "Erin", "", "", dec!(10000)).await;

    let payment = engine
        .record_cash_payment(
            LANDLORD,
            CashPaymentRequest {
                tenant_id: tenant,
                amount: dec!(4000),
                receipt: Some("BOOK-001".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(payment.method, "CASH");
    assert_eq!(payment.provider, "CASH");
    assert_eq!(store.tenant(tenant).await.unwrap().balance, dec!(6000));

    let duplicate = engine
        .record_cash_payment(
            LANDLORD,
            CashPaymentRequest {
                tenant_id: tenant,
                amount: dec!(4000),
                receipt: Some("BOOK-001".into()),
            },
        )
        .await;
    assert!(matches!(duplicate, Err(PaymentError::DuplicateReceipt(_))));
    assert_eq!(store.tenant(tenant).await.unwrap().balance, dec!(6000));

    let history = engine.tenant_history(LANDLORD, tenant).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(matches!(
        engine.tenant_history(2, tenant).await,
        Err(PaymentError::NotFound(_))
    ));

    let listing = engine
        .list_payments(LANDLORD, &ListPaymentsQuery::default())
        .await
        .unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].tenant_name.as_deref(), Some("Erin"));
}
