use crate::errors::{PaymentError, Result};
use crate::metrics;
use crate::models::{
    Acknowledgement, CashPaymentRequest, InsertOutcome, ListPaymentsQuery, NewPayment,
    Payment, PaymentEvent, PaymentMethod, PaymentRecord, PaymentStatus, Provider,
};
use crate::normalizer;
use crate::store::LedgerStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const LOG_TARGET: &str = "reconciliation";

pub struct ReconciliationEngine {
    store: Arc<dyn LedgerStore>,
    deadline: Duration,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn LedgerStore>, deadline: Duration) -> Self {
        Self { store, deadline }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Process a raw confirmation body and build the gateway reply.
    ///
    /// Never fails: every outcome is acknowledged with ResultCode 0 so the
    /// gateway does not retry into the same error.
    pub async fn handle_confirmation(&self, body: &[u8]) -> Acknowledgement {
        let timer = metrics::RECONCILE_DURATION.start_timer();

        let result = match timeout(self.deadline, self.process_confirmation(body)).await {
            Ok(result) => result,
            Err(_) => Err(PaymentError::Timeout(format!(
                "confirmation not reconciled within {:?}",
                self.deadline
            ))),
        };

        timer.observe_duration();

        match result {
            Ok(_) => {
                metrics::record_callback("recorded");
                Acknowledgement::success()
            }
            Err(PaymentError::DuplicateReceipt(_)) => {
                metrics::record_callback("duplicate");
                Acknowledgement::success()
            }
            Err(PaymentError::Validation(reason)) => {
                metrics::record_callback("invalid");
                warn!(target: LOG_TARGET, outcome = "invalid", %reason, "Rejected confirmation payload");
                Acknowledgement::received()
            }
            Err(PaymentError::UnknownShortCode(short_code)) => {
                metrics::record_callback("unrouted");
                warn!(target: LOG_TARGET, outcome = "unrouted", %short_code, "No landlord for short code");
                Acknowledgement::received()
            }
            Err(PaymentError::Timeout(reason)) => {
                metrics::record_callback("timeout");
                error!(target: LOG_TARGET, outcome = "timeout", %reason, "Confirmation processing timed out");
                Acknowledgement::received()
            }
            Err(e) => {
                metrics::record_callback("failed");
                error!(target: LOG_TARGET, outcome = "failed", error = %e, "Failed to reconcile confirmation");
                Acknowledgement::received()
            }
        }
    }

    /// Validation callbacks are always accepted; the payload is logged only.
    pub fn handle_validation(&self, body: &[u8]) -> Acknowledgement {
        match normalizer::normalize_confirmation(body) {
            Ok(event) => debug!(
                target: LOG_TARGET,
                receipt = %event.receipt,
                short_code = %event.business_id,
                amount = %event.amount,
                "Validation request"
            ),
            Err(e) => debug!(target: LOG_TARGET, error = %e, "Unparseable validation request"),
        }

        metrics::record_callback("validation");
        Acknowledgement::accepted()
    }

    async fn process_confirmation(&self, body: &[u8]) -> Result<Payment> {
        let event = normalizer::normalize_confirmation(body)?;
        self.reconcile(&event).await
    }

    /// Route, deduplicate, match and persist one payment event.
    pub async fn reconcile(&self, event: &PaymentEvent) -> Result<Payment> {
        let route = event.route();
        let landlord_id = self
            .store
            .resolve_landlord(&route)
            .await?
            .ok_or_else(|| PaymentError::UnknownShortCode(route.short_code().to_string()))?;

        if self.store.receipt_exists(event.provider, &event.receipt).await? {
            info!(
                target: LOG_TARGET,
                receipt = %event.receipt,
                landlord_id,
                outcome = "duplicate",
                "Receipt already recorded"
            );
            return Err(PaymentError::DuplicateReceipt(event.receipt.clone()));
        }

        let tenant = self
            .store
            .find_tenant_by_phone(landlord_id, &event.phone)
            .await?;

        let status = if tenant.is_some() {
            PaymentStatus::Completed
        } else {
            PaymentStatus::Pending
        };

        let new_payment = NewPayment {
            landlord_id,
            tenant_id: tenant.as_ref().map(|t| t.id),
            amount: event.amount,
            status,
            method: event.channel.method(),
            provider: event.provider,
            receipt: event.receipt.clone(),
            phone: (!event.phone.is_empty()).then(|| event.phone.clone()),
            account_ref: event.account_ref.clone(),
        };

        match self.store.insert_payment(new_payment).await? {
            InsertOutcome::Inserted(payment) => {
                metrics::record_payment(&payment.method, &payment.status);
                info!(
                    target: LOG_TARGET,
                    receipt = %payment.receipt,
                    landlord_id,
                    tenant_id = ?payment.tenant_id,
                    amount = %payment.amount,
                    status = %payment.status,
                    outcome = "recorded",
                    "Payment recorded"
                );
                Ok(payment)
            }
            InsertOutcome::DuplicateReceipt => {
                info!(
                    target: LOG_TARGET,
                    receipt = %event.receipt,
                    landlord_id,
                    outcome = "duplicate",
                    "Concurrent delivery lost the insert race"
                );
                Err(PaymentError::DuplicateReceipt(event.receipt.clone()))
            }
        }
    }

    /// Attach a pending payment to one of the landlord's tenants.
    pub async fn assign_payment(&self, landlord_id: i64, payment_id: i64, tenant_id: i64) -> Result<Payment> {
        match self.store.assign_payment(landlord_id, payment_id, tenant_id).await {
            Ok(payment) => {
                metrics::record_assignment("assigned");
                info!(
                    target: LOG_TARGET,
                    payment_id,
                    landlord_id,
                    tenant_id,
                    amount = %payment.amount,
                    outcome = "assigned",
                    "Payment assigned"
                );
                Ok(payment)
            }
            Err(e) => {
                metrics::record_assignment(e.error_type());
                warn!(target: LOG_TARGET, payment_id, landlord_id, tenant_id, error = %e, "Assignment refused");
                Err(e)
            }
        }
    }

    /// Record a cash payment and debit the tenant in one transaction.
    pub async fn record_cash_payment(&self, landlord_id: i64, request: CashPaymentRequest) -> Result<Payment> {
        let amount = normalizer::validate_amount(request.amount)?;

        if self.store.find_tenant(landlord_id, request.tenant_id).await?.is_none() {
            return Err(PaymentError::NotFound(format!("Tenant {}", request.tenant_id)));
        }

        let receipt = request
            .receipt
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| format!("CASH-{}", Uuid::new_v4().simple()));

        let new_payment = NewPayment {
            landlord_id,
            tenant_id: Some(request.tenant_id),
            amount,
            status: PaymentStatus::Completed,
            method: PaymentMethod::Cash,
            provider: Provider::Cash,
            receipt: receipt.clone(),
            phone: None,
            account_ref: None,
        };

        match self.store.insert_payment(new_payment).await? {
            InsertOutcome::Inserted(payment) => {
                metrics::record_payment(&payment.method, &payment.status);
                info!(
                    target: LOG_TARGET,
                    receipt = %payment.receipt,
                    landlord_id,
                    tenant_id = request.tenant_id,
                    amount = %payment.amount,
                    outcome = "recorded",
                    "Cash payment recorded"
                );
                Ok(payment)
            }
            InsertOutcome::DuplicateReceipt => Err(PaymentError::DuplicateReceipt(receipt)),
        }
    }

    pub async fn list_payments(&self, landlord_id: i64, query: &ListPaymentsQuery) -> Result<Vec<PaymentRecord>> {
        let (limit, offset) = query.clamped();
        self.store.list_payments(landlord_id, limit, offset).await
    }

    pub async fn tenant_history(&self, landlord_id: i64, tenant_id: i64) -> Result<Vec<Payment>> {
        self.store.tenant_history(landlord_id, tenant_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Channel, LandlordRoute, Tenant};
    use crate::store::MockLedgerStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    const TILL_BODY: &[u8] = br#"{"TransID":"R1","TransAmount":"2000","BusinessShortCode":"111111","MSISDN":"0712345678"}"#;

    fn tenant(id: i64) -> Tenant {
        Tenant {
            id,
            landlord_id: 1,
            unit_id: 10,
            tenant_name: "Tenant".into(),
            payment_no1: "254712345678".into(),
            payment_no2: String::new(),
            rent: dec!(5000),
            balance: dec!(5000),
        }
    }

    fn stored(payment: &NewPayment) -> Payment {
        Payment {
            id: 1,
            landlord_id: payment.landlord_id,
            tenant_id: payment.tenant_id,
            amount: payment.amount,
            status: payment.status.as_str().into(),
            method: payment.method.as_str().into(),
            provider: payment.provider.as_str().into(),
            receipt: payment.receipt.clone(),
            phone: payment.phone.clone(),
            account_ref: payment.account_ref.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn engine(store: MockLedgerStore) -> ReconciliationEngine {
        ReconciliationEngine::new(Arc::new(store), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_matched_payment_is_completed() {
        let mut store = MockLedgerStore::new();
        store
            .expect_resolve_landlord()
            .withf(|route| *route == LandlordRoute::Till { till_number: "111111".into() })
            .returning(|_| Ok(Some(1)));
        store.expect_receipt_exists().returning(|_, _| Ok(false));
        store
            .expect_find_tenant_by_phone()
            .withf(|landlord, phone| *landlord == 1 && phone == "254712345678")
            .returning(|_, _| Ok(Some(tenant(7))));
        store
            .expect_insert_payment()
            .withf(|p| {
                p.tenant_id == Some(7)
                    && p.status == PaymentStatus::Completed
                    && p.method == Channel::Till.method()
                    && p.amount == dec!(2000)
            })
            .times(1)
            .returning(|p| Ok(InsertOutcome::Inserted(stored(&p))));

        let ack = engine(store).handle_confirmation(TILL_BODY).await;
        assert_eq!(ack, Acknowledgement::success());
    }

    #[tokio::test]
    async fn test_unmatched_payment_stays_pending() {
        let mut store = MockLedgerStore::new();
        store.expect_resolve_landlord().returning(|_| Ok(Some(1)));
        store.expect_receipt_exists().returning(|_, _| Ok(false));
        store.expect_find_tenant_by_phone().returning(|_, _| Ok(None));
        store
            .expect_insert_payment()
            .withf(|p| p.tenant_id.is_none() && p.status == PaymentStatus::Pending)
            .times(1)
            .returning(|p| Ok(InsertOutcome::Inserted(stored(&p))));

        let ack = engine(store).handle_confirmation(TILL_BODY).await;
        assert_eq!(ack, Acknowledgement::success());
    }

    #[tokio::test]
    async fn test_unknown_short_code_persists_nothing() {
        let mut store = MockLedgerStore::new();
        store.expect_resolve_landlord().returning(|_| Ok(None));
        store.expect_insert_payment().never();

        let ack = engine(store).handle_confirmation(TILL_BODY).await;
        assert_eq!(ack, Acknowledgement::received());
        assert_eq!(ack.result_code, 0);
    }

    #[tokio::test]
    async fn test_known_receipt_is_acknowledged_as_success() {
        let mut store = MockLedgerStore::new();
        store.expect_resolve_landlord().returning(|_| Ok(Some(1)));
        store.expect_receipt_exists().returning(|_, _| Ok(true));
        store.expect_insert_payment().never();

        let ack = engine(store).handle_confirmation(TILL_BODY).await;
        assert_eq!(ack, Acknowledgement::success());
    }

    #[tokio::test]
    async fn test_lost_insert_race_is_a_duplicate() {
        let mut store = MockLedgerStore::new();
        store.expect_resolve_landlord().returning(|_| Ok(Some(1)));
        store.expect_receipt_exists().returning(|_, _| Ok(false));
        store.expect_find_tenant_by_phone().returning(|_, _| Ok(Some(tenant(7))));
        store
            .expect_insert_payment()
            .returning(|_| Ok(InsertOutcome::DuplicateReceipt));

        let engine = engine(store);
        let event = normalizer::normalize_confirmation(TILL_BODY).unwrap();
        assert!(matches!(
            engine.reconcile(&event).await,
            Err(PaymentError::DuplicateReceipt(_))
        ));
    }

    #[tokio::test]
    async fn test_persistence_failure_still_acknowledged() {
        let mut store = MockLedgerStore::new();
        store.expect_resolve_landlord().returning(|_| Ok(Some(1)));
        store.expect_receipt_exists().returning(|_, _| Ok(false));
        store.expect_find_tenant_by_phone().returning(|_, _| Ok(Some(tenant(7))));
        store
            .expect_insert_payment()
            .returning(|_| Err(PaymentError::Persistence(sqlx::Error::PoolTimedOut)));

        let ack = engine(store).handle_confirmation(TILL_BODY).await;
        assert_eq!(ack, Acknowledgement::received());
    }

    #[tokio::test]
    async fn test_malformed_body_still_acknowledged() {
        let mut store = MockLedgerStore::new();
        store.expect_resolve_landlord().never();

        let ack = engine(store).handle_confirmation(b"{\"TransID\":").await;
        assert_eq!(ack, Acknowledgement::received());
    }

    #[tokio::test]
    async fn test_cash_payment_requires_owned_tenant() {
        let mut store = MockLedgerStore::new();
        store.expect_find_tenant().returning(|_, _| Ok(None));
        store.expect_insert_payment().never();

        let result = engine(store)
            .record_cash_payment(
                1,
                CashPaymentRequest {
                    tenant_id: 99,
                    amount: dec!(500),
                    receipt: None,
                },
            )
            .await;
        assert!(matches!(result, Err(PaymentError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cash_payment_generates_receipt() {
        let mut store = MockLedgerStore::new();
        store.expect_find_tenant().returning(|_, id| Ok(Some(tenant(id))));
        store
            .expect_insert_payment()
            .withf(|p| {
                p.receipt.starts_with("CASH-")
                    && p.provider == Provider::Cash
                    && p.method == PaymentMethod::Cash
                    && p.status == PaymentStatus::Completed
            })
            .returning(|p| Ok(InsertOutcome::Inserted(stored(&p))));

        let payment = engine(store)
            .record_cash_payment(
                1,
                CashPaymentRequest {
                    tenant_id: 7,
                    amount: dec!(500),
                    receipt: Some("  ".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(payment.tenant_id, Some(7));
    }

    #[tokio::test]
    async fn test_cash_payment_rejects_bad_amount() {
        let store = MockLedgerStore::new();
        let result = engine(store)
            .record_cash_payment(
                1,
                CashPaymentRequest {
                    tenant_id: 7,
                    amount: dec!(-1),
                    receipt: None,
                },
            )
            .await;
        assert!(matches!(result, Err(PaymentError::Validation(_))));
    }

    /// In-memory ledger whose inserts stall long enough to blow any deadline.
    struct StalledLedger {
        inner: crate::store::InMemoryLedgerStore,
        stall: Duration,
    }

    #[async_trait::async_trait]
    impl LedgerStore for StalledLedger {
        async fn resolve_landlord(&self, route: &LandlordRoute) -> Result<Option<i64>> {
            self.inner.resolve_landlord(route).await
        }

        async fn receipt_exists(&self, provider: Provider, receipt: &str) -> Result<bool> {
            self.inner.receipt_exists(provider, receipt).await
        }

        async fn find_tenant_by_phone(&self, landlord_id: i64, phone: &str) -> Result<Option<Tenant>> {
            self.inner.find_tenant_by_phone(landlord_id, phone).await
        }

        async fn find_tenant(&self, landlord_id: i64, tenant_id: i64) -> Result<Option<Tenant>> {
            self.inner.find_tenant(landlord_id, tenant_id).await
        }

        async fn insert_payment(&self, payment: NewPayment) -> Result<InsertOutcome> {
            tokio::time::sleep(self.stall).await;
            self.inner.insert_payment(payment).await
        }

        async fn assign_payment(&self, landlord_id: i64, payment_id: i64, tenant_id: i64) -> Result<Payment> {
            self.inner.assign_payment(landlord_id, payment_id, tenant_id).await
        }

        async fn list_payments(&self, landlord_id: i64, limit: i64, offset: i64) -> Result<Vec<PaymentRecord>> {
            self.inner.list_payments(landlord_id, limit, offset).await
        }

        async fn tenant_history(&self, landlord_id: i64, tenant_id: i64) -> Result<Vec<Payment>> {
            self.inner.tenant_history(landlord_id, tenant_id).await
        }

        async fn upsert_payment_config(
            &self,
            config: crate::models::PaymentConfigUpsert,
        ) -> Result<crate::models::LandlordPaymentConfig> {
            self.inner.upsert_payment_config(config).await
        }

        async fn get_payment_config(
            &self,
            landlord_id: i64,
        ) -> Result<Option<crate::models::LandlordPaymentConfig>> {
            self.inner.get_payment_config(landlord_id).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_past_deadline_is_acknowledged() {
        let ledger = Arc::new(StalledLedger {
            inner: crate::store::InMemoryLedgerStore::new(),
            stall: Duration::from_secs(30),
        });
        ledger.inner.add_till("111111", 1, true).await;
        let tenant_id = ledger
            .inner
            .add_tenant(1, "Alice", "254712345678", "", dec!(5000))
            .await;

        let engine = ReconciliationEngine::new(ledger.clone(), Duration::from_secs(5));
        let ack = engine.handle_confirmation(TILL_BODY).await;

        assert_eq!(ack, Acknowledgement::received());
        assert!(ledger.inner.payments().await.is_empty());
        assert_eq!(ledger.inner.tenant(tenant_id).await.unwrap().balance, dec!(5000));
    }
}
