//! In-process ledger with the same transactional semantics as Postgres.
//!
//! A single mutex stands in for row locks and the unique constraint, so every
//! operation is atomic with respect to every other. Used for local runs
//! without a database and for the integration tests.

use crate::errors::{PaymentError, Result};
use crate::models::{
    InsertOutcome, LandlordPaymentConfig, LandlordRoute, NewPayment, Payment,
    PaymentConfigUpsert, PaymentRecord, PaymentStatus, Provider, Tenant,
};
use crate::store::LedgerStore;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct TillRoute {
    till_number: String,
    landlord_id: i64,
    active: bool,
}

#[derive(Debug, Clone)]
struct PaybillRoute {
    paybill: String,
    account_number: String,
    landlord_id: i64,
    active: bool,
}

#[derive(Debug, Default)]
struct LedgerState {
    tenants: BTreeMap<i64, Tenant>,
    tills: Vec<TillRoute>,
    paybills: Vec<PaybillRoute>,
    configs: HashMap<i64, LandlordPaymentConfig>,
    payments: Vec<Payment>,
    next_tenant_id: i64,
    next_payment_id: i64,
}

impl LedgerState {
    fn debit(&mut self, landlord_id: i64, tenant_id: i64, amount: Decimal) -> Result<()> {
        match self.tenants.get_mut(&tenant_id) {
            Some(tenant) if tenant.landlord_id == landlord_id => {
                tenant.balance -= amount;
                Ok(())
            }
            _ => Err(PaymentError::NotFound(format!("Tenant {}", tenant_id))),
        }
    }

    fn owned_tenant(&self, landlord_id: i64, tenant_id: i64) -> Option<&Tenant> {
        self.tenants
            .get(&tenant_id)
            .filter(|t| t.landlord_id == landlord_id)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<LedgerState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_tenant(
        &self,
        landlord_id: i64,
        tenant_name: &str,
        payment_no1: &str,
        payment_no2: &str,
        balance: Decimal,
    ) -> i64 {
        let mut state = self.state.lock().await;
        state.next_tenant_id += 1;
        let id = state.next_tenant_id;

        state.tenants.insert(
            id,
            Tenant {
                id,
                landlord_id,
                unit_id: id,
                tenant_name: tenant_name.to_string(),
                payment_no1: payment_no1.to_string(),
                payment_no2: payment_no2.to_string(),
                rent: balance,
                balance,
            },
        );

        id
    }

    pub async fn add_till(&self, till_number: &str, landlord_id: i64, active: bool) {
        self.state.lock().await.tills.push(TillRoute {
            till_number: till_number.to_string(),
            landlord_id,
            active,
        });
    }

    pub async fn add_paybill(&self, paybill: &str, account_number: &str, landlord_id: i64, active: bool) {
        self.state.lock().await.paybills.push(PaybillRoute {
            paybill: paybill.to_string(),
            account_number: account_number.to_string(),
            landlord_id,
            active,
        });
    }

    pub async fn tenant(&self, tenant_id: i64) -> Option<Tenant> {
        self.state.lock().await.tenants.get(&tenant_id).cloned()
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.state.lock().await.payments.clone()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn resolve_landlord(&self, route: &LandlordRoute) -> Result<Option<i64>> {
        let state = self.state.lock().await;

        let routed = match route {
            LandlordRoute::Till { till_number } => state
                .tills
                .iter()
                .find(|t| t.active && &t.till_number == till_number)
                .map(|t| t.landlord_id),
            LandlordRoute::Paybill {
                paybill,
                account_number,
            } => state
                .paybills
                .iter()
                .find(|p| p.active && &p.paybill == paybill && &p.account_number == account_number)
                .map(|p| p.landlord_id),
        };

        if routed.is_some() {
            return Ok(routed);
        }

        Ok(state
            .configs
            .values()
            .find(|c| c.short_code == route.short_code())
            .map(|c| c.landlord_id))
    }

    async fn receipt_exists(&self, provider: Provider, receipt: &str) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .any(|p| p.provider == provider.as_str() && p.receipt == receipt))
    }

    async fn find_tenant_by_phone(&self, landlord_id: i64, phone: &str) -> Result<Option<Tenant>> {
        if phone.is_empty() {
            return Ok(None);
        }

        let state = self.state.lock().await;
        // BTreeMap iterates in id order, so the first hit is the lowest id
        Ok(state
            .tenants
            .values()
            .find(|t| t.landlord_id == landlord_id && (t.payment_no1 == phone || t.payment_no2 == phone))
            .cloned())
    }

    async fn find_tenant(&self, landlord_id: i64, tenant_id: i64) -> Result<Option<Tenant>> {
        let state = self.state.lock().await;
        Ok(state.owned_tenant(landlord_id, tenant_id).cloned())
    }

    async fn insert_payment(&self, payment: NewPayment) -> Result<InsertOutcome> {
        let mut state = self.state.lock().await;

        let duplicate = state
            .payments
            .iter()
            .any(|p| p.provider == payment.provider.as_str() && p.receipt == payment.receipt);
        if duplicate {
            return Ok(InsertOutcome::DuplicateReceipt);
        }

        if let (Some(tenant_id), PaymentStatus::Completed) = (payment.tenant_id, payment.status) {
            state.debit(payment.landlord_id, tenant_id, payment.amount)?;
        }

        state.next_payment_id += 1;
        let now = Utc::now();
        let record = Payment {
            id: state.next_payment_id,
            landlord_id: payment.landlord_id,
            tenant_id: payment.tenant_id,
            amount: payment.amount,
            status: payment.status.as_str().to_string(),
            method: payment.method.as_str().to_string(),
            provider: payment.provider.as_str().to_string(),
            receipt: payment.receipt,
            phone: payment.phone,
            account_ref: payment.account_ref,
            created_at: now,
            updated_at: now,
        };
        state.payments.push(record.clone());

        Ok(InsertOutcome::Inserted(record))
    }

    async fn assign_payment(&self, landlord_id: i64, payment_id: i64, tenant_id: i64) -> Result<Payment> {
        let mut state = self.state.lock().await;

        if state.owned_tenant(landlord_id, tenant_id).is_none() {
            return Err(PaymentError::NotFound(format!("Tenant {}", tenant_id)));
        }

        let index = state
            .payments
            .iter()
            .position(|p| p.id == payment_id && p.landlord_id == landlord_id)
            .ok_or_else(|| PaymentError::NotFound(format!("Payment {}", payment_id)))?;

        let current = &state.payments[index];
        if current.tenant_id.is_some() || current.status == PaymentStatus::Completed.as_str() {
            return Err(PaymentError::AlreadyAssigned(payment_id));
        }

        let amount = current.amount;
        state.debit(landlord_id, tenant_id, amount)?;

        let payment = &mut state.payments[index];
        payment.tenant_id = Some(tenant_id);
        payment.status = PaymentStatus::Completed.as_str().to_string();
        payment.updated_at = Utc::now();

        Ok(payment.clone())
    }

    async fn list_payments(&self, landlord_id: i64, limit: i64, offset: i64) -> Result<Vec<PaymentRecord>> {
        let state = self.state.lock().await;

        let records = state
            .payments
            .iter()
            .rev()
            .filter(|p| p.landlord_id == landlord_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|p| PaymentRecord {
                id: p.id,
                landlord_id: p.landlord_id,
                tenant_id: p.tenant_id,
                tenant_name: p
                    .tenant_id
                    .and_then(|id| state.tenants.get(&id))
                    .map(|t| t.tenant_name.clone()),
                amount: p.amount,
                status: p.status.clone(),
                method: p.method.clone(),
                provider: p.provider.clone(),
                receipt: p.receipt.clone(),
                phone: p.phone.clone(),
                account_ref: p.account_ref.clone(),
                created_at: p.created_at,
            })
            .collect();

        Ok(records)
    }

    async fn tenant_history(&self, landlord_id: i64, tenant_id: i64) -> Result<Vec<Payment>> {
        let state = self.state.lock().await;

        if state.owned_tenant(landlord_id, tenant_id).is_none() {
            return Err(PaymentError::NotFound(format!("Tenant {}", tenant_id)));
        }

        Ok(state
            .payments
            .iter()
            .rev()
            .filter(|p| p.landlord_id == landlord_id && p.tenant_id == Some(tenant_id))
            .cloned()
            .collect())
    }

    async fn upsert_payment_config(&self, config: PaymentConfigUpsert) -> Result<LandlordPaymentConfig> {
        let mut state = self.state.lock().await;

        let taken = state
            .configs
            .values()
            .any(|c| c.short_code == config.short_code && c.landlord_id != config.landlord_id);
        if taken {
            return Err(PaymentError::ShortCodeTaken(config.short_code));
        }

        let now = Utc::now();
        let created_at = state
            .configs
            .get(&config.landlord_id)
            .map(|c| c.created_at)
            .unwrap_or(now);

        let saved = LandlordPaymentConfig {
            landlord_id: config.landlord_id,
            short_code: config.short_code,
            short_code_type: config.short_code_type.as_str().to_string(),
            consumer_key: config.encrypted_key,
            consumer_secret: config.encrypted_secret,
            environment: config.environment.as_str().to_string(),
            validation_enabled: config.validation_enabled,
            created_at,
            updated_at: now,
        };
        state.configs.insert(saved.landlord_id, saved.clone());

        Ok(saved)
    }

    async fn get_payment_config(&self, landlord_id: i64) -> Result<Option<LandlordPaymentConfig>> {
        Ok(self.state.lock().await.configs.get(&landlord_id).cloned())
    }
}
