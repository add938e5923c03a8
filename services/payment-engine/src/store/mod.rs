pub mod memory;
pub mod postgres;

pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;

use crate::errors::Result;
use crate::models::{
    InsertOutcome, LandlordPaymentConfig, LandlordRoute, NewPayment, Payment,
    PaymentConfigUpsert, PaymentRecord, Provider, Tenant,
};
use async_trait::async_trait;

/// Transactional ledger the reconciliation engine and config manager run on.
///
/// Every method that touches both a payment and a tenant balance does so
/// atomically: either both changes are visible or neither is.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Landlord owning an active till or paybill+account, falling back to the
    /// gateway config registered for the same short code.
    async fn resolve_landlord(&self, route: &LandlordRoute) -> Result<Option<i64>>;

    async fn receipt_exists(&self, provider: Provider, receipt: &str) -> Result<bool>;

    /// Lowest-id tenant of the landlord whose payment_no1 or payment_no2
    /// equals `phone`. An empty phone never matches.
    async fn find_tenant_by_phone(&self, landlord_id: i64, phone: &str) -> Result<Option<Tenant>>;

    async fn find_tenant(&self, landlord_id: i64, tenant_id: i64) -> Result<Option<Tenant>>;

    /// Insert the payment and, when it is COMPLETED against a tenant, debit
    /// that tenant's balance in the same transaction. A (provider, receipt)
    /// conflict yields [`InsertOutcome::DuplicateReceipt`].
    async fn insert_payment(&self, payment: NewPayment) -> Result<InsertOutcome>;

    /// Attach a pending payment to a tenant, complete it and debit the tenant.
    async fn assign_payment(&self, landlord_id: i64, payment_id: i64, tenant_id: i64) -> Result<Payment>;

    async fn list_payments(&self, landlord_id: i64, limit: i64, offset: i64) -> Result<Vec<PaymentRecord>>;

    async fn tenant_history(&self, landlord_id: i64, tenant_id: i64) -> Result<Vec<Payment>>;

    /// Insert or replace the landlord's gateway config. A short code already
    /// held by another landlord yields `ShortCodeTaken`.
    async fn upsert_payment_config(&self, config: PaymentConfigUpsert) -> Result<LandlordPaymentConfig>;

    async fn get_payment_config(&self, landlord_id: i64) -> Result<Option<LandlordPaymentConfig>>;
}
