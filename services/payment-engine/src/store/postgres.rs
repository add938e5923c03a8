use crate::errors::{PaymentError, Result};
use crate::models::{
    InsertOutcome, LandlordPaymentConfig, LandlordRoute, NewPayment, Payment,
    PaymentConfigUpsert, PaymentRecord, PaymentStatus, Provider, Tenant,
};
use crate::store::LedgerStore;
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{debug, warn};

pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PaymentError::Internal(format!("migration failed: {}", e)))?;
        Ok(())
    }

    async fn debit_tenant(
        tx: &mut Transaction<'_, Postgres>,
        landlord_id: i64,
        tenant_id: i64,
        amount: Decimal,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tenants
            SET balance = balance - $1, updated_at = NOW()
            WHERE id = $2 AND landlord_id = $3
            "#,
        )
        .bind(amount)
        .bind(tenant_id)
        .bind(landlord_id)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PaymentError::NotFound(format!("Tenant {}", tenant_id)));
        }

        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn resolve_landlord(&self, route: &LandlordRoute) -> Result<Option<i64>> {
        let routed = match route {
            LandlordRoute::Till { till_number } => {
                sqlx::query_scalar::<_, i64>(
                    r#"
                    SELECT landlord_id FROM tills
                    WHERE till_number = $1 AND active = TRUE
                    LIMIT 1
                    "#,
                )
                .bind(till_number)
                .fetch_optional(&self.pool)
                .await?
            }
            LandlordRoute::Paybill {
                paybill,
                account_number,
            } => {
                sqlx::query_scalar::<_, i64>(
                    r#"
                    SELECT landlord_id FROM paybills
                    WHERE paybill = $1 AND account_number = $2 AND active = TRUE
                    LIMIT 1
                    "#,
                )
                .bind(paybill)
                .bind(account_number)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        if routed.is_some() {
            return Ok(routed);
        }

        let fallback = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT landlord_id FROM landlord_payment_configs
            WHERE short_code = $1
            "#,
        )
        .bind(route.short_code())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(landlord_id) = fallback {
            debug!(short_code = route.short_code(), landlord_id, "Routed via gateway config");
        }

        Ok(fallback)
    }

    async fn receipt_exists(&self, provider: Provider, receipt: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM payments WHERE provider = $1 AND receipt = $2)",
        )
        .bind(provider.as_str())
        .bind(receipt)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn find_tenant_by_phone(&self, landlord_id: i64, phone: &str) -> Result<Option<Tenant>> {
        if phone.is_empty() {
            return Ok(None);
        }

        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            SELECT id, landlord_id, unit_id, tenant_name, payment_no1, payment_no2, rent, balance
            FROM tenants
            WHERE landlord_id = $1 AND (payment_no1 = $2 OR payment_no2 = $2)
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(landlord_id)
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tenant)
    }

    async fn find_tenant(&self, landlord_id: i64, tenant_id: i64) -> Result<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            SELECT id, landlord_id, unit_id, tenant_name, payment_no1, payment_no2, rent, balance
            FROM tenants
            WHERE id = $1 AND landlord_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(landlord_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(tenant)
    }

    async fn insert_payment(&self, payment: NewPayment) -> Result<InsertOutcome> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments
                (landlord_id, tenant_id, amount, status, method, provider, receipt, phone, account_ref)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (provider, receipt) DO NOTHING
            RETURNING id, landlord_id, tenant_id, amount, status, method, provider, receipt,
                      phone, account_ref, created_at, updated_at
            "#,
        )
        .bind(payment.landlord_id)
        .bind(payment.tenant_id)
        .bind(payment.amount)
        .bind(payment.status.as_str())
        .bind(payment.method.as_str())
        .bind(payment.provider.as_str())
        .bind(&payment.receipt)
        .bind(&payment.phone)
        .bind(&payment.account_ref)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(record) = inserted else {
            tx.rollback().await?;
            return Ok(InsertOutcome::DuplicateReceipt);
        };

        if let (Some(tenant_id), PaymentStatus::Completed) = (payment.tenant_id, payment.status) {
            Self::debit_tenant(&mut tx, payment.landlord_id, tenant_id, payment.amount).await?;
        }

        tx.commit().await?;

        Ok(InsertOutcome::Inserted(record))
    }

    async fn assign_payment(&self, landlord_id: i64, payment_id: i64, tenant_id: i64) -> Result<Payment> {
        let mut tx = self.pool.begin().await?;

        let owned = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM tenants WHERE id = $1 AND landlord_id = $2",
        )
        .bind(tenant_id)
        .bind(landlord_id)
        .fetch_optional(&mut *tx)
        .await?;

        if owned.is_none() {
            return Err(PaymentError::NotFound(format!("Tenant {}", tenant_id)));
        }

        let current = sqlx::query_as::<_, Payment>(
            r#"
            SELECT id, landlord_id, tenant_id, amount, status, method, provider, receipt,
                   phone, account_ref, created_at, updated_at
            FROM payments
            WHERE id = $1 AND landlord_id = $2
            FOR UPDATE
            "#,
        )
        .bind(payment_id)
        .bind(landlord_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| PaymentError::NotFound(format!("Payment {}", payment_id)))?;

        if current.tenant_id.is_some() || current.status == PaymentStatus::Completed.as_str() {
            warn!(payment_id, landlord_id, "Payment already assigned");
            return Err(PaymentError::AlreadyAssigned(payment_id));
        }

        let updated = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET tenant_id = $1, status = $2, updated_at = NOW()
            WHERE id = $3
            RETURNING id, landlord_id, tenant_id, amount, status, method, provider, receipt,
                      phone, account_ref, created_at, updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(PaymentStatus::Completed.as_str())
        .bind(payment_id)
        .fetch_one(&mut *tx)
        .await?;

        Self::debit_tenant(&mut tx, landlord_id, tenant_id, updated.amount).await?;

        tx.commit().await?;

        Ok(updated)
    }

    async fn list_payments(&self, landlord_id: i64, limit: i64, offset: i64) -> Result<Vec<PaymentRecord>> {
        let records = sqlx::query_as::<_, PaymentRecord>(
            r#"
            SELECT p.id, p.landlord_id, p.tenant_id, t.tenant_name, p.amount, p.status,
                   p.method, p.provider, p.receipt, p.phone, p.account_ref, p.created_at
            FROM payments p
            LEFT JOIN tenants t ON t.id = p.tenant_id
            WHERE p.landlord_id = $1
            ORDER BY p.created_at DESC, p.id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(landlord_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn tenant_history(&self, landlord_id: i64, tenant_id: i64) -> Result<Vec<Payment>> {
        if self.find_tenant(landlord_id, tenant_id).await?.is_none() {
            return Err(PaymentError::NotFound(format!("Tenant {}", tenant_id)));
        }

        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT id, landlord_id, tenant_id, amount, status, method, provider, receipt,
                   phone, account_ref, created_at, updated_at
            FROM payments
            WHERE tenant_id = $1 AND landlord_id = $2
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(tenant_id)
        .bind(landlord_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(payments)
    }

    async fn upsert_payment_config(&self, config: PaymentConfigUpsert) -> Result<LandlordPaymentConfig> {
        let saved = sqlx::query_as::<_, LandlordPaymentConfig>(
            r#"
            INSERT INTO landlord_payment_configs
                (landlord_id, short_code, short_code_type, consumer_key, consumer_secret,
                 environment, validation_enabled)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (landlord_id) DO UPDATE SET
                short_code = EXCLUDED.short_code,
                short_code_type = EXCLUDED.short_code_type,
                consumer_key = EXCLUDED.consumer_key,
                consumer_secret = EXCLUDED.consumer_secret,
                environment = EXCLUDED.environment,
                validation_enabled = EXCLUDED.validation_enabled,
                updated_at = NOW()
            RETURNING landlord_id, short_code, short_code_type, consumer_key, consumer_secret,
                      environment, validation_enabled, created_at, updated_at
            "#,
        )
        .bind(config.landlord_id)
        .bind(&config.short_code)
        .bind(config.short_code_type.as_str())
        .bind(&config.encrypted_key)
        .bind(&config.encrypted_secret)
        .bind(config.environment.as_str())
        .bind(config.validation_enabled)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            // landlord_id conflicts are absorbed by the upsert, so any
            // remaining unique violation is on short_code
            if matches!(&e, sqlx::Error::Database(db) if db.is_unique_violation()) {
                PaymentError::ShortCodeTaken(config.short_code.clone())
            } else {
                PaymentError::Persistence(e)
            }
        })?;

        Ok(saved)
    }

    async fn get_payment_config(&self, landlord_id: i64) -> Result<Option<LandlordPaymentConfig>> {
        let config = sqlx::query_as::<_, LandlordPaymentConfig>(
            r#"
            SELECT landlord_id, short_code, short_code_type, consumer_key, consumer_secret,
                   environment, validation_enabled, created_at, updated_at
            FROM landlord_payment_configs
            WHERE landlord_id = $1
            "#,
        )
        .bind(landlord_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(config)
    }
}
