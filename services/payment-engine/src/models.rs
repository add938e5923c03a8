use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use validator::{Validate, ValidationError};

use crate::errors::PaymentError;

/// Payment status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

/// How the money arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    MpesaTill,
    MpesaPaybill,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::MpesaTill => "MPESA_TILL",
            PaymentMethod::MpesaPaybill => "MPESA_PAYBILL",
        }
    }
}

/// Issuer of the receipt; (provider, receipt) is the idempotency key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provider {
    Mpesa,
    Cash,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Mpesa => "MPESA",
            Provider::Cash => "CASH",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// C2B collection channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Till,
    Paybill,
}

impl Channel {
    pub fn method(&self) -> PaymentMethod {
        match self {
            Channel::Till => PaymentMethod::MpesaTill,
            Channel::Paybill => PaymentMethod::MpesaPaybill,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShortCodeType {
    Paybill,
    Till,
}

impl ShortCodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShortCodeType::Paybill => "paybill",
            ShortCodeType::Till => "till",
        }
    }
}

impl FromStr for ShortCodeType {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paybill" => Ok(ShortCodeType::Paybill),
            "till" => Ok(ShortCodeType::Till),
            other => Err(PaymentError::Validation(format!(
                "short_code_type must be 'paybill' or 'till', got '{}'",
                other
            ))),
        }
    }
}

/// Gateway environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayEnvironment {
    Sandbox,
    Production,
}

impl GatewayEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayEnvironment::Sandbox => "sandbox",
            GatewayEnvironment::Production => "production",
        }
    }
}

impl FromStr for GatewayEnvironment {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sandbox" => Ok(GatewayEnvironment::Sandbox),
            "production" => Ok(GatewayEnvironment::Production),
            other => Err(PaymentError::Validation(format!(
                "environment must be 'sandbox' or 'production', got '{}'",
                other
            ))),
        }
    }
}

/// Canonical payment notification produced by the normalizer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentEvent {
    pub provider: Provider,
    pub channel: Channel,
    pub business_id: String,
    pub account_ref: Option<String>,
    pub phone: String,
    pub amount: Decimal,
    pub receipt: String,
    pub trans_time: Option<String>,
    pub payer_name: Option<String>,
}

impl PaymentEvent {
    pub fn route(&self) -> LandlordRoute {
        match (&self.channel, &self.account_ref) {
            (Channel::Paybill, Some(account)) => LandlordRoute::Paybill {
                paybill: self.business_id.clone(),
                account_number: account.clone(),
            },
            _ => LandlordRoute::Till {
                till_number: self.business_id.clone(),
            },
        }
    }
}

/// Lookup key for the landlord that owns an incoming payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LandlordRoute {
    Till { till_number: String },
    Paybill { paybill: String, account_number: String },
}

impl LandlordRoute {
    pub fn short_code(&self) -> &str {
        match self {
            LandlordRoute::Till { till_number } => till_number,
            LandlordRoute::Paybill { paybill, .. } => paybill,
        }
    }
}

/// Payment ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: i64,
    pub landlord_id: i64,
    pub tenant_id: Option<i64>,
    pub amount: Decimal,
    pub status: String,
    pub method: String,
    pub provider: String,
    pub receipt: String,
    pub phone: Option<String>,
    pub account_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ledger row joined with the tenant's name for listings
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentRecord {
    pub id: i64,
    pub landlord_id: i64,
    pub tenant_id: Option<i64>,
    pub tenant_name: Option<String>,
    pub amount: Decimal,
    pub status: String,
    pub method: String,
    pub provider: String,
    pub receipt: String,
    pub phone: Option<String>,
    pub account_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Values for a ledger insert
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub landlord_id: i64,
    pub tenant_id: Option<i64>,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub method: PaymentMethod,
    pub provider: Provider,
    pub receipt: String,
    pub phone: Option<String>,
    pub account_ref: Option<String>,
}

/// Result of an atomic insert-and-debit
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(Payment),
    DuplicateReceipt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: i64,
    pub landlord_id: i64,
    pub unit_id: i64,
    pub tenant_name: String,
    pub payment_no1: String,
    pub payment_no2: String,
    pub rent: Decimal,
    pub balance: Decimal,
}

/// Stored gateway configuration; key and secret are vault blobs
#[derive(Debug, Clone, FromRow)]
pub struct LandlordPaymentConfig {
    pub landlord_id: i64,
    pub short_code: String,
    pub short_code_type: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub environment: String,
    pub validation_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values for a config upsert, credentials already encrypted
#[derive(Debug, Clone)]
pub struct PaymentConfigUpsert {
    pub landlord_id: i64,
    pub short_code: String,
    pub short_code_type: ShortCodeType,
    pub encrypted_key: String,
    pub encrypted_secret: String,
    pub environment: GatewayEnvironment,
    pub validation_enabled: bool,
}

/// Config as returned to the landlord; never carries credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfigView {
    pub landlord_id: i64,
    pub short_code: String,
    pub short_code_type: String,
    pub environment: String,
    pub validation_enabled: bool,
    pub credentials_configured: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<&LandlordPaymentConfig> for PaymentConfigView {
    fn from(config: &LandlordPaymentConfig) -> Self {
        Self {
            landlord_id: config.landlord_id,
            short_code: config.short_code.clone(),
            short_code_type: config.short_code_type.clone(),
            environment: config.environment.clone(),
            validation_enabled: config.validation_enabled,
            credentials_configured: !config.consumer_key.is_empty()
                && !config.consumer_secret.is_empty(),
            updated_at: config.updated_at,
        }
    }
}

fn validate_digits(value: &str) -> Result<(), ValidationError> {
    if value.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::new("short_code_digits"))
    }
}

fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::new("blank"))
    } else {
        Ok(())
    }
}

/// Landlord request to store gateway credentials
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct SavePaymentConfigRequest {
    #[validate(length(min = 5, max = 7), custom = "validate_digits")]
    pub short_code: String,
    pub short_code_type: String,
    #[validate(custom = "validate_not_blank")]
    pub consumer_key: String,
    #[validate(custom = "validate_not_blank")]
    pub consumer_secret: String,
    pub environment: String,
    #[serde(default)]
    pub validation_enabled: bool,
}

/// Landlord request to record a cash payment
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CashPaymentRequest {
    pub tenant_id: i64,
    pub amount: Decimal,
    #[serde(default)]
    pub receipt: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssignPaymentRequest {
    pub tenant_id: i64,
}

/// Paging for ledger listings
#[derive(Debug, Clone, Deserialize)]
pub struct ListPaymentsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

impl Default for ListPaymentsQuery {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            offset: 0,
        }
    }
}

impl ListPaymentsQuery {
    pub const MAX_LIMIT: i64 = 500;

    pub fn clamped(&self) -> (i64, i64) {
        (self.limit.clamp(1, Self::MAX_LIMIT), self.offset.max(0))
    }
}

/// Synchronous reply the gateway expects on every callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
    #[serde(rename = "ResultCode")]
    pub result_code: i32,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
}

impl Acknowledgement {
    pub fn success() -> Self {
        Self::with_desc("Success")
    }

    pub fn received() -> Self {
        Self::with_desc("Received")
    }

    pub fn accepted() -> Self {
        Self::with_desc("Accepted")
    }

    fn with_desc(desc: &str) -> Self {
        Self {
            result_code: 0,
            result_desc: desc.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn event(channel: Channel, account_ref: Option<&str>) -> PaymentEvent {
        PaymentEvent {
            provider: Provider::Mpesa,
            channel,
            business_id: "600100".to_string(),
            account_ref: account_ref.map(str::to_string),
            phone: "254712345678".to_string(),
            amount: dec!(100),
            receipt: "R1".to_string(),
            trans_time: None,
            payer_name: None,
        }
    }

    #[test]
    fn test_route_follows_channel() {
        assert_eq!(
            event(Channel::Till, None).route(),
            LandlordRoute::Till { till_number: "600100".into() }
        );
        assert_eq!(
            event(Channel::Paybill, Some("A1")).route(),
            LandlordRoute::Paybill {
                paybill: "600100".into(),
                account_number: "A1".into()
            }
        );
    }

    #[test]
    fn test_save_config_request_validation() {
        let mut request = SavePaymentConfigRequest {
            short_code: "600100".into(),
            short_code_type: "paybill".into(),
            consumer_key: "key".into(),
            consumer_secret: "secret".into(),
            environment: "sandbox".into(),
            validation_enabled: false,
        };
        assert!(request.validate().is_ok());

        request.short_code = "60A100".into();
        assert!(request.validate().is_err());

        request.short_code = "1234".into();
        assert!(request.validate().is_err());

        request.short_code = "600100".into();
        request.consumer_secret = "   ".into();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_acknowledgement_wire_shape() {
        let body = serde_json::to_value(Acknowledgement::success()).unwrap();
        assert_eq!(body, serde_json::json!({"ResultCode": 0, "ResultDesc": "Success"}));
    }

    #[test]
    fn test_list_query_clamped() {
        let query = ListPaymentsQuery { limit: 10_000, offset: -3 };
        assert_eq!(query.clamped(), (500, 0));
    }
}
