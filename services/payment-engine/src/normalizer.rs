//! Payment Normalizer
//!
//! Turns the two confirmation shapes the gateway sends into one
//! [`PaymentEvent`]. Amounts are parsed from their textual form straight into
//! `Decimal`; nothing untyped leaves this module.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

use crate::errors::{PaymentError, Result};
use crate::models::{Channel, PaymentEvent, Provider};

/// Legacy confirmation body: `TransAmount` arrives as a JSON number.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConfirmationPayload {
    #[serde(rename = "TransID")]
    pub trans_id: String,
    #[serde(default)]
    pub trans_time: Option<String>,
    pub trans_amount: serde_json::Number,
    pub business_short_code: String,
    #[serde(default)]
    pub bill_ref_number: Option<String>,
    #[serde(rename = "MSISDN", default)]
    pub msisdn: String,
}

/// C2B v2 confirmation body: string `TransAmount` plus payer details.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct C2bConfirmationPayload {
    #[serde(default)]
    pub transaction_type: Option<String>,
    #[serde(rename = "TransID")]
    pub trans_id: String,
    #[serde(default)]
    pub trans_time: Option<String>,
    pub trans_amount: String,
    pub business_short_code: String,
    #[serde(default)]
    pub bill_ref_number: Option<String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub org_account_balance: Option<String>,
    #[serde(rename = "ThirdPartyTransID", default)]
    pub third_party_trans_id: Option<String>,
    #[serde(rename = "MSISDN", default)]
    pub msisdn: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub middle_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InboundConfirmation {
    C2b(C2bConfirmationPayload),
    Legacy(ConfirmationPayload),
}

/// Fields shared by both shapes once the amount has been rendered as text.
struct RawEvent {
    receipt: String,
    trans_time: Option<String>,
    amount_text: String,
    business_id: String,
    bill_ref: Option<String>,
    msisdn: String,
    payer_name: Option<String>,
}

impl From<ConfirmationPayload> for RawEvent {
    fn from(p: ConfirmationPayload) -> Self {
        Self {
            receipt: p.trans_id,
            trans_time: p.trans_time,
            amount_text: p.trans_amount.to_string(),
            business_id: p.business_short_code,
            bill_ref: p.bill_ref_number,
            msisdn: p.msisdn,
            payer_name: None,
        }
    }
}

impl From<C2bConfirmationPayload> for RawEvent {
    fn from(p: C2bConfirmationPayload) -> Self {
        let payer_name = [&p.first_name, &p.middle_name, &p.last_name]
            .iter()
            .filter_map(|part| part.as_deref())
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            receipt: p.trans_id,
            trans_time: p.trans_time,
            amount_text: p.trans_amount,
            business_id: p.business_short_code,
            bill_ref: p.bill_ref_number,
            msisdn: p.msisdn,
            payer_name: (!payer_name.is_empty()).then_some(payer_name),
        }
    }
}

/// Parse a raw confirmation body into a canonical event.
pub fn normalize_confirmation(body: &[u8]) -> Result<PaymentEvent> {
    let inbound: InboundConfirmation = serde_json::from_slice(body)
        .map_err(|e| PaymentError::Validation(format!("unrecognised confirmation payload: {}", e)))?;

    let raw = match inbound {
        InboundConfirmation::C2b(p) => RawEvent::from(p),
        InboundConfirmation::Legacy(p) => RawEvent::from(p),
    };

    build_event(raw)
}

fn build_event(raw: RawEvent) -> Result<PaymentEvent> {
    let receipt = raw.receipt.trim().to_string();
    if receipt.is_empty() {
        return Err(PaymentError::Validation("TransID is required".to_string()));
    }

    let business_id = raw.business_id.trim().to_string();
    if business_id.is_empty() {
        return Err(PaymentError::Validation(
            "BusinessShortCode is required".to_string(),
        ));
    }

    let amount = parse_amount(&raw.amount_text)?;

    let account_ref = raw
        .bill_ref
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());
    let channel = if account_ref.is_some() {
        Channel::Paybill
    } else {
        Channel::Till
    };

    Ok(PaymentEvent {
        provider: Provider::Mpesa,
        channel,
        business_id,
        account_ref,
        phone: normalize_phone(&raw.msisdn),
        amount,
        receipt,
        trans_time: raw.trans_time.filter(|t| !t.trim().is_empty()),
        payer_name: raw.payer_name,
    })
}

/// Parse a positive amount with at most two decimal places.
pub fn parse_amount(text: &str) -> Result<Decimal> {
    let amount = Decimal::from_str(text.trim())
        .map_err(|e| PaymentError::Validation(format!("invalid amount '{}': {}", text, e)))?;

    validate_amount(amount)
}

/// Reject non-positive amounts and sub-cent precision.
pub fn validate_amount(amount: Decimal) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(PaymentError::Validation(format!(
            "amount must be positive, got {}",
            amount
        )));
    }

    if amount.normalize().scale() > 2 {
        return Err(PaymentError::Validation(format!(
            "amount {} has more than two decimal places",
            amount
        )));
    }

    Ok(amount)
}

/// Canonicalise a Kenyan MSISDN to the `254…` form.
///
/// Only digits and `+` survive; a leading `+` is dropped and a local `07…` or
/// `01…` number gets the country code. Anything else is returned as cleaned.
pub fn normalize_phone(phone: &str) -> String {
    let cleaned: String = phone
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();

    // Only the Kenyan international prefix loses its plus
    if let Some(national) = cleaned.strip_prefix("+254") {
        format!("254{}", national)
    } else if cleaned.starts_with("07") || cleaned.starts_with("01") {
        format!("254{}", &cleaned[1..])
    } else {
        cleaned
    }
}
