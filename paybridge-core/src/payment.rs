use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::{CoreError, CoreResult};

// ============================================================================
// Currency
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Aud,
    Brl,
    Cad,
    Chf,
    Cny,
    Dkk,
    Eur,
    Gbp,
    Hkd,
    Inr,
    Jpy,
    Krw,
    Mxn,
    Nok,
    Nzd,
    Pln,
    Sek,
    Sgd,
    Usd,
    Zar,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Aud => "AUD",
            Currency::Brl => "BRL",
            Currency::Cad => "CAD",
            Currency::Chf => "CHF",
            Currency::Cny => "CNY",
            Currency::Dkk => "DKK",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Hkd => "HKD",
            Currency::Inr => "INR",
            Currency::Jpy => "JPY",
            Currency::Krw => "KRW",
            Currency::Mxn => "MXN",
            Currency::Nok => "NOK",
            Currency::Nzd => "NZD",
            Currency::Pln => "PLN",
            Currency::Sek => "SEK",
            Currency::Sgd => "SGD",
            Currency::Usd => "USD",
            Currency::Zar => "ZAR",
        }
    }

    /// Number of decimal places the currency allows.
    pub fn minor_units(&self) -> u32 {
        match self {
            Currency::Jpy | Currency::Krw => 0,
            _ => 2,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let currency = match s.trim().to_ascii_uppercase().as_str() {
            "AUD" => Currency::Aud,
            "BRL" => Currency::Brl,
            "CAD" => Currency::Cad,
            "CHF" => Currency::Chf,
            "CNY" => Currency::Cny,
            "DKK" => Currency::Dkk,
            "EUR" => Currency::Eur,
            "GBP" => Currency::Gbp,
            "HKD" => Currency::Hkd,
            "INR" => Currency::Inr,
            "JPY" => Currency::Jpy,
            "KRW" => Currency::Krw,
            "MXN" => Currency::Mxn,
            "NOK" => Currency::Nok,
            "NZD" => Currency::Nzd,
            "PLN" => Currency::Pln,
            "SEK" => Currency::Sek,
            "SGD" => Currency::Sgd,
            "USD" => Currency::Usd,
            "ZAR" => Currency::Zar,
            other => return Err(CoreError::UnknownCurrency(other.to_string())),
        };
        Ok(currency)
    }
}

// ============================================================================
// Operation Request
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Authorize,
    Capture,
    Charge,
    Void,
    Refund,
}

impl OperationKind {
    /// Void is the only kind that moves no explicit amount.
    pub fn requires_amount(&self) -> bool {
        !matches!(self, OperationKind::Void)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Authorize => "AUTHORIZE",
            OperationKind::Capture => "CAPTURE",
            OperationKind::Charge => "CHARGE",
            OperationKind::Void => "VOID",
            OperationKind::Refund => "REFUND",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single money-moving request. `operation_id` is the caller's idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationRequest {
    pub operation_id: String,
    pub account_id: Uuid,
    pub payment_id: Uuid,
    pub payment_method_id: Uuid,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<Currency>,
    pub kind: OperationKind,
}

impl OperationRequest {
    pub fn new(kind: OperationKind, operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            account_id: Uuid::new_v4(),
            payment_id: Uuid::new_v4(),
            payment_method_id: Uuid::new_v4(),
            amount: None,
            currency: None,
            kind,
        }
    }

    pub fn with_ids(mut self, account_id: Uuid, payment_id: Uuid, payment_method_id: Uuid) -> Self {
        self.account_id = account_id;
        self.payment_id = payment_id;
        self.payment_method_id = payment_method_id;
        self
    }

    pub fn with_amount(mut self, amount: Decimal, currency: Currency) -> Self {
        self.amount = Some(amount);
        self.currency = Some(currency);
        self
    }

    /// Local shape checks. Nothing here touches a gateway.
    pub fn validate(&self) -> CoreResult<()> {
        if self.operation_id.trim().is_empty() {
            return Err(CoreError::ValidationError("operation_id is required".to_string()));
        }
        if self.account_id.is_nil() {
            return Err(CoreError::ValidationError("account_id is required".to_string()));
        }
        if self.payment_id.is_nil() {
            return Err(CoreError::ValidationError("payment_id is required".to_string()));
        }
        if self.payment_method_id.is_nil() {
            return Err(CoreError::ValidationError("payment_method_id is required".to_string()));
        }

        if let Some(amount) = self.amount {
            if amount.is_sign_negative() && !amount.is_zero() {
                return Err(CoreError::ValidationError(format!(
                    "amount must be non-negative, got {}",
                    amount
                )));
            }
        }

        if self.kind.requires_amount() {
            let amount = self.amount.ok_or_else(|| {
                CoreError::ValidationError(format!("amount is required for {}", self.kind))
            })?;
            let currency = self.currency.ok_or_else(|| {
                CoreError::ValidationError(format!("currency is required for {}", self.kind))
            })?;
            if amount.normalize().scale() > currency.minor_units() {
                return Err(CoreError::ValidationError(format!(
                    "{} allows {} decimal places, got {}",
                    currency,
                    currency.minor_units(),
                    amount
                )));
            }
        }

        Ok(())
    }

    /// SHA-256 over everything except the operation id. Two requests that share an
    /// operation id must share a fingerprint. Persisted by the ledger, so the canonical
    /// form must not change.
    pub fn fingerprint(&self) -> String {
        let canonical = format!(
            "{}|{}|{}|{}|{}|{}",
            self.kind.as_str(),
            self.account_id,
            self.payment_id,
            self.payment_method_id,
            self.amount
                .map(|a| a.normalize().to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.currency.map(|c| c.code()).unwrap_or("-"),
        );

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

// ============================================================================
// Result Envelope
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Success,
    Pending,
    Failed,
    /// Retries ran out without a definitive answer. Money may or may not have moved.
    Undetermined,
}

impl OperationStatus {
    pub fn is_definitive(&self) -> bool {
        !matches!(self, OperationStatus::Undetermined)
    }
}

/// Gateway response normalized independently of the adapter that produced it.
/// Used for both payment and refund information.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultEnvelope {
    pub kind: OperationKind,
    pub gateway_reference_id: Option<String>,
    pub status: OperationStatus,
    pub amount_processed: Decimal,
    pub currency: Option<Currency>,
    pub gateway_error_code: Option<String>,
    pub gateway_error: Option<String>,
    #[serde(default)]
    pub raw_gateway_payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ResultEnvelope {
    pub fn new(kind: OperationKind, status: OperationStatus, amount_processed: Decimal) -> Self {
        Self {
            kind,
            gateway_reference_id: None,
            status,
            amount_processed,
            currency: None,
            gateway_error_code: None,
            gateway_error: None,
            raw_gateway_payload: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn success(
        kind: OperationKind,
        gateway_reference_id: impl Into<String>,
        amount_processed: Decimal,
        currency: Option<Currency>,
    ) -> Self {
        Self {
            gateway_reference_id: Some(gateway_reference_id.into()),
            currency,
            ..Self::new(kind, OperationStatus::Success, amount_processed)
        }
    }

    /// Placeholder recorded when the gateway's real state could not be learned.
    pub fn undetermined(request: &OperationRequest, reason: impl Into<String>) -> Self {
        Self {
            currency: request.currency,
            gateway_error: Some(reason.into()),
            ..Self::new(request.kind, OperationStatus::Undetermined, Decimal::ZERO)
        }
    }

    pub fn with_status(mut self, status: OperationStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_gateway_error(mut self, code: Option<String>, message: impl Into<String>) -> Self {
        self.gateway_error_code = code;
        self.gateway_error = Some(message.into());
        self
    }

    pub fn with_raw_payload(mut self, payload: serde_json::Value) -> Self {
        self.raw_gateway_payload = payload;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authorize(amount: Decimal) -> OperationRequest {
        OperationRequest::new(OperationKind::Authorize, "op-1").with_amount(amount, Currency::Usd)
    }

    #[test]
    fn test_currency_parse_and_display() {
        assert_eq!("usd".parse::<Currency>().unwrap(), Currency::Usd);
        assert_eq!(Currency::Jpy.to_string(), "JPY");
        assert!(matches!("XYZ".parse::<Currency>(), Err(CoreError::UnknownCurrency(_))));
    }

    #[test]
    fn test_negative_amount_rejected() {
        let request = authorize(Decimal::new(-1, 0));
        assert!(matches!(request.validate(), Err(CoreError::ValidationError(_))));
    }

    #[test]
    fn test_zero_amount_allowed() {
        assert!(authorize(Decimal::ZERO).validate().is_ok());
    }

    #[test]
    fn test_amount_required_except_void() {
        let capture = OperationRequest::new(OperationKind::Capture, "op-2");
        assert!(capture.validate().is_err());

        let void = OperationRequest::new(OperationKind::Void, "op-3");
        assert!(void.validate().is_ok());
    }

    #[test]
    fn test_currency_precision_enforced() {
        let request = OperationRequest::new(OperationKind::Charge, "op-4")
            .with_amount(Decimal::new(1005, 1), Currency::Jpy);
        assert!(request.validate().is_err());

        let request = OperationRequest::new(OperationKind::Charge, "op-5")
            .with_amount(Decimal::new(10050, 2), Currency::Usd);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_missing_ids_rejected() {
        let mut request = authorize(Decimal::from(10));
        request.payment_id = Uuid::nil();
        assert!(request.validate().is_err());

        let mut request = authorize(Decimal::from(10));
        request.operation_id = "  ".to_string();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_fingerprint_ignores_operation_id_and_scale() {
        let a = authorize(Decimal::from(100));
        let mut b = a.clone();
        b.operation_id = "op-other".to_string();
        b.amount = Some(Decimal::new(10000, 2));
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut c = a.clone();
        c.amount = Some(Decimal::from(101));
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_fingerprint_digest_is_pinned() {
        // Stored fingerprints are compared across releases
        let request = OperationRequest::new(OperationKind::Authorize, "op-pinned")
            .with_ids(Uuid::from_u128(1), Uuid::from_u128(2), Uuid::from_u128(3))
            .with_amount(Decimal::new(10050, 2), Currency::Usd);
        assert_eq!(
            request.fingerprint(),
            "84786736e126d8f2c614dcdaaf3310953e264353bbeda912cff1f67b32e067b0"
        );
    }

    #[test]
    fn test_request_deserialization() {
        let json = r#"
            {
                "operation_id": "op-9",
                "account_id": "7f1c0a52-3c43-4a59-8f39-4c6b2d9c1a01",
                "payment_id": "7f1c0a52-3c43-4a59-8f39-4c6b2d9c1a02",
                "payment_method_id": "7f1c0a52-3c43-4a59-8f39-4c6b2d9c1a03",
                "amount": "49.99",
                "currency": "EUR",
                "kind": "REFUND"
            }
        "#;
        let request: OperationRequest = serde_json::from_str(json).expect("Failed to deserialize");
        assert_eq!(request.kind, OperationKind::Refund);
        assert_eq!(request.amount, Some(Decimal::new(4999, 2)));
        assert_eq!(request.currency, Some(Currency::Eur));
    }
}
