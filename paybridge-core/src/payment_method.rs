use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Gateway-specific properties supplied when a payment method is added.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentMethodProps {
    pub external_payment_method_id: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Adapter view of a single payment method.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentMethodDetail {
    pub payment_method_id: Uuid,
    pub external_payment_method_id: Option<String>,
    pub is_default: bool,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Summary row used when listing or resetting an account's payment methods.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentMethodInfo {
    pub account_id: Uuid,
    pub payment_method_id: Uuid,
    pub external_payment_method_id: Option<String>,
    pub is_default: bool,
}

/// Orchestration-owned record of a payment method and the plugin it is bound to.
/// Mirrored from adapter-reported state on refresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentMethodDescriptor {
    pub account_id: Uuid,
    pub payment_method_id: Uuid,
    pub plugin_name: String,
    pub external_payment_method_id: Option<String>,
    pub is_default: bool,
    pub is_active: bool,
    #[serde(default)]
    pub gateway_props: BTreeMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentMethodDescriptor {
    pub fn new(account_id: Uuid, payment_method_id: Uuid, plugin_name: impl Into<String>) -> Self {
        Self {
            account_id,
            payment_method_id,
            plugin_name: plugin_name.into(),
            external_payment_method_id: None,
            is_default: false,
            is_active: true,
            gateway_props: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn to_info(&self) -> PaymentMethodInfo {
        PaymentMethodInfo {
            account_id: self.account_id,
            payment_method_id: self.payment_method_id,
            external_payment_method_id: self.external_payment_method_id.clone(),
            is_default: self.is_default,
        }
    }
}
