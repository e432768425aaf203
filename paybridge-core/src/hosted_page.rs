use paybridge_shared::pii::Masked;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::payment::{Currency, OperationStatus};

// ============================================================================
// Descriptor Fields
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Customer {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<Masked<String>>,
    pub phone: Option<Masked<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BillingAddress {
    pub city: Option<String>,
    pub address1: Option<String>,
    pub address2: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub country: Option<String>,
}

/// Everything an adapter needs to build a redirect form to a gateway-hosted payment
/// page. Built once through [`HostedPageDescriptorFieldsBuilder`] and read-only after.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostedPageDescriptorFields {
    amount: Option<Decimal>,
    currency: Option<Currency>,
    order: Option<String>,
    credential2: Option<Masked<String>>,
    credential3: Option<Masked<String>>,
    credential4: Option<Masked<String>>,
    transaction_type: Option<String>,
    auth_code: Option<String>,
    account_name: Option<String>,
    customer: Option<Customer>,
    billing_address: Option<BillingAddress>,
    notify_url: Option<String>,
    return_url: Option<String>,
    forward_url: Option<String>,
    cancel_return_url: Option<String>,
    redirect_param: Option<String>,
    description: Option<String>,
    tax: Option<Decimal>,
    shipping: Option<Decimal>,
    #[serde(default)]
    custom_fields: BTreeMap<String, String>,
}

impl HostedPageDescriptorFields {
    pub fn builder() -> HostedPageDescriptorFieldsBuilder {
        HostedPageDescriptorFieldsBuilder::default()
    }

    pub fn amount(&self) -> Option<Decimal> {
        self.amount
    }

    pub fn currency(&self) -> Option<Currency> {
        self.currency
    }

    pub fn order(&self) -> Option<&str> {
        self.order.as_deref()
    }

    pub fn credential2(&self) -> Option<&Masked<String>> {
        self.credential2.as_ref()
    }

    pub fn credential3(&self) -> Option<&Masked<String>> {
        self.credential3.as_ref()
    }

    pub fn credential4(&self) -> Option<&Masked<String>> {
        self.credential4.as_ref()
    }

    pub fn transaction_type(&self) -> Option<&str> {
        self.transaction_type.as_deref()
    }

    pub fn auth_code(&self) -> Option<&str> {
        self.auth_code.as_deref()
    }

    pub fn account_name(&self) -> Option<&str> {
        self.account_name.as_deref()
    }

    pub fn customer(&self) -> Option<&Customer> {
        self.customer.as_ref()
    }

    pub fn billing_address(&self) -> Option<&BillingAddress> {
        self.billing_address.as_ref()
    }

    pub fn notify_url(&self) -> Option<&str> {
        self.notify_url.as_deref()
    }

    pub fn return_url(&self) -> Option<&str> {
        self.return_url.as_deref()
    }

    pub fn forward_url(&self) -> Option<&str> {
        self.forward_url.as_deref()
    }

    pub fn cancel_return_url(&self) -> Option<&str> {
        self.cancel_return_url.as_deref()
    }

    pub fn redirect_param(&self) -> Option<&str> {
        self.redirect_param.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn tax(&self) -> Option<Decimal> {
        self.tax
    }

    pub fn shipping(&self) -> Option<Decimal> {
        self.shipping
    }

    pub fn custom_fields(&self) -> &BTreeMap<String, String> {
        &self.custom_fields
    }

    /// Flatten the populated fields into form inputs. Custom fields come last and never
    /// override a standard field.
    pub fn to_form_fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                fields.insert(key.to_string(), value);
            }
        };

        put("amount", self.amount.map(|a| a.to_string()));
        put("currency", self.currency.map(|c| c.to_string()));
        put("order", self.order.clone());
        put("credential2", self.credential2.as_ref().map(|c| c.expose().clone()));
        put("credential3", self.credential3.as_ref().map(|c| c.expose().clone()));
        put("credential4", self.credential4.as_ref().map(|c| c.expose().clone()));
        put("transaction_type", self.transaction_type.clone());
        put("auth_code", self.auth_code.clone());
        put("account_name", self.account_name.clone());
        if let Some(customer) = &self.customer {
            put("first_name", customer.first_name.clone());
            put("last_name", customer.last_name.clone());
            put("email", customer.email.as_ref().map(|e| e.expose().clone()));
            put("phone", customer.phone.as_ref().map(|p| p.expose().clone()));
        }
        if let Some(address) = &self.billing_address {
            put("city", address.city.clone());
            put("address1", address.address1.clone());
            put("address2", address.address2.clone());
            put("state", address.state.clone());
            put("zip", address.zip.clone());
            put("country", address.country.clone());
        }
        put("notify_url", self.notify_url.clone());
        put("return_url", self.return_url.clone());
        put("forward_url", self.forward_url.clone());
        put("cancel_return_url", self.cancel_return_url.clone());
        put("redirect_param", self.redirect_param.clone());
        put("description", self.description.clone());
        put("tax", self.tax.map(|t| t.to_string()));
        put("shipping", self.shipping.map(|s| s.to_string()));

        for (key, value) in &self.custom_fields {
            fields.entry(key.clone()).or_insert_with(|| value.clone());
        }
        fields
    }
}

#[derive(Debug, Default)]
pub struct HostedPageDescriptorFieldsBuilder {
    fields: HostedPageDescriptorFields,
}

impl HostedPageDescriptorFieldsBuilder {
    pub fn amount(mut self, amount: Decimal, currency: Currency) -> Self {
        self.fields.amount = Some(amount);
        self.fields.currency = Some(currency);
        self
    }

    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.fields.order = Some(order.into());
        self
    }

    pub fn credentials(
        mut self,
        credential2: Option<String>,
        credential3: Option<String>,
        credential4: Option<String>,
    ) -> Self {
        self.fields.credential2 = credential2.map(Masked::new);
        self.fields.credential3 = credential3.map(Masked::new);
        self.fields.credential4 = credential4.map(Masked::new);
        self
    }

    pub fn transaction_type(mut self, transaction_type: impl Into<String>) -> Self {
        self.fields.transaction_type = Some(transaction_type.into());
        self
    }

    pub fn auth_code(mut self, auth_code: impl Into<String>) -> Self {
        self.fields.auth_code = Some(auth_code.into());
        self
    }

    pub fn account_name(mut self, account_name: impl Into<String>) -> Self {
        self.fields.account_name = Some(account_name.into());
        self
    }

    pub fn customer(mut self, customer: Customer) -> Self {
        self.fields.customer = Some(customer);
        self
    }

    pub fn billing_address(mut self, address: BillingAddress) -> Self {
        self.fields.billing_address = Some(address);
        self
    }

    pub fn urls(
        mut self,
        notify_url: Option<String>,
        return_url: Option<String>,
        forward_url: Option<String>,
        cancel_return_url: Option<String>,
    ) -> Self {
        self.fields.notify_url = notify_url;
        self.fields.return_url = return_url;
        self.fields.forward_url = forward_url;
        self.fields.cancel_return_url = cancel_return_url;
        self
    }

    pub fn redirect_param(mut self, redirect_param: impl Into<String>) -> Self {
        self.fields.redirect_param = Some(redirect_param.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.fields.description = Some(description.into());
        self
    }

    pub fn tax(mut self, tax: Decimal) -> Self {
        self.fields.tax = Some(tax);
        self
    }

    pub fn shipping(mut self, shipping: Decimal) -> Self {
        self.fields.shipping = Some(shipping);
        self
    }

    pub fn custom_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.custom_fields.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> HostedPageDescriptorFields {
        self.fields
    }
}

// ============================================================================
// Adapter Outputs
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum FormMethod {
    Get,
    Post,
}

/// Redirect form produced by an adapter. Rendering it is the caller's concern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostedPageFormDescriptor {
    pub account_id: Uuid,
    pub form_method: FormMethod,
    pub form_url: String,
    pub form_fields: BTreeMap<String, String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Gateway callback after the adapter has parsed (and acknowledged) it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedNotification {
    pub gateway_reference_id: Option<String>,
    pub payment_id: Option<Uuid>,
    pub status: OperationStatus,
    /// Body the gateway expects echoed back, if any
    pub acknowledgement: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}
