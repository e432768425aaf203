//! In-process gateway simulation.
//!
//! Keeps payments, refunds and payment methods in memory and enforces the usual
//! money rules (no capture past the authorization, no refund past the capture).
//! Amounts whose cents are `.51` are declined and `.91` fail with a transport
//! timeout, so both paths can be driven end to end.

use async_trait::async_trait;
use paybridge_core::{
    AdapterResult, CallContext, Currency, FormMethod, GatewayError, HostedPageDescriptorFields,
    HostedPageFormDescriptor, NormalizedNotification, OperationKind, OperationRequest,
    OperationStatus, Outcome, PaymentAdapter, PaymentMethodDetail, PaymentMethodInfo,
    PaymentMethodProps, ResultEnvelope, SearchPage,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

const DECLINE_CENTS: i64 = 51;
const TIMEOUT_CENTS: i64 = 91;

struct SandboxPayment {
    account_id: Uuid,
    reference: String,
    currency: Option<Currency>,
    authorized: Decimal,
    captured: Decimal,
    refunded: Decimal,
    voided: bool,
    last: ResultEnvelope,
}

struct SandboxRefund {
    account_id: Uuid,
    payment_id: Uuid,
    envelope: ResultEnvelope,
}

struct SandboxMethod {
    account_id: Uuid,
    detail: PaymentMethodDetail,
}

#[derive(Default)]
struct SandboxState {
    sequence: u64,
    payments: BTreeMap<Uuid, SandboxPayment>,
    refunds: Vec<SandboxRefund>,
    methods: BTreeMap<Uuid, SandboxMethod>,
}

impl SandboxState {
    fn next_reference(&mut self, prefix: &str) -> String {
        self.sequence += 1;
        format!("{}_{:06}", prefix, self.sequence)
    }
}

#[derive(Deserialize)]
struct SandboxNotification {
    reference: String,
    status: OperationStatus,
    #[serde(default)]
    payment_id: Option<Uuid>,
}

pub struct SandboxAdapter {
    name: String,
    state: Mutex<SandboxState>,
}

impl SandboxAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(SandboxState::default()),
        }
    }
}

fn cents(amount: Decimal) -> i64 {
    (amount.fract() * Decimal::ONE_HUNDRED).round().to_i64().unwrap_or(0)
}

fn scripted_failure(request: &OperationRequest) -> Result<(), GatewayError> {
    match request.amount.map(cents) {
        Some(DECLINE_CENTS) => Err(GatewayError::declined(Some("51"), "insufficient funds")),
        Some(TIMEOUT_CENTS) => Err(GatewayError::timeout("sandbox gateway did not answer")),
        _ => Ok(()),
    }
}

fn requested_amount(request: &OperationRequest) -> Decimal {
    request.amount.unwrap_or(Decimal::ZERO)
}

fn envelope(kind: OperationKind, reference: &str, amount: Decimal, currency: Option<Currency>) -> ResultEnvelope {
    ResultEnvelope::success(kind, reference, amount, currency).with_raw_payload(json!({
        "sandbox": true,
        "reference": reference,
        "kind": kind.as_str(),
        "amount": amount.to_string(),
    }))
}

fn matches_key(search_key: &str, candidates: &[String]) -> bool {
    let key = search_key.trim();
    key.is_empty() || key == "*" || candidates.iter().any(|c| c == key)
}

#[async_trait]
impl PaymentAdapter for SandboxAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn authorize(&self, request: &OperationRequest, _ctx: &CallContext) -> AdapterResult<ResultEnvelope> {
        scripted_failure(request)?;
        let mut state = self.state.lock().await;
        if state.payments.contains_key(&request.payment_id) {
            return Err(GatewayError::Invalid(format!("payment {} already exists", request.payment_id)));
        }

        let amount = requested_amount(request);
        let reference = state.next_reference("auth");
        let result = envelope(request.kind, &reference, amount, request.currency);
        state.payments.insert(
            request.payment_id,
            SandboxPayment {
                account_id: request.account_id,
                reference,
                currency: request.currency,
                authorized: amount,
                captured: Decimal::ZERO,
                refunded: Decimal::ZERO,
                voided: false,
                last: result.clone(),
            },
        );
        debug!(payment_id = %request.payment_id, %amount, "Sandbox authorization");
        Ok(Outcome::Done(result))
    }

    async fn capture(&self, request: &OperationRequest, _ctx: &CallContext) -> AdapterResult<ResultEnvelope> {
        scripted_failure(request)?;
        let mut state = self.state.lock().await;
        let payment = state
            .payments
            .get_mut(&request.payment_id)
            .ok_or_else(|| GatewayError::Invalid(format!("unknown payment {}", request.payment_id)))?;

        if payment.voided {
            return Err(GatewayError::declined(Some("VOIDED"), "payment was voided"));
        }
        let amount = requested_amount(request);
        if payment.captured + amount > payment.authorized {
            return Err(GatewayError::declined(Some("EXCEEDS_AUTH"), "amount exceeds authorization"));
        }

        payment.captured += amount;
        payment.last = envelope(request.kind, &payment.reference, amount, payment.currency);
        Ok(Outcome::Done(payment.last.clone()))
    }

    async fn charge(&self, request: &OperationRequest, _ctx: &CallContext) -> AdapterResult<ResultEnvelope> {
        scripted_failure(request)?;
        let mut state = self.state.lock().await;
        if state.payments.contains_key(&request.payment_id) {
            return Err(GatewayError::Invalid(format!("payment {} already exists", request.payment_id)));
        }

        let amount = requested_amount(request);
        let reference = state.next_reference("chg");
        let result = envelope(request.kind, &reference, amount, request.currency);
        state.payments.insert(
            request.payment_id,
            SandboxPayment {
                account_id: request.account_id,
                reference,
                currency: request.currency,
                authorized: amount,
                captured: amount,
                refunded: Decimal::ZERO,
                voided: false,
                last: result.clone(),
            },
        );
        Ok(Outcome::Done(result))
    }

    async fn void(&self, request: &OperationRequest, _ctx: &CallContext) -> AdapterResult<ResultEnvelope> {
        let mut state = self.state.lock().await;
        let payment = state
            .payments
            .get_mut(&request.payment_id)
            .ok_or_else(|| GatewayError::Invalid(format!("unknown payment {}", request.payment_id)))?;

        if payment.voided {
            return Err(GatewayError::declined(Some("VOIDED"), "payment was already voided"));
        }
        if !payment.captured.is_zero() {
            return Err(GatewayError::declined(Some("CAPTURED"), "captured payments must be refunded"));
        }

        payment.voided = true;
        payment.last = envelope(request.kind, &payment.reference, Decimal::ZERO, payment.currency);
        Ok(Outcome::Done(payment.last.clone()))
    }

    async fn refund(&self, request: &OperationRequest, _ctx: &CallContext) -> AdapterResult<ResultEnvelope> {
        scripted_failure(request)?;
        let mut state = self.state.lock().await;
        let amount = requested_amount(request);

        let (currency, refundable) = {
            let payment = state
                .payments
                .get(&request.payment_id)
                .ok_or_else(|| GatewayError::Invalid(format!("unknown payment {}", request.payment_id)))?;
            (payment.currency, payment.captured - payment.refunded)
        };
        if amount > refundable {
            return Err(GatewayError::declined(Some("EXCEEDS_CAPTURE"), "amount exceeds refundable balance"));
        }

        let reference = state.next_reference("rfd");
        let result = envelope(request.kind, &reference, amount, currency);
        if let Some(payment) = state.payments.get_mut(&request.payment_id) {
            payment.refunded += amount;
            payment.last = result.clone();
        }
        state.refunds.push(SandboxRefund {
            account_id: request.account_id,
            payment_id: request.payment_id,
            envelope: result.clone(),
        });
        Ok(Outcome::Done(result))
    }

    async fn get_payment_info(
        &self,
        account_id: Uuid,
        payment_id: Uuid,
        _ctx: &CallContext,
    ) -> AdapterResult<ResultEnvelope> {
        let state = self.state.lock().await;
        match state.payments.get(&payment_id) {
            Some(payment) if payment.account_id == account_id => Ok(Outcome::Done(payment.last.clone())),
            _ => Err(GatewayError::Invalid(format!("unknown payment {}", payment_id))),
        }
    }

    async fn get_refund_info(
        &self,
        account_id: Uuid,
        payment_id: Uuid,
        _ctx: &CallContext,
    ) -> AdapterResult<Vec<ResultEnvelope>> {
        let state = self.state.lock().await;
        let refunds = state
            .refunds
            .iter()
            .filter(|r| r.account_id == account_id && r.payment_id == payment_id)
            .map(|r| r.envelope.clone())
            .collect();
        Ok(Outcome::Done(refunds))
    }

    async fn search_payments(
        &self,
        search_key: &str,
        offset: u64,
        limit: u64,
        _ctx: &CallContext,
    ) -> AdapterResult<SearchPage<ResultEnvelope>> {
        let state = self.state.lock().await;
        let mut matched: Vec<(&String, ResultEnvelope)> = state
            .payments
            .iter()
            .filter(|(payment_id, p)| {
                matches_key(search_key, &[p.reference.clone(), p.account_id.to_string(), payment_id.to_string()])
            })
            .map(|(_, p)| (&p.reference, p.last.clone()))
            .collect();
        matched.sort_by(|a, b| a.0.cmp(b.0));
        let records: Vec<ResultEnvelope> = matched.into_iter().map(|(_, e)| e).collect();
        Ok(Outcome::Done(SearchPage::from_slice(&records, offset, limit)))
    }

    async fn search_refunds(
        &self,
        search_key: &str,
        offset: u64,
        limit: u64,
        _ctx: &CallContext,
    ) -> AdapterResult<SearchPage<ResultEnvelope>> {
        let state = self.state.lock().await;
        let records: Vec<ResultEnvelope> = state
            .refunds
            .iter()
            .filter(|r| {
                matches_key(
                    search_key,
                    &[
                        r.envelope.gateway_reference_id.clone().unwrap_or_default(),
                        r.account_id.to_string(),
                        r.payment_id.to_string(),
                    ],
                )
            })
            .map(|r| r.envelope.clone())
            .collect();
        Ok(Outcome::Done(SearchPage::from_slice(&records, offset, limit)))
    }

    async fn search_payment_methods(
        &self,
        search_key: &str,
        offset: u64,
        limit: u64,
        _ctx: &CallContext,
    ) -> AdapterResult<SearchPage<PaymentMethodDetail>> {
        let state = self.state.lock().await;
        let records: Vec<PaymentMethodDetail> = state
            .methods
            .values()
            .filter(|m| {
                matches_key(
                    search_key,
                    &[
                        m.detail.external_payment_method_id.clone().unwrap_or_default(),
                        m.account_id.to_string(),
                        m.detail.payment_method_id.to_string(),
                    ],
                )
            })
            .map(|m| m.detail.clone())
            .collect();
        Ok(Outcome::Done(SearchPage::from_slice(&records, offset, limit)))
    }

    async fn add_payment_method(
        &self,
        account_id: Uuid,
        payment_method_id: Uuid,
        props: &PaymentMethodProps,
        set_default: bool,
        _ctx: &CallContext,
    ) -> AdapterResult<()> {
        let mut state = self.state.lock().await;
        if state.methods.contains_key(&payment_method_id) {
            return Err(GatewayError::Invalid(format!("payment method {} already exists", payment_method_id)));
        }
        if set_default {
            for method in state.methods.values_mut().filter(|m| m.account_id == account_id) {
                method.detail.is_default = false;
            }
        }

        let external_id = props
            .external_payment_method_id
            .clone()
            .unwrap_or_else(|| format!("tok_{}", payment_method_id.simple()));
        state.methods.insert(
            payment_method_id,
            SandboxMethod {
                account_id,
                detail: PaymentMethodDetail {
                    payment_method_id,
                    external_payment_method_id: Some(external_id),
                    is_default: set_default,
                    properties: props.properties.clone(),
                },
            },
        );
        info!(%account_id, %payment_method_id, "Sandbox payment method added");
        Ok(Outcome::Done(()))
    }

    async fn delete_payment_method(
        &self,
        account_id: Uuid,
        payment_method_id: Uuid,
        _ctx: &CallContext,
    ) -> AdapterResult<()> {
        let mut state = self.state.lock().await;
        if !matches!(state.methods.get(&payment_method_id), Some(m) if m.account_id == account_id) {
            return Err(GatewayError::Invalid(format!("unknown payment method {}", payment_method_id)));
        }
        state.methods.remove(&payment_method_id);
        Ok(Outcome::Done(()))
    }

    async fn get_payment_method_detail(
        &self,
        account_id: Uuid,
        payment_method_id: Uuid,
        _ctx: &CallContext,
    ) -> AdapterResult<PaymentMethodDetail> {
        let state = self.state.lock().await;
        match state.methods.get(&payment_method_id) {
            Some(m) if m.account_id == account_id => Ok(Outcome::Done(m.detail.clone())),
            _ => Err(GatewayError::Invalid(format!("unknown payment method {}", payment_method_id))),
        }
    }

    async fn set_default_payment_method(
        &self,
        account_id: Uuid,
        payment_method_id: Uuid,
        _ctx: &CallContext,
    ) -> AdapterResult<()> {
        let mut state = self.state.lock().await;
        if !matches!(state.methods.get(&payment_method_id), Some(m) if m.account_id == account_id) {
            return Err(GatewayError::Invalid(format!("unknown payment method {}", payment_method_id)));
        }
        for method in state.methods.values_mut().filter(|m| m.account_id == account_id) {
            method.detail.is_default = method.detail.payment_method_id == payment_method_id;
        }
        Ok(Outcome::Done(()))
    }

    async fn list_payment_methods(
        &self,
        account_id: Uuid,
        _refresh_from_gateway: bool,
        _ctx: &CallContext,
    ) -> AdapterResult<Vec<PaymentMethodInfo>> {
        let state = self.state.lock().await;
        let methods = state
            .methods
            .values()
            .filter(|m| m.account_id == account_id)
            .map(|m| PaymentMethodInfo {
                account_id,
                payment_method_id: m.detail.payment_method_id,
                external_payment_method_id: m.detail.external_payment_method_id.clone(),
                is_default: m.detail.is_default,
            })
            .collect();
        Ok(Outcome::Done(methods))
    }

    async fn reset_payment_methods(
        &self,
        account_id: Uuid,
        payment_methods: &[PaymentMethodInfo],
        _ctx: &CallContext,
    ) -> AdapterResult<()> {
        let mut state = self.state.lock().await;
        let mut previous: BTreeMap<Uuid, SandboxMethod> = BTreeMap::new();
        let ids: Vec<Uuid> = state
            .methods
            .iter()
            .filter(|(_, m)| m.account_id == account_id)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Some(method) = state.methods.remove(&id) {
                previous.insert(id, method);
            }
        }

        for info in payment_methods.iter().filter(|i| i.account_id == account_id) {
            let properties = previous
                .get(&info.payment_method_id)
                .map(|m| m.detail.properties.clone())
                .unwrap_or_default();
            state.methods.insert(
                info.payment_method_id,
                SandboxMethod {
                    account_id,
                    detail: PaymentMethodDetail {
                        payment_method_id: info.payment_method_id,
                        external_payment_method_id: info.external_payment_method_id.clone(),
                        is_default: info.is_default,
                        properties,
                    },
                },
            );
        }
        Ok(Outcome::Done(()))
    }

    async fn build_hosted_page_descriptor(
        &self,
        account_id: Uuid,
        fields: &HostedPageDescriptorFields,
        _ctx: &CallContext,
    ) -> AdapterResult<HostedPageFormDescriptor> {
        let mut form_fields = fields.to_form_fields();
        form_fields.insert("account_id".to_string(), account_id.to_string());

        let mut properties = BTreeMap::new();
        properties.insert("plugin".to_string(), self.name.clone());

        Ok(Outcome::Done(HostedPageFormDescriptor {
            account_id,
            form_method: FormMethod::Post,
            form_url: format!("https://sandbox.paybridge.test/hpp/{}", account_id.simple()),
            form_fields,
            properties,
        }))
    }

    async fn process_notification(
        &self,
        notification: &str,
        _ctx: &CallContext,
    ) -> AdapterResult<NormalizedNotification> {
        let parsed: SandboxNotification = serde_json::from_str(notification)
            .map_err(|e| GatewayError::Invalid(format!("malformed notification: {}", e)))?;

        let payment_id = match parsed.payment_id {
            Some(id) => Some(id),
            None => {
                let state = self.state.lock().await;
                state
                    .payments
                    .iter()
                    .find(|(_, p)| p.reference == parsed.reference)
                    .map(|(id, _)| *id)
            }
        };

        Ok(Outcome::Done(NormalizedNotification {
            gateway_reference_id: Some(parsed.reference),
            payment_id,
            status: parsed.status,
            acknowledgement: Some("[accepted]".to_string()),
            properties: BTreeMap::new(),
        }))
    }
}
