use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::CallContext;
use crate::hosted_page::{HostedPageDescriptorFields, HostedPageFormDescriptor, NormalizedNotification};
use crate::payment::{OperationRequest, ResultEnvelope};
use crate::payment_method::{PaymentMethodDetail, PaymentMethodInfo, PaymentMethodProps};
use crate::search::SearchPage;

/// Result of an adapter call that the gateway may not support at all.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Done(T),
    Unsupported,
}

impl<T> Outcome<T> {
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Outcome::Unsupported)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Done(value) => Outcome::Done(f(value)),
            Outcome::Unsupported => Outcome::Unsupported,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportErrorKind {
    Timeout,
    ConnectionReset,
    Unavailable,
}

/// How an adapter classifies a failed gateway call.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Gateway rejected the request as invalid: {0}")]
    Invalid(String),
    #[error("Transport failure ({kind:?}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
    #[error("Declined by gateway: {message}")]
    Declined {
        code: Option<String>,
        message: String,
    },
}

impl GatewayError {
    pub fn timeout(message: impl Into<String>) -> Self {
        GatewayError::Transport {
            kind: TransportErrorKind::Timeout,
            message: message.into(),
        }
    }

    pub fn connection_reset(message: impl Into<String>) -> Self {
        GatewayError::Transport {
            kind: TransportErrorKind::ConnectionReset,
            message: message.into(),
        }
    }

    pub fn declined(code: Option<&str>, message: impl Into<String>) -> Self {
        GatewayError::Declined {
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    /// Only transport failures may be retried. A decline is an answer.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transport { .. })
    }
}

pub type AdapterResult<T> = Result<Outcome<T>, GatewayError>;

/// Contract every gateway integration implements.
///
/// `charge` is mandatory. Every other operation defaults to [`Outcome::Unsupported`]
/// so an adapter only implements what its gateway can do.
#[async_trait]
pub trait PaymentAdapter: Send + Sync {
    /// Plugin name used for registry lookups
    fn name(&self) -> &str;

    /// Authorize without capturing funds
    async fn authorize(
        &self,
        _request: &OperationRequest,
        _ctx: &CallContext,
    ) -> AdapterResult<ResultEnvelope> {
        Ok(Outcome::Unsupported)
    }

    /// Capture a previously authorized payment
    async fn capture(
        &self,
        _request: &OperationRequest,
        _ctx: &CallContext,
    ) -> AdapterResult<ResultEnvelope> {
        Ok(Outcome::Unsupported)
    }

    /// Authorize and capture in one step
    async fn charge(
        &self,
        request: &OperationRequest,
        ctx: &CallContext,
    ) -> AdapterResult<ResultEnvelope>;

    async fn void(
        &self,
        _request: &OperationRequest,
        _ctx: &CallContext,
    ) -> AdapterResult<ResultEnvelope> {
        Ok(Outcome::Unsupported)
    }

    async fn refund(
        &self,
        _request: &OperationRequest,
        _ctx: &CallContext,
    ) -> AdapterResult<ResultEnvelope> {
        Ok(Outcome::Unsupported)
    }

    /// Current gateway view of a payment
    async fn get_payment_info(
        &self,
        _account_id: Uuid,
        _payment_id: Uuid,
        _ctx: &CallContext,
    ) -> AdapterResult<ResultEnvelope> {
        Ok(Outcome::Unsupported)
    }

    async fn get_refund_info(
        &self,
        _account_id: Uuid,
        _payment_id: Uuid,
        _ctx: &CallContext,
    ) -> AdapterResult<Vec<ResultEnvelope>> {
        Ok(Outcome::Unsupported)
    }

    /// `search_key` is adapter-defined and passed through untouched
    async fn search_payments(
        &self,
        _search_key: &str,
        _offset: u64,
        _limit: u64,
        _ctx: &CallContext,
    ) -> AdapterResult<SearchPage<ResultEnvelope>> {
        Ok(Outcome::Unsupported)
    }

    async fn search_refunds(
        &self,
        _search_key: &str,
        _offset: u64,
        _limit: u64,
        _ctx: &CallContext,
    ) -> AdapterResult<SearchPage<ResultEnvelope>> {
        Ok(Outcome::Unsupported)
    }

    async fn search_payment_methods(
        &self,
        _search_key: &str,
        _offset: u64,
        _limit: u64,
        _ctx: &CallContext,
    ) -> AdapterResult<SearchPage<PaymentMethodDetail>> {
        Ok(Outcome::Unsupported)
    }

    async fn add_payment_method(
        &self,
        _account_id: Uuid,
        _payment_method_id: Uuid,
        _props: &PaymentMethodProps,
        _set_default: bool,
        _ctx: &CallContext,
    ) -> AdapterResult<()> {
        Ok(Outcome::Unsupported)
    }

    async fn delete_payment_method(
        &self,
        _account_id: Uuid,
        _payment_method_id: Uuid,
        _ctx: &CallContext,
    ) -> AdapterResult<()> {
        Ok(Outcome::Unsupported)
    }

    async fn get_payment_method_detail(
        &self,
        _account_id: Uuid,
        _payment_method_id: Uuid,
        _ctx: &CallContext,
    ) -> AdapterResult<PaymentMethodDetail> {
        Ok(Outcome::Unsupported)
    }

    async fn set_default_payment_method(
        &self,
        _account_id: Uuid,
        _payment_method_id: Uuid,
        _ctx: &CallContext,
    ) -> AdapterResult<()> {
        Ok(Outcome::Unsupported)
    }

    /// With `refresh_from_gateway` the adapter must ask the gateway rather than its cache
    async fn list_payment_methods(
        &self,
        _account_id: Uuid,
        _refresh_from_gateway: bool,
        _ctx: &CallContext,
    ) -> AdapterResult<Vec<PaymentMethodInfo>> {
        Ok(Outcome::Unsupported)
    }

    /// Replace the adapter's view of an account's payment methods
    async fn reset_payment_methods(
        &self,
        _account_id: Uuid,
        _payment_methods: &[PaymentMethodInfo],
        _ctx: &CallContext,
    ) -> AdapterResult<()> {
        Ok(Outcome::Unsupported)
    }

    async fn build_hosted_page_descriptor(
        &self,
        _account_id: Uuid,
        _fields: &HostedPageDescriptorFields,
        _ctx: &CallContext,
    ) -> AdapterResult<HostedPageFormDescriptor> {
        Ok(Outcome::Unsupported)
    }

    /// Parse a raw gateway callback. Acknowledging receipt with the gateway is the
    /// adapter's job, not the caller's.
    async fn process_notification(
        &self,
        _notification: &str,
        _ctx: &CallContext,
    ) -> AdapterResult<NormalizedNotification> {
        Ok(Outcome::Unsupported)
    }
}
