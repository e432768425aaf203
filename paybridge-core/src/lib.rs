pub mod adapter;
pub mod context;
pub mod hosted_page;
pub mod payment;
pub mod payment_method;
pub mod search;

pub use adapter::{AdapterResult, GatewayError, Outcome, PaymentAdapter, TransportErrorKind};
pub use context::CallContext;
pub use hosted_page::{
    BillingAddress, Customer, FormMethod, HostedPageDescriptorFields, HostedPageFormDescriptor,
    NormalizedNotification,
};
pub use payment::{Currency, OperationKind, OperationRequest, OperationStatus, ResultEnvelope};
pub use payment_method::{
    PaymentMethodDescriptor, PaymentMethodDetail, PaymentMethodInfo, PaymentMethodProps,
};
pub use search::SearchPage;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Unknown currency code: {0}")]
    UnknownCurrency(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
