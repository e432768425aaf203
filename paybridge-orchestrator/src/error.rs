use paybridge_core::{CoreError, ResultEnvelope};
use paybridge_store::{FailureClass, LedgerError, LedgerFailure};
use uuid::Uuid;

use crate::registry::RegistryError;

/// Everything an orchestrated operation can end in, short of a result envelope.
///
/// `Validation`, `BusinessDecline` and `Unsupported` mean nothing happened at the
/// gateway. `Undetermined` means nobody knows yet.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Declined by gateway: {message}")]
    BusinessDecline {
        code: Option<String>,
        message: String,
    },

    #[error("Gateway unreachable after {attempts} attempts: {message}")]
    TransientTransport { attempts: u32, message: String },

    #[error("Outcome of operation {operation_id} is undetermined: {reason}")]
    Undetermined {
        operation_id: String,
        reason: String,
        envelope: Box<ResultEnvelope>,
    },

    #[error("Operation {0} is already in flight")]
    ConcurrentOperation(String),

    #[error("Operation {0} was already used for a different request")]
    IdempotencyKeyReused(String),

    #[error("No adapter registered for plugin {0}")]
    AdapterNotFound(String),

    #[error("Payment method not found: {0}")]
    PaymentMethodNotFound(Uuid),

    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    #[error("Ledger failure: {0}")]
    Ledger(String),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

impl OrchestratorError {
    pub fn unsupported(plugin: &str, operation: &str) -> Self {
        OrchestratorError::Unsupported(format!("{} is not supported by plugin {}", operation, plugin))
    }

    /// Stable machine-readable code, also used as a metrics label.
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::Validation(_) => "VALIDATION_ERROR",
            OrchestratorError::Unsupported(_) => "UNSUPPORTED_OPERATION",
            OrchestratorError::BusinessDecline { .. } => "BUSINESS_DECLINE",
            OrchestratorError::TransientTransport { .. } => "TRANSIENT_TRANSPORT",
            OrchestratorError::Undetermined { .. } => "UNDETERMINED",
            OrchestratorError::ConcurrentOperation(_) => "CONCURRENT_OPERATION",
            OrchestratorError::IdempotencyKeyReused(_) => "IDEMPOTENCY_KEY_REUSED",
            OrchestratorError::AdapterNotFound(_) => "ADAPTER_NOT_FOUND",
            OrchestratorError::PaymentMethodNotFound(_) => "PAYMENT_METHOD_NOT_FOUND",
            OrchestratorError::OperationNotFound(_) => "OPERATION_NOT_FOUND",
            OrchestratorError::Ledger(_) => "LEDGER_ERROR",
        }
    }

    /// Rebuild the error a failed ledger record stands for.
    pub fn from_failure(failure: LedgerFailure) -> Self {
        match failure.class {
            FailureClass::Declined => OrchestratorError::BusinessDecline {
                code: failure.code,
                message: failure.message,
            },
            FailureClass::Unsupported => OrchestratorError::Unsupported(failure.message),
            FailureClass::Invalid => OrchestratorError::Validation(failure.message),
        }
    }
}

impl From<CoreError> for OrchestratorError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ValidationError(msg) => OrchestratorError::Validation(msg),
            CoreError::UnknownCurrency(code) => {
                OrchestratorError::Validation(format!("unknown currency {}", code))
            }
        }
    }
}

impl From<LedgerError> for OrchestratorError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::FingerprintMismatch { operation_id } => {
                OrchestratorError::IdempotencyKeyReused(operation_id)
            }
            LedgerError::NotFound(operation_id) => OrchestratorError::OperationNotFound(operation_id),
            other => OrchestratorError::Ledger(other.to_string()),
        }
    }
}

impl From<RegistryError> for OrchestratorError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(plugin) => OrchestratorError::AdapterNotFound(plugin),
            RegistryError::Duplicate(plugin) => {
                OrchestratorError::Validation(format!("plugin {} registered twice", plugin))
            }
        }
    }
}
