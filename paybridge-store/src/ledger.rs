use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paybridge_core::{OperationRequest, ResultEnvelope};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerState {
    InFlight,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureClass {
    /// Gateway answered with a definitive decline
    Declined,
    /// Adapter does not implement the operation
    Unsupported,
    /// Gateway or adapter rejected the request shape
    Invalid,
}

/// Definitive failure stored against an operation id and replayed on retry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerFailure {
    pub class: FailureClass,
    pub code: Option<String>,
    pub message: String,
}

impl LedgerFailure {
    pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: Option<String>) -> Self {
        self.code = code;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdempotencyRecord {
    pub operation_id: String,
    pub fingerprint: String,
    pub request: OperationRequest,
    pub state: LedgerState,
    pub plugin_name: Option<String>,
    /// Set on completion. While in-flight it may hold an `UNDETERMINED` envelope.
    pub result_envelope: Option<ResultEnvelope>,
    pub failure: Option<LedgerFailure>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl IdempotencyRecord {
    pub fn new(request: &OperationRequest) -> Self {
        Self {
            operation_id: request.operation_id.clone(),
            fingerprint: request.fingerprint(),
            request: request.clone(),
            state: LedgerState::InFlight,
            plugin_name: None,
            result_envelope: None,
            failure: None,
            attempts: 0,
            created_at: Utc::now(),
            last_attempt_at: None,
        }
    }

    /// What a second `begin_or_reuse` for the same request sees.
    pub fn decision_for(&self, request: &OperationRequest) -> LedgerResult<LedgerDecision> {
        if self.fingerprint != request.fingerprint() {
            return Err(LedgerError::FingerprintMismatch {
                operation_id: self.operation_id.clone(),
            });
        }

        match self.state {
            LedgerState::InFlight => Ok(LedgerDecision::InFlight(self.clone())),
            LedgerState::Completed => match &self.result_envelope {
                Some(envelope) => Ok(LedgerDecision::Completed(envelope.clone())),
                None => Err(LedgerError::Corrupted(format!(
                    "completed record {} has no result",
                    self.operation_id
                ))),
            },
            LedgerState::Failed => match &self.failure {
                Some(failure) => Ok(LedgerDecision::Failed(failure.clone())),
                None => Err(LedgerError::Corrupted(format!(
                    "failed record {} has no failure",
                    self.operation_id
                ))),
            },
        }
    }

    pub fn record_attempt(&mut self, plugin_name: &str) -> LedgerResult<u32> {
        self.ensure_in_flight()?;
        self.attempts += 1;
        self.plugin_name = Some(plugin_name.to_string());
        self.last_attempt_at = Some(Utc::now());
        Ok(self.attempts)
    }

    pub fn complete(&mut self, envelope: ResultEnvelope) -> LedgerResult<()> {
        self.ensure_in_flight()?;
        self.state = LedgerState::Completed;
        self.result_envelope = Some(envelope);
        self.failure = None;
        Ok(())
    }

    pub fn fail(&mut self, failure: LedgerFailure) -> LedgerResult<()> {
        self.ensure_in_flight()?;
        self.state = LedgerState::Failed;
        self.failure = Some(failure);
        Ok(())
    }

    pub fn mark_undetermined(&mut self, envelope: ResultEnvelope) -> LedgerResult<()> {
        self.ensure_in_flight()?;
        self.result_envelope = Some(envelope);
        Ok(())
    }

    fn ensure_in_flight(&self) -> LedgerResult<()> {
        if self.state != LedgerState::InFlight {
            return Err(LedgerError::NotInFlight {
                operation_id: self.operation_id.clone(),
                state: self.state,
            });
        }
        Ok(())
    }
}

/// Outcome of `begin_or_reuse`.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerDecision {
    /// Caller owns the operation and may contact the gateway
    Fresh,
    /// Another attempt holds the operation, or a previous one never resolved
    InFlight(IdempotencyRecord),
    Completed(ResultEnvelope),
    Failed(LedgerFailure),
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Operation {operation_id} was reused with a different request")]
    FingerprintMismatch { operation_id: String },

    #[error("Operation not found: {0}")]
    NotFound(String),

    #[error("Operation {operation_id} is {state:?}, expected IN_FLIGHT")]
    NotInFlight {
        operation_id: String,
        state: LedgerState,
    },

    #[error("Ledger record corrupted: {0}")]
    Corrupted(String),

    #[error("Ledger backend failure: {0}")]
    Backend(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Store of operation outcomes keyed by the caller's operation id.
///
/// Transitions on one operation id are atomic with respect to `begin_or_reuse` on the
/// same id. Different ids never contend. Records are kept until `purge`.
#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    async fn begin_or_reuse(&self, request: &OperationRequest) -> LedgerResult<LedgerDecision>;

    /// Count a gateway dispatch. Returns the attempt number.
    async fn record_attempt(&self, operation_id: &str, plugin_name: &str) -> LedgerResult<u32>;

    async fn complete(
        &self,
        operation_id: &str,
        envelope: ResultEnvelope,
    ) -> LedgerResult<IdempotencyRecord>;

    async fn fail(
        &self,
        operation_id: &str,
        failure: LedgerFailure,
    ) -> LedgerResult<IdempotencyRecord>;

    /// Store an undetermined result. The record stays in-flight until reconciled.
    async fn mark_undetermined(
        &self,
        operation_id: &str,
        envelope: ResultEnvelope,
    ) -> LedgerResult<IdempotencyRecord>;

    async fn get(&self, operation_id: &str) -> LedgerResult<Option<IdempotencyRecord>>;

    /// Remove a record. Returns false when nothing was stored.
    async fn purge(&self, operation_id: &str) -> LedgerResult<bool>;

    async fn list_in_flight(&self) -> LedgerResult<Vec<IdempotencyRecord>>;
}
