use async_trait::async_trait;
use chrono::Utc;
use paybridge_core::{
    AdapterResult, CallContext, GatewayError, HostedPageDescriptorFields, HostedPageFormDescriptor,
    NormalizedNotification, OperationKind, OperationRequest, OperationStatus, Outcome,
    PaymentAdapter, PaymentMethodDescriptor, PaymentMethodDetail, PaymentMethodInfo,
    PaymentMethodProps, ResultEnvelope, SearchPage,
};
use paybridge_shared::{OperationSettledEvent, SettlementOutcome};
use paybridge_store::app_config::SearchConfig;
use paybridge_store::{
    FailureClass, IdempotencyLedger, IdempotencyRecord, LedgerDecision, LedgerFailure, LedgerState,
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::directory::PaymentMethodDirectory;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::pagination::{Page, PageCursor, PageSource};
use crate::registry::AdapterRegistry;
use crate::retry::RetryPolicy;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchLimits {
    pub default_limit: u64,
    pub max_limit: u64,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 500,
        }
    }
}

impl SearchLimits {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            default_limit: config.default_limit,
            max_limit: config.max_limit,
        }
    }

    /// Zero is rejected, anything above the maximum is clamped.
    pub fn resolve(&self, requested: Option<u64>) -> OrchestratorResult<u64> {
        match requested {
            Some(0) => Err(OrchestratorError::Validation("limit must be at least 1".to_string())),
            Some(limit) => Ok(limit.min(self.max_limit)),
            None => Ok(self.default_limit.min(self.max_limit)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// The gateway gave a definitive answer and the record is settled now
    Resolved(IdempotencyRecord),
    /// Still no definitive answer
    StillInFlight(IdempotencyRecord),
    AlreadySettled(IdempotencyRecord),
}

/// Front door for every payment operation.
///
/// Money-moving operations go through the idempotency ledger and the bounded retry
/// loop. Queries, searches, payment-method management, hosted pages and
/// notifications are routed to the right adapter without touching the ledger.
#[derive(Clone)]
pub struct OperationOrchestrator {
    ledger: Arc<dyn IdempotencyLedger>,
    registry: Arc<AdapterRegistry>,
    directory: Arc<PaymentMethodDirectory>,
    policy: RetryPolicy,
    limits: SearchLimits,
    events: broadcast::Sender<OperationSettledEvent>,
}

impl OperationOrchestrator {
    pub fn new(ledger: Arc<dyn IdempotencyLedger>, registry: AdapterRegistry) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            ledger,
            registry: Arc::new(registry),
            directory: Arc::new(PaymentMethodDirectory::new()),
            policy: RetryPolicy::default(),
            limits: SearchLimits::default(),
            events,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_search_limits(mut self, limits: SearchLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_directory(mut self, directory: Arc<PaymentMethodDirectory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn directory(&self) -> &PaymentMethodDirectory {
        &self.directory
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Settlement events for every ledger transition that ends or parks an operation.
    pub fn subscribe(&self) -> broadcast::Receiver<OperationSettledEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Money-moving operations
    // ========================================================================

    pub async fn authorize(&self, request: OperationRequest, ctx: &CallContext) -> OrchestratorResult<ResultEnvelope> {
        self.execute_as(OperationKind::Authorize, request, ctx).await
    }

    pub async fn capture(&self, request: OperationRequest, ctx: &CallContext) -> OrchestratorResult<ResultEnvelope> {
        self.execute_as(OperationKind::Capture, request, ctx).await
    }

    pub async fn charge(&self, request: OperationRequest, ctx: &CallContext) -> OrchestratorResult<ResultEnvelope> {
        self.execute_as(OperationKind::Charge, request, ctx).await
    }

    pub async fn void(&self, request: OperationRequest, ctx: &CallContext) -> OrchestratorResult<ResultEnvelope> {
        self.execute_as(OperationKind::Void, request, ctx).await
    }

    pub async fn refund(&self, request: OperationRequest, ctx: &CallContext) -> OrchestratorResult<ResultEnvelope> {
        self.execute_as(OperationKind::Refund, request, ctx).await
    }

    async fn execute_as(
        &self,
        kind: OperationKind,
        request: OperationRequest,
        ctx: &CallContext,
    ) -> OrchestratorResult<ResultEnvelope> {
        if request.kind != kind {
            return Err(OrchestratorError::Validation(format!(
                "request kind {} does not match {}",
                request.kind, kind
            )));
        }
        self.execute(request, ctx).await
    }

    /// Run a money-moving operation at most once per operation id.
    ///
    /// The gateway attempts run on their own task. Dropping the returned future stops
    /// the wait, not the attempt, and the outcome still lands in the ledger.
    pub async fn execute(&self, request: OperationRequest, ctx: &CallContext) -> OrchestratorResult<ResultEnvelope> {
        request.validate()?;

        match self.ledger.begin_or_reuse(&request).await? {
            LedgerDecision::Fresh => {}
            LedgerDecision::Completed(envelope) => {
                info!(operation_id = %request.operation_id, kind = %request.kind, "Replaying completed operation");
                return Ok(envelope);
            }
            LedgerDecision::Failed(failure) => {
                info!(operation_id = %request.operation_id, kind = %request.kind, "Replaying failed operation");
                return Err(OrchestratorError::from_failure(failure));
            }
            LedgerDecision::InFlight(_) => {
                warn!(operation_id = %request.operation_id, kind = %request.kind, "Operation already in flight");
                return Err(OrchestratorError::ConcurrentOperation(request.operation_id));
            }
        }

        let adapter = match self.adapter_for_method(request.payment_method_id).await {
            Ok(adapter) => adapter,
            Err(err) => {
                // Nothing reached a gateway, so the operation id is released
                self.ledger.purge(&request.operation_id).await?;
                warn!(operation_id = %request.operation_id, error = %err, "No adapter for operation");
                return Err(err);
            }
        };

        let fallback = request.clone();
        let this = self.clone();
        let owned_ctx = ctx.clone();
        let attempt = tokio::spawn(async move { this.dispatch(adapter, request, owned_ctx).await });

        match attempt.await {
            Ok(result) => result,
            Err(join_error) => {
                let reason = format!("attempt task aborted: {}", join_error);
                error!(operation_id = %fallback.operation_id, %reason, "Operation attempt did not finish");
                let envelope = ResultEnvelope::undetermined(&fallback, reason.clone());
                if let Err(err) = self
                    .ledger
                    .mark_undetermined(&fallback.operation_id, envelope.clone())
                    .await
                {
                    warn!(operation_id = %fallback.operation_id, error = %err, "Could not park aborted operation");
                }
                Err(OrchestratorError::Undetermined {
                    operation_id: fallback.operation_id,
                    reason,
                    envelope: Box::new(envelope),
                })
            }
        }
    }

    async fn dispatch(
        &self,
        adapter: Arc<dyn PaymentAdapter>,
        request: OperationRequest,
        ctx: CallContext,
    ) -> OrchestratorResult<ResultEnvelope> {
        let plugin = adapter.name().to_string();
        let max_attempts = self.policy.attempts();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            self.ledger.record_attempt(&request.operation_id, &plugin).await?;
            debug!(
                operation_id = %request.operation_id,
                kind = %request.kind,
                plugin = %plugin,
                attempt,
                "Dispatching to gateway"
            );

            match self.policy.call(invoke(adapter.as_ref(), &request, &ctx)).await {
                Ok(Outcome::Done(envelope)) => {
                    return self.settle(&plugin, &request, &ctx, envelope, attempt).await;
                }
                Ok(Outcome::Unsupported) => {
                    let message = format!("{} is not supported by plugin {}", request.kind, plugin);
                    let failure = LedgerFailure::new(FailureClass::Unsupported, message.clone());
                    self.fail(&plugin, &request, &ctx, failure, attempt).await?;
                    return Err(OrchestratorError::Unsupported(message));
                }
                Err(GatewayError::Declined { code, message }) => {
                    let failure = LedgerFailure::new(FailureClass::Declined, message.clone()).with_code(code.clone());
                    self.fail(&plugin, &request, &ctx, failure, attempt).await?;
                    return Err(OrchestratorError::BusinessDecline { code, message });
                }
                Err(GatewayError::Invalid(message)) => {
                    let failure = LedgerFailure::new(FailureClass::Invalid, message.clone());
                    self.fail(&plugin, &request, &ctx, failure, attempt).await?;
                    return Err(OrchestratorError::Validation(message));
                }
                Err(error @ GatewayError::Transport { .. }) => {
                    warn!(
                        operation_id = %request.operation_id,
                        attempt,
                        max_attempts,
                        error = %error,
                        "Transient gateway failure"
                    );
                    last_error = error.to_string();
                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.delay_for_attempt(attempt - 1)).await;
                    }
                }
            }
        }

        let reason = format!("no definitive answer after {} attempts: {}", max_attempts, last_error);
        self.park_undetermined(&plugin, &request, &ctx, reason, max_attempts).await
    }

    async fn settle(
        &self,
        plugin: &str,
        request: &OperationRequest,
        ctx: &CallContext,
        envelope: ResultEnvelope,
        attempts: u32,
    ) -> OrchestratorResult<ResultEnvelope> {
        let envelope = match check_envelope(request, envelope) {
            Ok(envelope) => envelope,
            Err(reason) => return self.park_undetermined(plugin, request, ctx, reason, attempts).await,
        };

        if envelope.status == OperationStatus::Failed {
            let message = envelope
                .gateway_error
                .clone()
                .unwrap_or_else(|| "gateway reported failure".to_string());
            let code = envelope.gateway_error_code.clone();
            let failure = LedgerFailure::new(FailureClass::Declined, message.clone()).with_code(code.clone());
            self.fail(plugin, request, ctx, failure, attempts).await?;
            return Err(OrchestratorError::BusinessDecline { code, message });
        }

        self.ledger.complete(&request.operation_id, envelope.clone()).await?;
        info!(
            operation_id = %request.operation_id,
            kind = %request.kind,
            plugin,
            attempts,
            status = ?envelope.status,
            gateway_reference_id = ?envelope.gateway_reference_id,
            "Operation completed"
        );
        self.publish(request, ctx.tenant_id, plugin, SettlementOutcome::Completed, Some(&envelope), attempts);
        Ok(envelope)
    }

    async fn fail(
        &self,
        plugin: &str,
        request: &OperationRequest,
        ctx: &CallContext,
        failure: LedgerFailure,
        attempts: u32,
    ) -> OrchestratorResult<()> {
        self.ledger.fail(&request.operation_id, failure.clone()).await?;
        warn!(
            operation_id = %request.operation_id,
            kind = %request.kind,
            plugin,
            class = ?failure.class,
            message = %failure.message,
            "Operation failed"
        );
        self.publish(request, ctx.tenant_id, plugin, SettlementOutcome::Failed, None, attempts);
        Ok(())
    }

    async fn park_undetermined(
        &self,
        plugin: &str,
        request: &OperationRequest,
        ctx: &CallContext,
        reason: String,
        attempts: u32,
    ) -> OrchestratorResult<ResultEnvelope> {
        let envelope = ResultEnvelope::undetermined(request, reason.clone());
        self.ledger
            .mark_undetermined(&request.operation_id, envelope.clone())
            .await?;
        error!(
            operation_id = %request.operation_id,
            kind = %request.kind,
            plugin,
            attempts,
            %reason,
            "Operation outcome undetermined, reconciliation required"
        );
        self.publish(request, ctx.tenant_id, plugin, SettlementOutcome::Undetermined, Some(&envelope), attempts);
        Err(OrchestratorError::Undetermined {
            operation_id: request.operation_id.clone(),
            reason,
            envelope: Box::new(envelope),
        })
    }

    fn publish(
        &self,
        request: &OperationRequest,
        tenant_id: Uuid,
        plugin: &str,
        outcome: SettlementOutcome,
        envelope: Option<&ResultEnvelope>,
        attempts: u32,
    ) {
        let event = OperationSettledEvent {
            operation_id: request.operation_id.clone(),
            tenant_id,
            kind: request.kind.as_str().to_string(),
            plugin_name: Some(plugin.to_string()),
            outcome,
            gateway_reference_id: envelope.and_then(|e| e.gateway_reference_id.clone()),
            amount: envelope.map(|e| e.amount_processed),
            currency: envelope.and_then(|e| e.currency).map(|c| c.to_string()),
            attempts,
            timestamp: Utc::now().timestamp(),
        };
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // ========================================================================
    // Ledger records
    // ========================================================================

    pub async fn operation_record(&self, operation_id: &str) -> OrchestratorResult<IdempotencyRecord> {
        self.ledger
            .get(operation_id)
            .await?
            .ok_or_else(|| OrchestratorError::OperationNotFound(operation_id.to_string()))
    }

    /// Operations still waiting for a definitive answer, oldest first.
    pub async fn in_flight_operations(&self) -> OrchestratorResult<Vec<IdempotencyRecord>> {
        Ok(self.ledger.list_in_flight().await?)
    }

    /// Drop a settled record so its operation id can be reused.
    pub async fn purge_operation(&self, operation_id: &str) -> OrchestratorResult<()> {
        let record = self.operation_record(operation_id).await?;
        if record.state == LedgerState::InFlight {
            return Err(OrchestratorError::Validation(format!(
                "operation {} is in flight and must be reconciled before it is purged",
                operation_id
            )));
        }
        self.ledger.purge(operation_id).await?;
        info!(operation_id, "Operation record purged");
        Ok(())
    }

    /// Ask the gateway about an in-flight operation and settle it if the answer is
    /// definitive and attributable to this operation.
    pub async fn reconcile(&self, operation_id: &str, ctx: &CallContext) -> OrchestratorResult<ReconcileOutcome> {
        let record = self.operation_record(operation_id).await?;
        if record.state != LedgerState::InFlight {
            return Ok(ReconcileOutcome::AlreadySettled(record));
        }

        let plugin = match &record.plugin_name {
            Some(plugin) => plugin.clone(),
            None => self.directory.plugin_for(record.request.payment_method_id).await?,
        };
        let adapter = self.registry.get(&plugin)?;
        let gateway = adapter.as_ref();
        let request = &record.request;
        let (account_id, payment_id) = (request.account_id, request.payment_id);

        // Refunds are reported apart from the payment they belong to
        let (result, query) = match request.kind {
            OperationKind::Refund => {
                let (result, _) = self
                    .policy
                    .retry_transient(move || gateway.get_refund_info(account_id, payment_id, ctx))
                    .await;
                let checked = result.map(|outcome| outcome.map(|refunds| matching_refund(request, refunds)));
                (checked, "get_refund_info")
            }
            _ => {
                let (result, _) = self
                    .policy
                    .retry_transient(move || gateway.get_payment_info(account_id, payment_id, ctx))
                    .await;
                let checked = result.map(|outcome| outcome.map(|envelope| check_envelope(request, envelope)));
                (checked, "get_payment_info")
            }
        };

        let checked = match result {
            Ok(Outcome::Done(checked)) => checked,
            Ok(Outcome::Unsupported) => {
                return Err(OrchestratorError::unsupported(&plugin, query));
            }
            Err(err) => {
                warn!(operation_id, plugin = %plugin, error = %err, "Reconciliation query gave no answer");
                return Ok(ReconcileOutcome::StillInFlight(record));
            }
        };

        let envelope = match checked {
            Ok(envelope) => envelope,
            Err(reason) => {
                info!(operation_id, %reason, "Gateway state not attributable to operation");
                return Ok(ReconcileOutcome::StillInFlight(record));
            }
        };

        let settled = match envelope.status {
            OperationStatus::Success | OperationStatus::Pending => {
                self.ledger.complete(operation_id, envelope.clone()).await?
            }
            OperationStatus::Failed => {
                let failure = LedgerFailure::new(
                    FailureClass::Declined,
                    envelope
                        .gateway_error
                        .clone()
                        .unwrap_or_else(|| "gateway reported failure".to_string()),
                )
                .with_code(envelope.gateway_error_code.clone());
                self.ledger.fail(operation_id, failure).await?
            }
            OperationStatus::Undetermined => return Ok(ReconcileOutcome::StillInFlight(record)),
        };

        info!(operation_id, plugin = %plugin, state = ?settled.state, "Operation reconciled");
        self.publish(
            request,
            ctx.tenant_id,
            &plugin,
            SettlementOutcome::Reconciled,
            Some(&envelope),
            settled.attempts,
        );
        Ok(ReconcileOutcome::Resolved(settled))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get_payment_info(
        &self,
        account_id: Uuid,
        payment_id: Uuid,
        payment_method_id: Option<Uuid>,
        ctx: &CallContext,
    ) -> OrchestratorResult<ResultEnvelope> {
        let adapter = self.adapter_for_account(account_id, payment_method_id).await?;
        let gateway = adapter.as_ref();
        self.read(gateway.name(), "get_payment_info", move || {
            gateway.get_payment_info(account_id, payment_id, ctx)
        })
        .await
    }

    pub async fn get_refund_info(
        &self,
        account_id: Uuid,
        payment_id: Uuid,
        payment_method_id: Option<Uuid>,
        ctx: &CallContext,
    ) -> OrchestratorResult<Vec<ResultEnvelope>> {
        let adapter = self.adapter_for_account(account_id, payment_method_id).await?;
        let gateway = adapter.as_ref();
        self.read(gateway.name(), "get_refund_info", move || {
            gateway.get_refund_info(account_id, payment_id, ctx)
        })
        .await
    }

    pub fn payments_cursor(
        &self,
        plugin_name: &str,
        search_key: &str,
        offset: u64,
        limit: Option<u64>,
        ctx: &CallContext,
    ) -> OrchestratorResult<PageCursor<ResultEnvelope>> {
        self.record_cursor(SearchTarget::Payments, plugin_name, search_key, offset, limit, ctx)
    }

    pub fn refunds_cursor(
        &self,
        plugin_name: &str,
        search_key: &str,
        offset: u64,
        limit: Option<u64>,
        ctx: &CallContext,
    ) -> OrchestratorResult<PageCursor<ResultEnvelope>> {
        self.record_cursor(SearchTarget::Refunds, plugin_name, search_key, offset, limit, ctx)
    }

    pub fn payment_methods_cursor(
        &self,
        plugin_name: &str,
        search_key: &str,
        offset: u64,
        limit: Option<u64>,
        ctx: &CallContext,
    ) -> OrchestratorResult<PageCursor<PaymentMethodDetail>> {
        let source = PaymentMethodSearch {
            adapter: self.registry.get(plugin_name)?,
            search_key: search_key.to_string(),
            ctx: ctx.clone(),
            policy: self.policy.clone(),
        };
        PageCursor::new(Arc::new(source), offset, self.limits.resolve(limit)?)
    }

    pub async fn search_payments(
        &self,
        plugin_name: &str,
        search_key: &str,
        offset: u64,
        limit: Option<u64>,
        ctx: &CallContext,
    ) -> OrchestratorResult<Page<ResultEnvelope>> {
        self.payments_cursor(plugin_name, search_key, offset, limit, ctx)?
            .page_at(offset)
            .await
    }

    pub async fn search_refunds(
        &self,
        plugin_name: &str,
        search_key: &str,
        offset: u64,
        limit: Option<u64>,
        ctx: &CallContext,
    ) -> OrchestratorResult<Page<ResultEnvelope>> {
        self.refunds_cursor(plugin_name, search_key, offset, limit, ctx)?
            .page_at(offset)
            .await
    }

    pub async fn search_payment_methods(
        &self,
        plugin_name: &str,
        search_key: &str,
        offset: u64,
        limit: Option<u64>,
        ctx: &CallContext,
    ) -> OrchestratorResult<Page<PaymentMethodDetail>> {
        self.payment_methods_cursor(plugin_name, search_key, offset, limit, ctx)?
            .page_at(offset)
            .await
    }

    fn record_cursor(
        &self,
        target: SearchTarget,
        plugin_name: &str,
        search_key: &str,
        offset: u64,
        limit: Option<u64>,
        ctx: &CallContext,
    ) -> OrchestratorResult<PageCursor<ResultEnvelope>> {
        let source = RecordSearch {
            adapter: self.registry.get(plugin_name)?,
            search_key: search_key.to_string(),
            ctx: ctx.clone(),
            policy: self.policy.clone(),
            target,
        };
        PageCursor::new(Arc::new(source), offset, self.limits.resolve(limit)?)
    }

    // ========================================================================
    // Payment methods
    // ========================================================================

    pub async fn add_payment_method(
        &self,
        account_id: Uuid,
        payment_method_id: Uuid,
        plugin_name: &str,
        props: PaymentMethodProps,
        set_default: bool,
        ctx: &CallContext,
    ) -> OrchestratorResult<PaymentMethodDescriptor> {
        let adapter = self.registry.get(plugin_name)?;
        // Held until the descriptor is stored
        let _reservation = self.directory.reserve(payment_method_id).await?;
        self.mutate(
            plugin_name,
            "add_payment_method",
            adapter.add_payment_method(account_id, payment_method_id, &props, set_default, ctx),
        )
        .await?;

        let mut descriptor = PaymentMethodDescriptor::new(account_id, payment_method_id, plugin_name);
        descriptor.external_payment_method_id = props.external_payment_method_id;
        descriptor.gateway_props = props.properties;
        descriptor.is_default = set_default;

        let stored = self.directory.upsert(descriptor).await;
        info!(%account_id, %payment_method_id, plugin = plugin_name, set_default, "Payment method added");
        Ok(stored)
    }

    pub async fn delete_payment_method(
        &self,
        account_id: Uuid,
        payment_method_id: Uuid,
        ctx: &CallContext,
    ) -> OrchestratorResult<PaymentMethodDescriptor> {
        let descriptor = match self.directory.get(payment_method_id).await {
            Some(d) if d.account_id == account_id => d,
            _ => return Err(OrchestratorError::PaymentMethodNotFound(payment_method_id)),
        };

        // Deactivated methods are already gone at the gateway
        if descriptor.is_active {
            let adapter = self.registry.get(&descriptor.plugin_name)?;
            self.mutate(
                &descriptor.plugin_name,
                "delete_payment_method",
                adapter.delete_payment_method(account_id, payment_method_id, ctx),
            )
            .await?;
        }

        let removed = self.directory.remove(account_id, payment_method_id).await?;
        info!(%account_id, %payment_method_id, "Payment method deleted");
        Ok(removed)
    }

    pub async fn get_payment_method_detail(
        &self,
        account_id: Uuid,
        payment_method_id: Uuid,
        ctx: &CallContext,
    ) -> OrchestratorResult<PaymentMethodDetail> {
        let descriptor = self.directory.find(account_id, payment_method_id).await?;
        let adapter = self.registry.get(&descriptor.plugin_name)?;
        let gateway = adapter.as_ref();
        self.read(&descriptor.plugin_name, "get_payment_method_detail", move || {
            gateway.get_payment_method_detail(account_id, payment_method_id, ctx)
        })
        .await
    }

    pub async fn set_default_payment_method(
        &self,
        account_id: Uuid,
        payment_method_id: Uuid,
        ctx: &CallContext,
    ) -> OrchestratorResult<PaymentMethodDescriptor> {
        let descriptor = self.directory.find(account_id, payment_method_id).await?;
        let adapter = self.registry.get(&descriptor.plugin_name)?;
        self.mutate(
            &descriptor.plugin_name,
            "set_default_payment_method",
            adapter.set_default_payment_method(account_id, payment_method_id, ctx),
        )
        .await?;
        self.directory.set_default(account_id, payment_method_id).await
    }

    /// The account's mirrored payment methods. With `refresh`, each plugin's own list
    /// is pulled first and mirrored: one named plugin, or every plugin the account
    /// already has methods with.
    pub async fn list_payment_methods(
        &self,
        account_id: Uuid,
        plugin_name: Option<&str>,
        refresh: bool,
        ctx: &CallContext,
    ) -> OrchestratorResult<Vec<PaymentMethodDescriptor>> {
        if refresh {
            let plugins = match plugin_name {
                Some(plugin) => vec![plugin.to_string()],
                None => self.directory.plugins_for(account_id).await,
            };

            for plugin in plugins {
                let adapter = self.registry.get(&plugin)?;
                let gateway = adapter.as_ref();
                let listed = self
                    .read(&plugin, "list_payment_methods", move || {
                        gateway.list_payment_methods(account_id, true, ctx)
                    })
                    .await;

                match listed {
                    Ok(reported) => {
                        self.directory.mirror(account_id, &plugin, &reported).await;
                    }
                    Err(OrchestratorError::Unsupported(_)) => {
                        debug!(%account_id, plugin = %plugin, "Plugin cannot list payment methods, keeping mirror");
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        let methods = self.directory.list(account_id).await;
        Ok(match plugin_name {
            Some(plugin) => methods.into_iter().filter(|m| m.plugin_name == plugin).collect(),
            None => methods,
        })
    }

    /// Push the mirrored active methods of one plugin back to it.
    pub async fn reset_payment_methods(
        &self,
        account_id: Uuid,
        plugin_name: &str,
        ctx: &CallContext,
    ) -> OrchestratorResult<Vec<PaymentMethodInfo>> {
        let adapter = self.registry.get(plugin_name)?;
        let methods = self.directory.active_infos(account_id, plugin_name).await;
        self.mutate(
            plugin_name,
            "reset_payment_methods",
            adapter.reset_payment_methods(account_id, &methods, ctx),
        )
        .await?;
        info!(%account_id, plugin = plugin_name, count = methods.len(), "Payment methods reset");
        Ok(methods)
    }

    // ========================================================================
    // Hosted pages and notifications
    // ========================================================================

    /// Build a redirect form with the named plugin, or the plugin of the account's
    /// default payment method.
    pub async fn build_hosted_page_descriptor(
        &self,
        account_id: Uuid,
        plugin_name: Option<&str>,
        fields: &HostedPageDescriptorFields,
        ctx: &CallContext,
    ) -> OrchestratorResult<HostedPageFormDescriptor> {
        let adapter = match plugin_name {
            Some(plugin) => self.registry.get(plugin)?,
            None => self.adapter_for_account(account_id, None).await?,
        };
        let gateway = adapter.as_ref();
        self.read(gateway.name(), "build_hosted_page_descriptor", move || {
            gateway.build_hosted_page_descriptor(account_id, fields, ctx)
        })
        .await
    }

    /// Hand a raw gateway callback to its plugin. Delivered once, never retried.
    pub async fn process_notification(
        &self,
        plugin_name: &str,
        notification: &str,
        ctx: &CallContext,
    ) -> OrchestratorResult<NormalizedNotification> {
        let adapter = self.registry.get(plugin_name)?;
        let normalized = self
            .mutate(
                plugin_name,
                "process_notification",
                adapter.process_notification(notification, ctx),
            )
            .await?;
        info!(
            plugin = plugin_name,
            gateway_reference_id = ?normalized.gateway_reference_id,
            status = ?normalized.status,
            "Gateway notification processed"
        );
        Ok(normalized)
    }

    // ========================================================================
    // Routing
    // ========================================================================

    async fn adapter_for_method(&self, payment_method_id: Uuid) -> OrchestratorResult<Arc<dyn PaymentAdapter>> {
        let plugin = self.directory.plugin_for(payment_method_id).await?;
        Ok(self.registry.get(&plugin)?)
    }

    async fn adapter_for_account(
        &self,
        account_id: Uuid,
        payment_method_id: Option<Uuid>,
    ) -> OrchestratorResult<Arc<dyn PaymentAdapter>> {
        let descriptor = match payment_method_id {
            Some(id) => self.directory.find(account_id, id).await?,
            None => self.directory.default_for(account_id).await.ok_or_else(|| {
                OrchestratorError::Validation(format!(
                    "account {} has no default payment method",
                    account_id
                ))
            })?,
        };
        Ok(self.registry.get(&descriptor.plugin_name)?)
    }

    async fn read<T, F, Fut>(&self, plugin: &str, operation: &str, call: F) -> OrchestratorResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AdapterResult<T>>,
    {
        let (result, attempts) = self.policy.retry_transient(call).await;
        resolve_outcome(plugin, operation, attempts, result)
    }

    async fn mutate<T, Fut>(&self, plugin: &str, operation: &str, call: Fut) -> OrchestratorResult<T>
    where
        Fut: Future<Output = AdapterResult<T>>,
    {
        resolve_outcome(plugin, operation, 1, self.policy.call(call).await)
    }
}

async fn invoke(
    adapter: &dyn PaymentAdapter,
    request: &OperationRequest,
    ctx: &CallContext,
) -> AdapterResult<ResultEnvelope> {
    match request.kind {
        OperationKind::Authorize => adapter.authorize(request, ctx).await,
        OperationKind::Capture => adapter.capture(request, ctx).await,
        OperationKind::Charge => adapter.charge(request, ctx).await,
        OperationKind::Void => adapter.void(request, ctx).await,
        OperationKind::Refund => adapter.refund(request, ctx).await,
    }
}

fn resolve_outcome<T>(
    plugin: &str,
    operation: &str,
    attempts: u32,
    result: AdapterResult<T>,
) -> OrchestratorResult<T> {
    match result {
        Ok(Outcome::Done(value)) => Ok(value),
        Ok(Outcome::Unsupported) => Err(OrchestratorError::unsupported(plugin, operation)),
        Err(GatewayError::Declined { code, message }) => {
            Err(OrchestratorError::BusinessDecline { code, message })
        }
        Err(GatewayError::Invalid(message)) => Err(OrchestratorError::Validation(message)),
        Err(GatewayError::Transport { message, .. }) => {
            Err(OrchestratorError::TransientTransport { attempts, message })
        }
    }
}

/// Hold an adapter envelope against the request it answers. Fills a missing currency
/// from the request; `Err` carries why the envelope cannot be trusted.
fn check_envelope(request: &OperationRequest, mut envelope: ResultEnvelope) -> Result<ResultEnvelope, String> {
    if envelope.status == OperationStatus::Undetermined {
        return Err("adapter reported an undetermined status".to_string());
    }
    if envelope.kind != request.kind {
        return Err(format!(
            "adapter answered {} for a {} request",
            envelope.kind, request.kind
        ));
    }

    match (envelope.currency, request.currency) {
        (Some(processed), Some(requested)) if processed != requested => {
            return Err(format!(
                "currency mismatch: requested {}, processed {}",
                requested, processed
            ));
        }
        (None, requested) => envelope.currency = requested,
        _ => {}
    }

    if envelope.amount_processed.is_sign_negative() && !envelope.amount_processed.is_zero() {
        return Err(format!("negative amount processed: {}", envelope.amount_processed));
    }
    if let Some(requested) = request.amount {
        if envelope.amount_processed > requested {
            return Err(format!(
                "processed {} exceeds requested {}",
                envelope.amount_processed, requested
            ));
        }
    }

    Ok(envelope)
}

/// First refund on the payment that carries exactly the requested amount and passes the
/// envelope checks.
fn matching_refund(request: &OperationRequest, refunds: Vec<ResultEnvelope>) -> Result<ResultEnvelope, String> {
    let listed = refunds.len();
    refunds
        .into_iter()
        .filter(|refund| Some(refund.amount_processed) == request.amount)
        .find_map(|refund| check_envelope(request, refund).ok())
        .ok_or_else(|| format!("none of {} listed refund(s) matches the request", listed))
}

#[derive(Debug, Clone, Copy)]
enum SearchTarget {
    Payments,
    Refunds,
}

impl SearchTarget {
    fn operation(&self) -> &'static str {
        match self {
            SearchTarget::Payments => "search_payments",
            SearchTarget::Refunds => "search_refunds",
        }
    }
}

struct RecordSearch {
    adapter: Arc<dyn PaymentAdapter>,
    search_key: String,
    ctx: CallContext,
    policy: RetryPolicy,
    target: SearchTarget,
}

#[async_trait]
impl PageSource<ResultEnvelope> for RecordSearch {
    async fn fetch(&self, offset: u64, limit: u64) -> OrchestratorResult<SearchPage<ResultEnvelope>> {
        let gateway = self.adapter.as_ref();
        let (key, ctx) = (self.search_key.as_str(), &self.ctx);
        let (result, attempts) = match self.target {
            SearchTarget::Payments => {
                self.policy
                    .retry_transient(move || gateway.search_payments(key, offset, limit, ctx))
                    .await
            }
            SearchTarget::Refunds => {
                self.policy
                    .retry_transient(move || gateway.search_refunds(key, offset, limit, ctx))
                    .await
            }
        };
        resolve_outcome(gateway.name(), self.target.operation(), attempts, result)
    }
}

struct PaymentMethodSearch {
    adapter: Arc<dyn PaymentAdapter>,
    search_key: String,
    ctx: CallContext,
    policy: RetryPolicy,
}

#[async_trait]
impl PageSource<PaymentMethodDetail> for PaymentMethodSearch {
    async fn fetch(&self, offset: u64, limit: u64) -> OrchestratorResult<SearchPage<PaymentMethodDetail>> {
        let gateway = self.adapter.as_ref();
        let (key, ctx) = (self.search_key.as_str(), &self.ctx);
        let (result, attempts) = self
            .policy
            .retry_transient(move || gateway.search_payment_methods(key, offset, limit, ctx))
            .await;
        resolve_outcome(gateway.name(), "search_payment_methods", attempts, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paybridge_core::Currency;
    use rust_decimal::Decimal;

    fn authorize(amount: i64) -> OperationRequest {
        OperationRequest::new(OperationKind::Authorize, "op-1").with_amount(Decimal::from(amount), Currency::Usd)
    }

    #[test]
    fn test_search_limits() {
        let limits = SearchLimits {
            default_limit: 20,
            max_limit: 100,
        };
        assert_eq!(limits.resolve(None).unwrap(), 20);
        assert_eq!(limits.resolve(Some(1000)).unwrap(), 100);
        assert!(limits.resolve(Some(0)).is_err());
    }

    #[test]
    fn test_matching_refund_requires_exact_amount() {
        let request = OperationRequest::new(OperationKind::Refund, "op-r").with_amount(Decimal::from(30), Currency::Usd);
        let listed = vec![
            ResultEnvelope::success(OperationKind::Refund, "rfd-1", Decimal::from(20), Some(Currency::Usd)),
            ResultEnvelope::success(OperationKind::Refund, "rfd-2", Decimal::from(30), Some(Currency::Eur)),
            ResultEnvelope::success(OperationKind::Refund, "rfd-3", Decimal::from(30), Some(Currency::Usd)),
        ];
        let matched = matching_refund(&request, listed).unwrap();
        assert_eq!(matched.gateway_reference_id.as_deref(), Some("rfd-3"));

        assert!(matching_refund(&request, Vec::new()).is_err());
    }

    #[test]
    fn test_check_envelope_fills_currency() {
        let request = authorize(100);
        let envelope = ResultEnvelope::success(OperationKind::Authorize, "g-1", Decimal::from(100), None);
        let checked = check_envelope(&request, envelope).unwrap();
        assert_eq!(checked.currency, Some(Currency::Usd));
    }

    #[test]
    fn test_check_envelope_rejects_untrustworthy_answers() {
        let request = authorize(100);

        let over = ResultEnvelope::success(OperationKind::Authorize, "g-1", Decimal::from(101), Some(Currency::Usd));
        assert!(check_envelope(&request, over).is_err());

        let wrong_currency =
            ResultEnvelope::success(OperationKind::Authorize, "g-1", Decimal::from(100), Some(Currency::Eur));
        assert!(check_envelope(&request, wrong_currency).is_err());

        let wrong_kind = ResultEnvelope::success(OperationKind::Capture, "g-1", Decimal::from(100), Some(Currency::Usd));
        assert!(check_envelope(&request, wrong_kind).is_err());

        let undetermined = ResultEnvelope::undetermined(&request, "adapter gave up");
        assert!(check_envelope(&request, undetermined).is_err());

        let partial = ResultEnvelope::success(OperationKind::Authorize, "g-1", Decimal::from(60), Some(Currency::Usd));
        assert!(check_envelope(&request, partial).is_ok());
    }

    #[test]
    fn test_resolve_outcome_classification() {
        let unsupported: AdapterResult<()> = Ok(Outcome::Unsupported);
        assert!(matches!(
            resolve_outcome("sandbox", "void", 1, unsupported),
            Err(OrchestratorError::Unsupported(_))
        ));

        let transport: AdapterResult<()> = Err(GatewayError::timeout("slow"));
        assert!(matches!(
            resolve_outcome("sandbox", "get_payment_info", 3, transport),
            Err(OrchestratorError::TransientTransport { attempts: 3, .. })
        ));
    }
}
