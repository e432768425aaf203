use async_trait::async_trait;
use futures_util::TryStreamExt;
use paybridge_core::{
    AdapterResult, CallContext, Currency, GatewayError, OperationKind, OperationRequest,
    OperationStatus, Outcome, PaymentAdapter, PaymentMethodDescriptor, ResultEnvelope, SearchPage,
};
use paybridge_orchestrator::{
    AdapterRegistry, OperationOrchestrator, OrchestratorError, ReconcileOutcome, RetryPolicy,
};
use paybridge_shared::SettlementOutcome;
use paybridge_store::{IdempotencyLedger, LedgerState, MemoryLedger};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
enum Behavior {
    Approve,
    Decline,
    TimeoutAlways,
    /// Connection resets for the first N calls, then approval
    TransientThen(u32),
    Slow(Duration),
    Overcharge,
}

/// Gateway stand-in that counts every money-moving call.
struct SpyAdapter {
    calls: AtomicU32,
    behavior: Mutex<Behavior>,
    last_request: Mutex<Option<OperationRequest>>,
    history: Vec<ResultEnvelope>,
}

impl SpyAdapter {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            behavior: Mutex::new(behavior),
            last_request: Mutex::new(None),
            history: Vec::new(),
        })
    }

    fn with_history(count: usize) -> Arc<Self> {
        let history = (0..count)
            .map(|i| {
                ResultEnvelope::success(OperationKind::Charge, format!("g-{}", i), Decimal::from(10), Some(Currency::Usd))
            })
            .collect();
        Arc::new(Self {
            calls: AtomicU32::new(0),
            behavior: Mutex::new(Behavior::Approve),
            last_request: Mutex::new(None),
            history,
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    fn approval(request: &OperationRequest) -> ResultEnvelope {
        ResultEnvelope::success(request.kind, "g-1", request.amount.unwrap_or_default(), request.currency)
    }

    async fn respond(&self, request: &OperationRequest) -> AdapterResult<ResultEnvelope> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_request.lock().unwrap() = Some(request.clone());
        let behavior = *self.behavior.lock().unwrap();

        match behavior {
            Behavior::Approve => Ok(Outcome::Done(Self::approval(request))),
            Behavior::Decline => Err(GatewayError::declined(Some("05"), "do not honor")),
            Behavior::TimeoutAlways => Err(GatewayError::timeout("gateway timed out")),
            Behavior::TransientThen(failures) if call <= failures => {
                Err(GatewayError::connection_reset("connection reset by peer"))
            }
            Behavior::TransientThen(_) => Ok(Outcome::Done(Self::approval(request))),
            Behavior::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(Outcome::Done(Self::approval(request)))
            }
            Behavior::Overcharge => {
                let mut envelope = Self::approval(request);
                envelope.amount_processed += Decimal::ONE;
                Ok(Outcome::Done(envelope))
            }
        }
    }
}

#[async_trait]
impl PaymentAdapter for SpyAdapter {
    fn name(&self) -> &str {
        "spy"
    }

    async fn authorize(&self, request: &OperationRequest, _ctx: &CallContext) -> AdapterResult<ResultEnvelope> {
        self.respond(request).await
    }

    async fn capture(&self, request: &OperationRequest, _ctx: &CallContext) -> AdapterResult<ResultEnvelope> {
        self.respond(request).await
    }

    async fn charge(&self, request: &OperationRequest, _ctx: &CallContext) -> AdapterResult<ResultEnvelope> {
        self.respond(request).await
    }

    async fn get_payment_info(
        &self,
        _account_id: Uuid,
        _payment_id: Uuid,
        _ctx: &CallContext,
    ) -> AdapterResult<ResultEnvelope> {
        let behavior = *self.behavior.lock().unwrap();
        let last = self.last_request.lock().unwrap().clone();
        match (behavior, last) {
            (Behavior::Approve, Some(request)) => Ok(Outcome::Done(Self::approval(&request))),
            _ => Err(GatewayError::timeout("gateway timed out")),
        }
    }

    async fn search_payments(
        &self,
        _search_key: &str,
        offset: u64,
        limit: u64,
        _ctx: &CallContext,
    ) -> AdapterResult<SearchPage<ResultEnvelope>> {
        Ok(Outcome::Done(SearchPage::from_slice(&self.history, offset, limit)))
    }
}

struct Fixture {
    orchestrator: OperationOrchestrator,
    ledger: Arc<MemoryLedger>,
    adapter: Arc<SpyAdapter>,
    account_id: Uuid,
    payment_method_id: Uuid,
    ctx: CallContext,
}

impl Fixture {
    async fn new(adapter: Arc<SpyAdapter>, policy: RetryPolicy) -> Self {
        let ledger = Arc::new(MemoryLedger::new());
        let registry = AdapterRegistry::new().with_adapter(adapter.clone()).unwrap();
        let orchestrator = OperationOrchestrator::new(ledger.clone(), registry).with_retry_policy(policy);

        let account_id = Uuid::new_v4();
        let payment_method_id = Uuid::new_v4();
        let mut descriptor = PaymentMethodDescriptor::new(account_id, payment_method_id, "spy");
        descriptor.is_default = true;
        orchestrator.directory().upsert(descriptor).await;

        Self {
            orchestrator,
            ledger,
            adapter,
            account_id,
            payment_method_id,
            ctx: CallContext::new(Uuid::new_v4()),
        }
    }

    fn request(&self, kind: OperationKind, operation_id: &str, amount: i64) -> OperationRequest {
        OperationRequest::new(kind, operation_id)
            .with_ids(self.account_id, Uuid::new_v4(), self.payment_method_id)
            .with_amount(Decimal::from(amount), Currency::Usd)
    }
}

#[tokio::test]
async fn test_authorize_twice_reaches_gateway_once() {
    let fx = Fixture::new(SpyAdapter::new(Behavior::Approve), RetryPolicy::immediate(3)).await;
    let request = fx.request(OperationKind::Authorize, "op-1", 100);

    let first = fx.orchestrator.authorize(request.clone(), &fx.ctx).await.unwrap();
    assert_eq!(first.status, OperationStatus::Success);
    assert_eq!(first.gateway_reference_id.as_deref(), Some("g-1"));
    assert_eq!(first.amount_processed, Decimal::from(100));
    assert_eq!(first.currency, Some(Currency::Usd));

    let second = fx.orchestrator.authorize(request, &fx.ctx).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(fx.adapter.calls(), 1);
}

#[tokio::test]
async fn test_negative_amount_never_reaches_gateway() {
    let fx = Fixture::new(SpyAdapter::new(Behavior::Approve), RetryPolicy::immediate(3)).await;
    let request = fx.request(OperationKind::Charge, "op-neg", -5);

    let result = fx.orchestrator.charge(request, &fx.ctx).await;
    assert!(matches!(result, Err(OrchestratorError::Validation(_))));
    assert_eq!(fx.adapter.calls(), 0);
    assert!(fx.ledger.get("op-neg").await.unwrap().is_none());
}

#[tokio::test]
async fn test_timeouts_exhaust_attempts_and_park_operation() {
    let fx = Fixture::new(SpyAdapter::new(Behavior::TimeoutAlways), RetryPolicy::immediate(3)).await;
    let request = fx.request(OperationKind::Authorize, "op-timeout", 100);

    let result = fx.orchestrator.authorize(request.clone(), &fx.ctx).await;
    match result {
        Err(OrchestratorError::Undetermined { operation_id, envelope, .. }) => {
            assert_eq!(operation_id, "op-timeout");
            assert_eq!(envelope.status, OperationStatus::Undetermined);
        }
        other => panic!("expected undetermined, got {:?}", other),
    }
    assert_eq!(fx.adapter.calls(), 3);

    let record = fx.orchestrator.operation_record("op-timeout").await.unwrap();
    assert_eq!(record.state, LedgerState::InFlight);
    assert_eq!(record.attempts, 3);
    assert_eq!(record.plugin_name.as_deref(), Some("spy"));

    // A retry with the same key must not dispatch again
    let again = fx.orchestrator.authorize(request, &fx.ctx).await;
    assert!(matches!(again, Err(OrchestratorError::ConcurrentOperation(_))));
    assert_eq!(fx.adapter.calls(), 3);

    let parked = fx.orchestrator.in_flight_operations().await.unwrap();
    assert_eq!(parked.len(), 1);
}

#[tokio::test]
async fn test_hanging_gateway_is_cut_by_call_timeout() {
    let policy = RetryPolicy::immediate(2).with_call_timeout(Duration::from_millis(20));
    let fx = Fixture::new(SpyAdapter::new(Behavior::Slow(Duration::from_millis(500))), policy).await;
    let request = fx.request(OperationKind::Charge, "op-hang", 10);

    let result = fx.orchestrator.charge(request, &fx.ctx).await;
    assert!(matches!(result, Err(OrchestratorError::Undetermined { .. })));
    assert_eq!(fx.adapter.calls(), 2);
}

#[tokio::test]
async fn test_decline_is_final_and_replayed() {
    let fx = Fixture::new(SpyAdapter::new(Behavior::Decline), RetryPolicy::immediate(3)).await;
    let request = fx.request(OperationKind::Charge, "op-decline", 20);

    for _ in 0..2 {
        match fx.orchestrator.charge(request.clone(), &fx.ctx).await {
            Err(OrchestratorError::BusinessDecline { code, message }) => {
                assert_eq!(code.as_deref(), Some("05"));
                assert_eq!(message, "do not honor");
            }
            other => panic!("expected decline, got {:?}", other),
        }
    }
    assert_eq!(fx.adapter.calls(), 1);

    let record = fx.orchestrator.operation_record("op-decline").await.unwrap();
    assert_eq!(record.state, LedgerState::Failed);
}

#[tokio::test]
async fn test_transient_failures_then_success() {
    let fx = Fixture::new(SpyAdapter::new(Behavior::TransientThen(2)), RetryPolicy::immediate(3)).await;
    let request = fx.request(OperationKind::Authorize, "op-flaky", 40);

    let envelope = fx.orchestrator.authorize(request, &fx.ctx).await.unwrap();
    assert_eq!(envelope.status, OperationStatus::Success);
    assert_eq!(fx.adapter.calls(), 3);

    let record = fx.orchestrator.operation_record("op-flaky").await.unwrap();
    assert_eq!(record.state, LedgerState::Completed);
    assert_eq!(record.attempts, 3);
}

#[tokio::test]
async fn test_unsupported_operation_is_typed() {
    let fx = Fixture::new(SpyAdapter::new(Behavior::Approve), RetryPolicy::immediate(3)).await;
    let request = OperationRequest::new(OperationKind::Void, "op-void").with_ids(
        fx.account_id,
        Uuid::new_v4(),
        fx.payment_method_id,
    );

    let result = fx.orchestrator.void(request.clone(), &fx.ctx).await;
    assert!(matches!(result, Err(OrchestratorError::Unsupported(_))));

    let replay = fx.orchestrator.void(request, &fx.ctx).await;
    assert!(matches!(replay, Err(OrchestratorError::Unsupported(_))));
}

#[tokio::test]
async fn test_reused_operation_id_with_other_payload_rejected() {
    let fx = Fixture::new(SpyAdapter::new(Behavior::Approve), RetryPolicy::immediate(3)).await;
    let original = fx.request(OperationKind::Authorize, "op-reuse", 100);
    fx.orchestrator.authorize(original.clone(), &fx.ctx).await.unwrap();

    let mut altered = original;
    altered.amount = Some(Decimal::from(200));
    let result = fx.orchestrator.authorize(altered, &fx.ctx).await;
    assert!(matches!(result, Err(OrchestratorError::IdempotencyKeyReused(_))));
    assert_eq!(fx.adapter.calls(), 1);
}

#[tokio::test]
async fn test_mismatched_kind_rejected() {
    let fx = Fixture::new(SpyAdapter::new(Behavior::Approve), RetryPolicy::immediate(3)).await;
    let request = fx.request(OperationKind::Refund, "op-kind", 5);

    let result = fx.orchestrator.capture(request, &fx.ctx).await;
    assert!(matches!(result, Err(OrchestratorError::Validation(_))));
    assert_eq!(fx.adapter.calls(), 0);
}

#[tokio::test]
async fn test_concurrent_duplicate_is_rejected() {
    let fx = Fixture::new(
        SpyAdapter::new(Behavior::Slow(Duration::from_millis(200))),
        RetryPolicy::immediate(3),
    )
    .await;
    let request = fx.request(OperationKind::Charge, "op-race", 15);

    let first = {
        let orchestrator = fx.orchestrator.clone();
        let request = request.clone();
        let ctx = fx.ctx.clone();
        tokio::spawn(async move { orchestrator.charge(request, &ctx).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = fx.orchestrator.charge(request, &fx.ctx).await;
    assert!(matches!(second, Err(OrchestratorError::ConcurrentOperation(_))));

    assert!(first.await.unwrap().is_ok());
    assert_eq!(fx.adapter.calls(), 1);
}

#[tokio::test]
async fn test_dropped_caller_does_not_abandon_attempt() {
    let fx = Fixture::new(
        SpyAdapter::new(Behavior::Slow(Duration::from_millis(100))),
        RetryPolicy::immediate(3),
    )
    .await;
    let request = fx.request(OperationKind::Authorize, "op-cancel", 30);

    let waited = tokio::time::timeout(
        Duration::from_millis(10),
        fx.orchestrator.authorize(request, &fx.ctx),
    )
    .await;
    assert!(waited.is_err());

    tokio::time::sleep(Duration::from_millis(400)).await;
    let record = fx.orchestrator.operation_record("op-cancel").await.unwrap();
    assert_eq!(record.state, LedgerState::Completed);
    assert_eq!(fx.adapter.calls(), 1);
}

#[tokio::test]
async fn test_reconcile_resolves_parked_operation() {
    let fx = Fixture::new(SpyAdapter::new(Behavior::TimeoutAlways), RetryPolicy::immediate(2)).await;
    let request = fx.request(OperationKind::Authorize, "op-recon", 100);
    assert!(fx.orchestrator.authorize(request.clone(), &fx.ctx).await.is_err());

    // Gateway still silent: nothing changes
    let outcome = fx.orchestrator.reconcile("op-recon", &fx.ctx).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::StillInFlight(_)));

    fx.adapter.set_behavior(Behavior::Approve);
    let mut events = fx.orchestrator.subscribe();
    match fx.orchestrator.reconcile("op-recon", &fx.ctx).await.unwrap() {
        ReconcileOutcome::Resolved(record) => assert_eq!(record.state, LedgerState::Completed),
        other => panic!("expected resolution, got {:?}", other),
    }
    assert_eq!(events.recv().await.unwrap().outcome, SettlementOutcome::Reconciled);

    let calls_before = fx.adapter.calls();
    let replay = fx.orchestrator.authorize(request, &fx.ctx).await.unwrap();
    assert_eq!(replay.gateway_reference_id.as_deref(), Some("g-1"));
    assert_eq!(fx.adapter.calls(), calls_before);

    let again = fx.orchestrator.reconcile("op-recon", &fx.ctx).await.unwrap();
    assert!(matches!(again, ReconcileOutcome::AlreadySettled(_)));
}

/// Applies every refund, then loses the response. Payment info reports the original charge.
struct LossyRefundGateway {
    refunds: Mutex<Vec<ResultEnvelope>>,
}

#[async_trait]
impl PaymentAdapter for LossyRefundGateway {
    fn name(&self) -> &str {
        "lossy"
    }

    async fn charge(&self, request: &OperationRequest, _ctx: &CallContext) -> AdapterResult<ResultEnvelope> {
        Ok(Outcome::Done(SpyAdapter::approval(request)))
    }

    async fn refund(&self, request: &OperationRequest, _ctx: &CallContext) -> AdapterResult<ResultEnvelope> {
        let mut refunds = self.refunds.lock().unwrap();
        let reference = format!("rfd-{}", refunds.len() + 1);
        refunds.push(ResultEnvelope::success(
            OperationKind::Refund,
            reference,
            request.amount.unwrap_or_default(),
            request.currency,
        ));
        Err(GatewayError::timeout("response lost"))
    }

    async fn get_payment_info(
        &self,
        _account_id: Uuid,
        _payment_id: Uuid,
        _ctx: &CallContext,
    ) -> AdapterResult<ResultEnvelope> {
        Ok(Outcome::Done(ResultEnvelope::success(
            OperationKind::Charge,
            "g-1",
            Decimal::from(100),
            Some(Currency::Usd),
        )))
    }

    async fn get_refund_info(
        &self,
        _account_id: Uuid,
        _payment_id: Uuid,
        _ctx: &CallContext,
    ) -> AdapterResult<Vec<ResultEnvelope>> {
        Ok(Outcome::Done(self.refunds.lock().unwrap().clone()))
    }
}

#[tokio::test]
async fn test_reconcile_resolves_refund_from_refund_info() {
    let gateway = Arc::new(LossyRefundGateway { refunds: Mutex::new(Vec::new()) });
    let registry = AdapterRegistry::new().with_adapter(gateway.clone()).unwrap();
    let orchestrator = OperationOrchestrator::new(Arc::new(MemoryLedger::new()), registry)
        .with_retry_policy(RetryPolicy::immediate(2));
    let ctx = CallContext::new(Uuid::new_v4());

    let (account_id, payment_method_id) = (Uuid::new_v4(), Uuid::new_v4());
    orchestrator
        .directory()
        .upsert(PaymentMethodDescriptor::new(account_id, payment_method_id, "lossy"))
        .await;

    let refund = OperationRequest::new(OperationKind::Refund, "op-refund")
        .with_ids(account_id, Uuid::new_v4(), payment_method_id)
        .with_amount(Decimal::from(30), Currency::Usd);
    let result = orchestrator.refund(refund.clone(), &ctx).await;
    assert!(matches!(result, Err(OrchestratorError::Undetermined { .. })));
    assert_eq!(gateway.refunds.lock().unwrap().len(), 2);

    match orchestrator.reconcile("op-refund", &ctx).await.unwrap() {
        ReconcileOutcome::Resolved(record) => {
            assert_eq!(record.state, LedgerState::Completed);
            let envelope = record.result_envelope.unwrap();
            assert_eq!(envelope.kind, OperationKind::Refund);
            assert_eq!(envelope.amount_processed, Decimal::from(30));
        }
        other => panic!("expected resolution, got {:?}", other),
    }

    // A refund the gateway never listed stays parked
    let unlisted = OperationRequest::new(OperationKind::Refund, "op-refund-2")
        .with_ids(account_id, refund.payment_id, payment_method_id)
        .with_amount(Decimal::from(45), Currency::Usd);
    gateway.refunds.lock().unwrap().clear();
    assert!(orchestrator.refund(unlisted, &ctx).await.is_err());
    gateway.refunds.lock().unwrap().clear();
    let outcome = orchestrator.reconcile("op-refund-2", &ctx).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::StillInFlight(_)));
}

#[tokio::test]
async fn test_unknown_payment_method_releases_operation_id() {
    let fx = Fixture::new(SpyAdapter::new(Behavior::Approve), RetryPolicy::immediate(3)).await;
    let unknown_method = Uuid::new_v4();
    let request = OperationRequest::new(OperationKind::Charge, "op-unrouted")
        .with_ids(fx.account_id, Uuid::new_v4(), unknown_method)
        .with_amount(Decimal::from(5), Currency::Usd);

    let result = fx.orchestrator.charge(request.clone(), &fx.ctx).await;
    assert!(matches!(result, Err(OrchestratorError::PaymentMethodNotFound(id)) if id == unknown_method));
    assert!(fx.ledger.get("op-unrouted").await.unwrap().is_none());

    fx.orchestrator
        .directory()
        .upsert(PaymentMethodDescriptor::new(fx.account_id, unknown_method, "spy"))
        .await;
    assert!(fx.orchestrator.charge(request, &fx.ctx).await.is_ok());
}

#[tokio::test]
async fn test_untrustworthy_envelope_parks_operation() {
    let fx = Fixture::new(SpyAdapter::new(Behavior::Overcharge), RetryPolicy::immediate(3)).await;
    let request = fx.request(OperationKind::Capture, "op-over", 50);

    let result = fx.orchestrator.capture(request, &fx.ctx).await;
    assert!(matches!(result, Err(OrchestratorError::Undetermined { .. })));
    assert_eq!(fx.adapter.calls(), 1);

    let record = fx.orchestrator.operation_record("op-over").await.unwrap();
    assert_eq!(record.state, LedgerState::InFlight);
}

#[tokio::test]
async fn test_purge_only_settled_operations() {
    let fx = Fixture::new(SpyAdapter::new(Behavior::TimeoutAlways), RetryPolicy::immediate(1)).await;
    let parked = fx.request(OperationKind::Charge, "op-parked", 5);
    assert!(fx.orchestrator.charge(parked, &fx.ctx).await.is_err());
    assert!(matches!(
        fx.orchestrator.purge_operation("op-parked").await,
        Err(OrchestratorError::Validation(_))
    ));

    fx.adapter.set_behavior(Behavior::Approve);
    let done = fx.request(OperationKind::Charge, "op-done", 5);
    fx.orchestrator.charge(done, &fx.ctx).await.unwrap();
    fx.orchestrator.purge_operation("op-done").await.unwrap();
    assert!(matches!(
        fx.orchestrator.operation_record("op-done").await,
        Err(OrchestratorError::OperationNotFound(_))
    ));
}

#[tokio::test]
async fn test_settlement_event_published() {
    let fx = Fixture::new(SpyAdapter::new(Behavior::Approve), RetryPolicy::immediate(3)).await;
    let mut events = fx.orchestrator.subscribe();

    let request = fx.request(OperationKind::Charge, "op-event", 12);
    fx.orchestrator.charge(request, &fx.ctx).await.unwrap();

    let event = events.recv().await.unwrap();
    assert_eq!(event.operation_id, "op-event");
    assert_eq!(event.tenant_id, fx.ctx.tenant_id);
    assert_eq!(event.outcome, SettlementOutcome::Completed);
    assert_eq!(event.amount, Some(Decimal::from(12)));
    assert_eq!(event.attempts, 1);
}

#[tokio::test]
async fn test_search_pages_of_ten() {
    let fx = Fixture::new(SpyAdapter::with_history(25), RetryPolicy::immediate(3)).await;

    let mut cursor = fx
        .orchestrator
        .payments_cursor("spy", "*", 0, Some(10), &fx.ctx)
        .unwrap();
    let mut pages = Vec::new();
    while let Some(page) = cursor.next_page().await.unwrap() {
        pages.push((page.items.len(), page.has_more));
    }
    assert_eq!(pages, vec![(10, true), (10, true), (5, false)]);

    let streamed: Vec<ResultEnvelope> = fx
        .orchestrator
        .payments_cursor("spy", "*", 0, Some(10), &fx.ctx)
        .unwrap()
        .into_stream()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(streamed.len(), 25);

    let page = fx.orchestrator.search_payments("spy", "*", 20, Some(10), &fx.ctx).await.unwrap();
    assert_eq!(page.items.len(), 5);
    assert!(!page.has_more);

    assert!(matches!(
        fx.orchestrator.search_payments("spy", "*", 0, Some(0), &fx.ctx).await,
        Err(OrchestratorError::Validation(_))
    ));
    assert!(matches!(
        fx.orchestrator.search_refunds("spy", "*", 0, None, &fx.ctx).await,
        Err(OrchestratorError::Unsupported(_))
    ));
    assert!(matches!(
        fx.orchestrator.search_payments("nope", "*", 0, None, &fx.ctx).await,
        Err(OrchestratorError::AdapterNotFound(_))
    ));
}
