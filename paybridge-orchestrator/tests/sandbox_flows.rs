use paybridge_core::{
    CallContext, Currency, HostedPageDescriptorFields, OperationKind, OperationRequest,
    OperationStatus, PaymentMethodProps,
};
use paybridge_orchestrator::{
    AdapterRegistry, OperationOrchestrator, OrchestratorError, RetryPolicy, SandboxAdapter,
};
use paybridge_store::MemoryLedger;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

fn orchestrator() -> OperationOrchestrator {
    let registry = AdapterRegistry::new()
        .with_adapter(Arc::new(SandboxAdapter::new("sandbox")))
        .unwrap();
    OperationOrchestrator::new(Arc::new(MemoryLedger::new()), registry)
        .with_retry_policy(RetryPolicy::immediate(3))
}

fn request(kind: OperationKind, account: Uuid, payment: Uuid, method: Uuid, cents: i64) -> OperationRequest {
    OperationRequest::new(kind, Uuid::new_v4().to_string())
        .with_ids(account, payment, method)
        .with_amount(Decimal::new(cents, 2), Currency::Eur)
}

#[tokio::test]
async fn test_payment_lifecycle_through_sandbox() {
    let orchestrator = orchestrator();
    let ctx = CallContext::new(Uuid::new_v4());
    let (account, payment, method) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let mut properties = BTreeMap::new();
    properties.insert("card_brand".to_string(), "visa".to_string());
    let props = PaymentMethodProps {
        external_payment_method_id: Some("tok_visa".to_string()),
        properties,
    };
    let descriptor = orchestrator
        .add_payment_method(account, method, "sandbox", props, true, &ctx)
        .await
        .unwrap();
    assert!(descriptor.is_default);

    let auth = orchestrator
        .authorize(request(OperationKind::Authorize, account, payment, method, 10000), &ctx)
        .await
        .unwrap();
    assert_eq!(auth.status, OperationStatus::Success);

    orchestrator
        .capture(request(OperationKind::Capture, account, payment, method, 10000), &ctx)
        .await
        .unwrap();
    let refund = orchestrator
        .refund(request(OperationKind::Refund, account, payment, method, 3000), &ctx)
        .await
        .unwrap();
    assert_eq!(refund.amount_processed, Decimal::new(3000, 2));

    let info = orchestrator.get_payment_info(account, payment, None, &ctx).await.unwrap();
    assert_eq!(info.kind, OperationKind::Refund);

    let refunds = orchestrator.get_refund_info(account, payment, Some(method), &ctx).await.unwrap();
    assert_eq!(refunds.len(), 1);

    let over_refund = orchestrator
        .refund(request(OperationKind::Refund, account, payment, method, 9000), &ctx)
        .await;
    assert!(matches!(over_refund, Err(OrchestratorError::BusinessDecline { .. })));

    let page = orchestrator
        .search_payments("sandbox", &account.to_string(), 0, None, &ctx)
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
}

#[tokio::test]
async fn test_sandbox_decline_and_timeout_amounts() {
    let orchestrator = orchestrator();
    let ctx = CallContext::new(Uuid::new_v4());
    let (account, method) = (Uuid::new_v4(), Uuid::new_v4());
    orchestrator
        .add_payment_method(account, method, "sandbox", PaymentMethodProps::default(), true, &ctx)
        .await
        .unwrap();

    let declined = orchestrator
        .charge(request(OperationKind::Charge, account, Uuid::new_v4(), method, 1051), &ctx)
        .await;
    assert!(matches!(declined, Err(OrchestratorError::BusinessDecline { .. })));

    let unknown = orchestrator
        .charge(request(OperationKind::Charge, account, Uuid::new_v4(), method, 1091), &ctx)
        .await;
    assert!(matches!(unknown, Err(OrchestratorError::Undetermined { .. })));
}

#[tokio::test]
async fn test_payment_method_management() {
    let orchestrator = orchestrator();
    let ctx = CallContext::new(Uuid::new_v4());
    let account = Uuid::new_v4();
    let (first, second) = (Uuid::new_v4(), Uuid::new_v4());

    orchestrator
        .add_payment_method(account, first, "sandbox", PaymentMethodProps::default(), true, &ctx)
        .await
        .unwrap();
    orchestrator
        .add_payment_method(account, second, "sandbox", PaymentMethodProps::default(), false, &ctx)
        .await
        .unwrap();

    let duplicate = orchestrator
        .add_payment_method(account, second, "sandbox", PaymentMethodProps::default(), false, &ctx)
        .await;
    assert!(matches!(duplicate, Err(OrchestratorError::Validation(_))));

    orchestrator.set_default_payment_method(account, second, &ctx).await.unwrap();
    let listed = orchestrator.list_payment_methods(account, None, true, &ctx).await.unwrap();
    assert_eq!(listed.len(), 2);
    let defaults: Vec<Uuid> = listed.iter().filter(|m| m.is_default).map(|m| m.payment_method_id).collect();
    assert_eq!(defaults, vec![second]);

    let detail = orchestrator.get_payment_method_detail(account, second, &ctx).await.unwrap();
    assert!(detail.is_default);

    orchestrator.delete_payment_method(account, first, &ctx).await.unwrap();
    assert!(matches!(
        orchestrator.get_payment_method_detail(account, first, &ctx).await,
        Err(OrchestratorError::PaymentMethodNotFound(_))
    ));

    let pushed = orchestrator.reset_payment_methods(account, "sandbox", &ctx).await.unwrap();
    assert_eq!(pushed.len(), 1);

    let page = orchestrator
        .search_payment_methods("sandbox", "*", 0, Some(10), &ctx)
        .await
        .unwrap();
    assert_eq!(page.total_count, Some(1));
}

#[tokio::test]
async fn test_hosted_page_and_notification() {
    let orchestrator = orchestrator();
    let ctx = CallContext::new(Uuid::new_v4());
    let (account, method) = (Uuid::new_v4(), Uuid::new_v4());

    let fields = HostedPageDescriptorFields::builder()
        .amount(Decimal::new(4200, 2), Currency::Eur)
        .order("order-1")
        .build();

    // No default payment method and no plugin named
    assert!(matches!(
        orchestrator.build_hosted_page_descriptor(account, None, &fields, &ctx).await,
        Err(OrchestratorError::Validation(_))
    ));

    orchestrator
        .add_payment_method(account, method, "sandbox", PaymentMethodProps::default(), true, &ctx)
        .await
        .unwrap();
    let form = orchestrator
        .build_hosted_page_descriptor(account, None, &fields, &ctx)
        .await
        .unwrap();
    assert_eq!(form.form_fields.get("amount").map(String::as_str), Some("42.00"));

    let payment = Uuid::new_v4();
    let auth = orchestrator
        .authorize(request(OperationKind::Authorize, account, payment, method, 4200), &ctx)
        .await
        .unwrap();
    let raw = format!(
        r#"{{"reference": "{}", "status": "SUCCESS"}}"#,
        auth.gateway_reference_id.unwrap()
    );
    let notification = orchestrator.process_notification("sandbox", &raw, &ctx).await.unwrap();
    assert_eq!(notification.payment_id, Some(payment));

    assert!(matches!(
        orchestrator.process_notification("sandbox", "garbage", &ctx).await,
        Err(OrchestratorError::Validation(_))
    ));
}

#[tokio::test]
async fn test_concurrent_adds_of_one_method() {
    let orchestrator = orchestrator();
    let ctx = CallContext::new(Uuid::new_v4());
    let (account, method) = (Uuid::new_v4(), Uuid::new_v4());

    let (a, b) = tokio::join!(
        orchestrator.add_payment_method(account, method, "sandbox", PaymentMethodProps::default(), true, &ctx),
        orchestrator.add_payment_method(account, method, "sandbox", PaymentMethodProps::default(), false, &ctx),
    );
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(OrchestratorError::Validation(_)))));

    let listed = orchestrator
        .list_payment_methods(account, Some("sandbox"), true, &ctx)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
}
