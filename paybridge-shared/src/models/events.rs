use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal state reached by a money-moving operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementOutcome {
    Completed,
    Failed,
    Undetermined,
    Reconciled,
}

/// Audit event emitted whenever the idempotency ledger settles an operation.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OperationSettledEvent {
    pub operation_id: String,
    pub tenant_id: Uuid,
    pub kind: String,
    pub plugin_name: Option<String>,
    pub outcome: SettlementOutcome,
    pub gateway_reference_id: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub attempts: u32,
    pub timestamp: i64,
}

impl OperationSettledEvent {
    /// Kafka-style partition key: all events of one operation stay ordered.
    pub fn key(&self) -> String {
        format!("{}:{}", self.tenant_id, self.operation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&SettlementOutcome::Undetermined).unwrap();
        assert_eq!(json, "\"UNDETERMINED\"");
    }

    #[test]
    fn test_event_key_is_tenant_scoped() {
        let tenant_id = Uuid::new_v4();
        let event = OperationSettledEvent {
            operation_id: "op-1".to_string(),
            tenant_id,
            kind: "AUTHORIZE".to_string(),
            plugin_name: Some("sandbox".to_string()),
            outcome: SettlementOutcome::Completed,
            gateway_reference_id: Some("g-1".to_string()),
            amount: Some(Decimal::from(100)),
            currency: Some("USD".to_string()),
            attempts: 1,
            timestamp: 0,
        };
        assert_eq!(event.key(), format!("{}:op-1", tenant_id));
    }
}
