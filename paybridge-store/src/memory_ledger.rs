use async_trait::async_trait;
use paybridge_core::{OperationRequest, ResultEnvelope};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::ledger::{
    IdempotencyLedger, IdempotencyRecord, LedgerDecision, LedgerError, LedgerFailure, LedgerResult,
    LedgerState,
};

type Entry = Arc<Mutex<IdempotencyRecord>>;

/// In-process ledger.
///
/// The map lock is only held to look up or insert an entry. State transitions take
/// the entry's own mutex, so unrelated operation ids never wait on each other.
#[derive(Default)]
pub struct MemoryLedger {
    records: RwLock<HashMap<String, Entry>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, operation_id: &str) -> LedgerResult<Entry> {
        self.records
            .read()
            .await
            .get(operation_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(operation_id.to_string()))
    }

    async fn update<F>(&self, operation_id: &str, apply: F) -> LedgerResult<IdempotencyRecord>
    where
        F: FnOnce(&mut IdempotencyRecord) -> LedgerResult<()> + Send,
    {
        let entry = self.entry(operation_id).await?;
        let mut record = entry.lock().await;
        apply(&mut record)?;
        Ok(record.clone())
    }
}

#[async_trait]
impl IdempotencyLedger for MemoryLedger {
    async fn begin_or_reuse(&self, request: &OperationRequest) -> LedgerResult<LedgerDecision> {
        let existing = self.records.read().await.get(&request.operation_id).cloned();

        let entry = match existing {
            Some(entry) => entry,
            None => {
                let mut records = self.records.write().await;
                if let Some(entry) = records.get(&request.operation_id).cloned() {
                    entry
                } else {
                    records.insert(
                        request.operation_id.clone(),
                        Arc::new(Mutex::new(IdempotencyRecord::new(request))),
                    );
                    debug!(operation_id = %request.operation_id, "Ledger record created");
                    return Ok(LedgerDecision::Fresh);
                }
            }
        };

        let record = entry.lock().await;
        record.decision_for(request)
    }

    async fn record_attempt(&self, operation_id: &str, plugin_name: &str) -> LedgerResult<u32> {
        let entry = self.entry(operation_id).await?;
        let mut record = entry.lock().await;
        record.record_attempt(plugin_name)
    }

    async fn complete(
        &self,
        operation_id: &str,
        envelope: ResultEnvelope,
    ) -> LedgerResult<IdempotencyRecord> {
        self.update(operation_id, |record| record.complete(envelope)).await
    }

    async fn fail(
        &self,
        operation_id: &str,
        failure: LedgerFailure,
    ) -> LedgerResult<IdempotencyRecord> {
        self.update(operation_id, |record| record.fail(failure)).await
    }

    async fn mark_undetermined(
        &self,
        operation_id: &str,
        envelope: ResultEnvelope,
    ) -> LedgerResult<IdempotencyRecord> {
        self.update(operation_id, |record| record.mark_undetermined(envelope))
            .await
    }

    async fn get(&self, operation_id: &str) -> LedgerResult<Option<IdempotencyRecord>> {
        let entry = self.records.read().await.get(operation_id).cloned();
        match entry {
            Some(entry) => Ok(Some(entry.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn purge(&self, operation_id: &str) -> LedgerResult<bool> {
        Ok(self.records.write().await.remove(operation_id).is_some())
    }

    async fn list_in_flight(&self) -> LedgerResult<Vec<IdempotencyRecord>> {
        let entries: Vec<Entry> = self.records.read().await.values().cloned().collect();

        let mut in_flight = Vec::new();
        for entry in entries {
            let record = entry.lock().await;
            if record.state == LedgerState::InFlight {
                in_flight.push(record.clone());
            }
        }
        in_flight.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(in_flight)
    }
}
