use async_trait::async_trait;
use paybridge_core::{OperationRequest, ResultEnvelope};
use redis::AsyncCommands;
use tracing::{debug, warn};

use crate::ledger::{
    IdempotencyLedger, IdempotencyRecord, LedgerDecision, LedgerError, LedgerFailure, LedgerResult,
    LedgerState,
};

const CAS_RETRIES: usize = 5;

// Insert the record unless one already exists; returns the existing record otherwise.
const BEGIN_SCRIPT: &str = r#"
    local existing = redis.call("GET", KEYS[1])
    if existing then
        return existing
    end
    redis.call("SET", KEYS[1], ARGV[1])
    redis.call("SADD", KEYS[2], ARGV[2])
    return false
"#;

// Compare-and-set on the serialized record, keeping the in-flight index in step.
const CAS_SCRIPT: &str = r#"
    if redis.call("GET", KEYS[1]) ~= ARGV[1] then
        return 0
    end
    redis.call("SET", KEYS[1], ARGV[2])
    if ARGV[4] == "1" then
        redis.call("SADD", KEYS[2], ARGV[3])
    else
        redis.call("SREM", KEYS[2], ARGV[3])
    end
    return 1
"#;

impl From<redis::RedisError> for LedgerError {
    fn from(err: redis::RedisError) -> Self {
        LedgerError::Backend(err.to_string())
    }
}

/// Ledger backed by Redis. Records are JSON strings under `{prefix}:op:{operation_id}`
/// and in-flight ids are indexed in the `{prefix}:in_flight` set.
#[derive(Clone)]
pub struct RedisLedger {
    client: redis::Client,
    key_prefix: String,
}

impl RedisLedger {
    pub async fn new(connection_string: &str, key_prefix: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self {
            client,
            key_prefix: key_prefix.trim_end_matches(':').to_string(),
        })
    }

    fn record_key(&self, operation_id: &str) -> String {
        format!("{}:op:{}", self.key_prefix, operation_id)
    }

    fn in_flight_key(&self) -> String {
        format!("{}:in_flight", self.key_prefix)
    }

    async fn load(&self, operation_id: &str) -> LedgerResult<Option<(String, IdempotencyRecord)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(self.record_key(operation_id)).await?;
        match raw {
            Some(raw) => {
                let record = decode(&raw)?;
                Ok(Some((raw, record)))
            }
            None => Ok(None),
        }
    }

    /// Read, mutate, compare-and-set. Retries when another writer got there first.
    async fn update<F>(&self, operation_id: &str, apply: F) -> LedgerResult<IdempotencyRecord>
    where
        F: Fn(&mut IdempotencyRecord) -> LedgerResult<()> + Send + Sync,
    {
        let script = redis::Script::new(CAS_SCRIPT);

        for attempt in 0..CAS_RETRIES {
            let (raw, mut record) = self
                .load(operation_id)
                .await?
                .ok_or_else(|| LedgerError::NotFound(operation_id.to_string()))?;

            apply(&mut record)?;
            let updated = encode(&record)?;
            let still_in_flight = if record.state == LedgerState::InFlight { "1" } else { "0" };

            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let swapped: i32 = script
                .key(self.record_key(operation_id))
                .key(self.in_flight_key())
                .arg(&raw)
                .arg(&updated)
                .arg(operation_id)
                .arg(still_in_flight)
                .invoke_async(&mut conn)
                .await?;

            if swapped == 1 {
                return Ok(record);
            }
            debug!(operation_id, attempt, "Ledger compare-and-set lost a race, retrying");
        }

        warn!(operation_id, "Ledger compare-and-set retries exhausted");
        Err(LedgerError::Backend(format!(
            "contention on operation {}",
            operation_id
        )))
    }
}

fn encode(record: &IdempotencyRecord) -> LedgerResult<String> {
    serde_json::to_string(record).map_err(|e| LedgerError::Corrupted(e.to_string()))
}

fn decode(raw: &str) -> LedgerResult<IdempotencyRecord> {
    serde_json::from_str(raw).map_err(|e| LedgerError::Corrupted(e.to_string()))
}

#[async_trait]
impl IdempotencyLedger for RedisLedger {
    async fn begin_or_reuse(&self, request: &OperationRequest) -> LedgerResult<LedgerDecision> {
        let fresh = encode(&IdempotencyRecord::new(request))?;
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let existing: Option<String> = redis::Script::new(BEGIN_SCRIPT)
            .key(self.record_key(&request.operation_id))
            .key(self.in_flight_key())
            .arg(&fresh)
            .arg(&request.operation_id)
            .invoke_async(&mut conn)
            .await?;

        match existing {
            None => Ok(LedgerDecision::Fresh),
            Some(raw) => decode(&raw)?.decision_for(request),
        }
    }

    async fn record_attempt(&self, operation_id: &str, plugin_name: &str) -> LedgerResult<u32> {
        let record = self
            .update(operation_id, |record| record.record_attempt(plugin_name).map(|_| ()))
            .await?;
        Ok(record.attempts)
    }

    async fn complete(
        &self,
        operation_id: &str,
        envelope: ResultEnvelope,
    ) -> LedgerResult<IdempotencyRecord> {
        self.update(operation_id, |record| record.complete(envelope.clone()))
            .await
    }

    async fn fail(
        &self,
        operation_id: &str,
        failure: LedgerFailure,
    ) -> LedgerResult<IdempotencyRecord> {
        self.update(operation_id, |record| record.fail(failure.clone()))
            .await
    }

    async fn mark_undetermined(
        &self,
        operation_id: &str,
        envelope: ResultEnvelope,
    ) -> LedgerResult<IdempotencyRecord> {
        self.update(operation_id, |record| record.mark_undetermined(envelope.clone()))
            .await
    }

    async fn get(&self, operation_id: &str) -> LedgerResult<Option<IdempotencyRecord>> {
        Ok(self.load(operation_id).await?.map(|(_, record)| record))
    }

    async fn purge(&self, operation_id: &str) -> LedgerResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let (removed, _): (i64, i64) = redis::pipe()
            .atomic()
            .del(self.record_key(operation_id))
            .srem(self.in_flight_key(), operation_id)
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn list_in_flight(&self) -> LedgerResult<Vec<IdempotencyRecord>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let ids: Vec<String> = conn.smembers(self.in_flight_key()).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| self.record_key(id)).collect();
        let raws: Vec<Option<String>> = conn.mget(keys).await?;

        let mut records = Vec::new();
        for raw in raws.into_iter().flatten() {
            let record = decode(&raw)?;
            if record.state == LedgerState::InFlight {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }
}
