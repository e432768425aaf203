pub mod app_config;
pub mod ledger;
pub mod memory_ledger;
pub mod redis_repo;

pub use ledger::{
    FailureClass, IdempotencyLedger, IdempotencyRecord, LedgerDecision, LedgerError, LedgerFailure,
    LedgerResult, LedgerState,
};
pub use memory_ledger::MemoryLedger;
pub use redis_repo::RedisLedger;
