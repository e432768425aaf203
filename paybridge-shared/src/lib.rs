pub mod pii;
pub mod models {
    pub mod events;
}

pub use models::events::{OperationSettledEvent, SettlementOutcome};
pub use pii::Masked;
