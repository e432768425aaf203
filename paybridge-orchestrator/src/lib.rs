pub mod directory;
pub mod error;
pub mod orchestrator;
pub mod pagination;
pub mod registry;
pub mod retry;
pub mod sandbox;

pub use directory::PaymentMethodDirectory;
pub use error::{OrchestratorError, OrchestratorResult};
pub use orchestrator::{OperationOrchestrator, ReconcileOutcome, SearchLimits};
pub use pagination::{Page, PageCursor, PageSource};
pub use registry::{AdapterRegistry, RegistryError};
pub use retry::RetryPolicy;
pub use sandbox::SandboxAdapter;
