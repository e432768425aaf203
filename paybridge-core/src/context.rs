use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant scoping handed to every adapter call. Carries no business logic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallContext {
    pub tenant_id: Uuid,
    pub request_id: Uuid,
    pub actor: Option<String>,
}

impl CallContext {
    pub fn new(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            request_id: Uuid::new_v4(),
            actor: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}
