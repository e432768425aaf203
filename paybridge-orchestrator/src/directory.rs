use chrono::Utc;
use paybridge_core::{PaymentMethodDescriptor, PaymentMethodInfo};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Orchestration-owned view of payment methods and the plugin each one is bound to.
///
/// At most one active method per account is the default.
#[derive(Default)]
pub struct PaymentMethodDirectory {
    methods: RwLock<HashMap<Uuid, PaymentMethodDescriptor>>,
    /// Ids whose add is between the existence check and the insert
    pending: Mutex<HashSet<Uuid>>,
}

/// Holds a payment method id for one add. Released on drop.
pub struct PendingAdd<'a> {
    directory: &'a PaymentMethodDirectory,
    payment_method_id: Uuid,
}

impl Drop for PendingAdd<'_> {
    fn drop(&mut self) {
        let mut pending = self.directory.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.remove(&self.payment_method_id);
    }
}

impl PaymentMethodDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, payment_method_id: Uuid) -> Option<PaymentMethodDescriptor> {
        self.methods.read().await.get(&payment_method_id).cloned()
    }

    /// The method must exist, belong to the account and be active.
    pub async fn find(
        &self,
        account_id: Uuid,
        payment_method_id: Uuid,
    ) -> OrchestratorResult<PaymentMethodDescriptor> {
        match self.methods.read().await.get(&payment_method_id) {
            Some(d) if d.account_id == account_id && d.is_active => Ok(d.clone()),
            _ => Err(OrchestratorError::PaymentMethodNotFound(payment_method_id)),
        }
    }

    /// Plugin bound to an active payment method.
    pub async fn plugin_for(&self, payment_method_id: Uuid) -> OrchestratorResult<String> {
        match self.methods.read().await.get(&payment_method_id) {
            Some(d) if d.is_active => Ok(d.plugin_name.clone()),
            _ => Err(OrchestratorError::PaymentMethodNotFound(payment_method_id)),
        }
    }

    pub async fn default_for(&self, account_id: Uuid) -> Option<PaymentMethodDescriptor> {
        self.methods
            .read()
            .await
            .values()
            .find(|d| d.account_id == account_id && d.is_active && d.is_default)
            .cloned()
    }

    /// Insert or replace a descriptor. A default descriptor demotes the account's others.
    /// Claim an id that is neither stored nor being added by another caller.
    pub async fn reserve(&self, payment_method_id: Uuid) -> OrchestratorResult<PendingAdd<'_>> {
        let methods = self.methods.read().await;
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if methods.contains_key(&payment_method_id) || !pending.insert(payment_method_id) {
            return Err(OrchestratorError::Validation(format!(
                "payment method {} already exists",
                payment_method_id
            )));
        }
        Ok(PendingAdd {
            directory: self,
            payment_method_id,
        })
    }

    pub async fn upsert(&self, mut descriptor: PaymentMethodDescriptor) -> PaymentMethodDescriptor {
        descriptor.updated_at = Utc::now();
        let mut methods = self.methods.write().await;
        if descriptor.is_default {
            clear_defaults(&mut methods, descriptor.account_id, descriptor.payment_method_id);
        }
        methods.insert(descriptor.payment_method_id, descriptor.clone());
        debug!(
            payment_method_id = %descriptor.payment_method_id,
            plugin = %descriptor.plugin_name,
            "Payment method stored"
        );
        descriptor
    }

    pub async fn remove(
        &self,
        account_id: Uuid,
        payment_method_id: Uuid,
    ) -> OrchestratorResult<PaymentMethodDescriptor> {
        let mut methods = self.methods.write().await;
        match methods.get(&payment_method_id) {
            Some(d) if d.account_id == account_id => {}
            _ => return Err(OrchestratorError::PaymentMethodNotFound(payment_method_id)),
        }
        methods
            .remove(&payment_method_id)
            .ok_or(OrchestratorError::PaymentMethodNotFound(payment_method_id))
    }

    pub async fn set_default(
        &self,
        account_id: Uuid,
        payment_method_id: Uuid,
    ) -> OrchestratorResult<PaymentMethodDescriptor> {
        let mut methods = self.methods.write().await;
        match methods.get(&payment_method_id) {
            Some(d) if d.account_id == account_id && d.is_active => {}
            _ => return Err(OrchestratorError::PaymentMethodNotFound(payment_method_id)),
        }

        clear_defaults(&mut methods, account_id, payment_method_id);
        let descriptor = methods
            .get_mut(&payment_method_id)
            .ok_or(OrchestratorError::PaymentMethodNotFound(payment_method_id))?;
        descriptor.is_default = true;
        descriptor.updated_at = Utc::now();
        Ok(descriptor.clone())
    }

    /// All of an account's methods, active or not, oldest update first.
    pub async fn list(&self, account_id: Uuid) -> Vec<PaymentMethodDescriptor> {
        let mut listed: Vec<PaymentMethodDescriptor> = self
            .methods
            .read()
            .await
            .values()
            .filter(|d| d.account_id == account_id)
            .cloned()
            .collect();
        listed.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then(a.payment_method_id.cmp(&b.payment_method_id))
        });
        listed
    }

    /// Plugins the account has at least one method with.
    pub async fn plugins_for(&self, account_id: Uuid) -> Vec<String> {
        let mut plugins: Vec<String> = self
            .methods
            .read()
            .await
            .values()
            .filter(|d| d.account_id == account_id)
            .map(|d| d.plugin_name.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        plugins.sort();
        plugins
    }

    /// Active methods of one account and plugin, in the shape adapters accept on reset.
    pub async fn active_infos(&self, account_id: Uuid, plugin_name: &str) -> Vec<PaymentMethodInfo> {
        self.list(account_id)
            .await
            .into_iter()
            .filter(|d| d.plugin_name == plugin_name && d.is_active)
            .map(|d| d.to_info())
            .collect()
    }

    /// Align the mirror with what a plugin reports for an account. Reported methods are
    /// upserted and marked active; mirrored methods the plugin no longer reports are
    /// deactivated. Returns the number deactivated.
    pub async fn mirror(
        &self,
        account_id: Uuid,
        plugin_name: &str,
        reported: &[PaymentMethodInfo],
    ) -> usize {
        let now = Utc::now();
        let mut methods = self.methods.write().await;
        let mut seen = HashSet::new();

        for info in reported {
            if info.account_id != account_id {
                warn!(
                    payment_method_id = %info.payment_method_id,
                    plugin = plugin_name,
                    "Plugin reported a payment method for another account, skipping"
                );
                continue;
            }
            seen.insert(info.payment_method_id);

            let entry = methods.entry(info.payment_method_id).or_insert_with(|| {
                PaymentMethodDescriptor::new(account_id, info.payment_method_id, plugin_name)
            });
            entry.plugin_name = plugin_name.to_string();
            entry.external_payment_method_id = info.external_payment_method_id.clone();
            entry.is_default = info.is_default;
            entry.is_active = true;
            entry.updated_at = now;
        }

        let mut deactivated = 0;
        for descriptor in methods.values_mut() {
            if descriptor.account_id == account_id
                && descriptor.plugin_name == plugin_name
                && descriptor.is_active
                && !seen.contains(&descriptor.payment_method_id)
            {
                descriptor.is_active = false;
                descriptor.is_default = false;
                descriptor.updated_at = now;
                deactivated += 1;
            }
        }

        if let Some(default) = reported
            .iter()
            .filter(|info| info.account_id == account_id)
            .find(|info| info.is_default)
        {
            clear_defaults(&mut methods, account_id, default.payment_method_id);
        }

        debug!(%account_id, plugin = plugin_name, reported = seen.len(), deactivated, "Payment methods mirrored");
        deactivated
    }
}

fn clear_defaults(methods: &mut HashMap<Uuid, PaymentMethodDescriptor>, account_id: Uuid, keep: Uuid) {
    for descriptor in methods.values_mut() {
        if descriptor.account_id == account_id && descriptor.payment_method_id != keep {
            descriptor.is_default = false;
        }
    }
}
