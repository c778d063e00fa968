//! Mutation service bridging the admin surface, the store, and the cache.
//!
//! Every mutation validates first, writes the durable store, then mirrors
//! the change into the cache so matchers observe it immediately. Malformed
//! input is rejected before anything is written.

use std::sync::Arc;

use crate::trigger_cache::TriggerCache;
use crate::trigger_command_tree::{submit_command_tree, CommandRegistrar};
use crate::trigger_errors::TriggerError;
use crate::trigger_model::{validate_trigger, TenantId, Trigger, TriggerId};
use crate::trigger_store::TriggerStore;

/// Public struct `TriggerService` used across Vigil components.
pub struct TriggerService {
    store: Arc<dyn TriggerStore>,
    cache: Arc<TriggerCache>,
}

impl TriggerService {
    pub fn new(store: Arc<dyn TriggerStore>, cache: Arc<TriggerCache>) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> &Arc<TriggerCache> {
        &self.cache
    }

    /// Validates, inserts into the store, and mirrors the stored row (with
    /// its assigned id) into the cache. Returns the stored row.
    pub async fn create_trigger(&self, mut trigger: Trigger) -> Result<Trigger, TriggerError> {
        validate_trigger(&trigger)?;
        let id = self.store.insert(&trigger).await?;
        trigger.id = id;
        self.cache.upsert(trigger.tenant_id, trigger.clone()).await?;
        Ok(trigger)
    }

    /// Validates, updates the store row, and mirrors the change.
    pub async fn update_trigger(&self, trigger: Trigger) -> Result<(), TriggerError> {
        validate_trigger(&trigger)?;
        self.store.update(&trigger).await?;
        self.cache.upsert(trigger.tenant_id, trigger).await
    }

    /// Deletes from the store and evicts from the cache.
    pub async fn delete_trigger(
        &self,
        tenant_id: Option<TenantId>,
        id: TriggerId,
    ) -> Result<(), TriggerError> {
        self.store.delete(id).await?;
        self.cache.remove(tenant_id, id).await
    }

    /// Lists the triggers visible to a tenant (its own plus global), or the
    /// global rows only.
    pub fn list_triggers(&self, tenant_id: Option<TenantId>) -> Vec<Trigger> {
        match tenant_id {
            Some(tenant_id) => self.cache.visible_triggers(tenant_id),
            None => self.cache.get_all(None).as_ref().clone(),
        }
    }

    /// Rebuilds and submits the tenant's command tree after a mutation.
    /// Invoked explicitly, never on the matching hot path, and never
    /// retried internally.
    pub async fn sync_tenant_commands(
        &self,
        tenant_id: TenantId,
        registrar: &dyn CommandRegistrar,
    ) -> Result<usize, TriggerError> {
        submit_command_tree(&self.cache, tenant_id, registrar).await
    }
}
