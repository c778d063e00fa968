//! Per-tenant (plus global) in-memory trigger index with copy-on-write
//! snapshots.
//!
//! Writers clone the affected bucket, mutate the clone, and atomically swap
//! the shared map; readers load a stable snapshot and never block. Global
//! mutations are applied locally first, then announced over the bus so peer
//! processes mirror them into their own global bucket; tenant-scoped
//! mutations stay process-local because exactly one process owns a tenant's
//! live connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use arc_swap::ArcSwap;
use serde_json::Value;

use crate::trigger_bus::{
    CacheBroadcast, CacheBroadcastEvent, TriggerBus, CACHE_BROADCAST_SCHEMA_VERSION,
    TRIGGER_CACHE_TOPIC,
};
use crate::trigger_errors::TriggerError;
use crate::trigger_model::{TenantId, Trigger, TriggerId};
use crate::trigger_store::TriggerStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Enumerates supported `TriggerScope` values.
pub enum TriggerScope {
    Global,
    Tenant(TenantId),
}

impl TriggerScope {
    pub fn from_tenant(tenant_id: Option<TenantId>) -> Self {
        match tenant_id {
            Some(tenant_id) => TriggerScope::Tenant(tenant_id),
            None => TriggerScope::Global,
        }
    }

    pub fn tenant_id(self) -> Option<TenantId> {
        match self {
            TriggerScope::Global => None,
            TriggerScope::Tenant(tenant_id) => Some(tenant_id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Outcome of a bulk cache load; per-scope failures are reported here, never
/// raised, so a partially reachable store degrades to empty buckets instead
/// of stale data treated as authoritative.
pub struct CacheLoadReport {
    pub scopes_loaded: usize,
    pub scopes_failed: usize,
    pub triggers_loaded: usize,
    pub diagnostics: Vec<String>,
}

type BucketMap = HashMap<TriggerScope, Arc<Vec<Trigger>>>;

fn empty_bucket() -> Arc<Vec<Trigger>> {
    static EMPTY: OnceLock<Arc<Vec<Trigger>>> = OnceLock::new();
    Arc::clone(EMPTY.get_or_init(|| Arc::new(Vec::new())))
}

fn next_origin() -> String {
    static ORIGIN_COUNTER: AtomicU64 = AtomicU64::new(0);
    format!(
        "{}-{}",
        std::process::id(),
        ORIGIN_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Public struct `TriggerCache` used across Vigil components.
pub struct TriggerCache {
    buckets: ArcSwap<BucketMap>,
    write_lock: Mutex<()>,
    ready: AtomicBool,
    origin: String,
    bus: Mutex<Option<Arc<dyn TriggerBus>>>,
}

impl TriggerCache {
    pub fn new() -> Self {
        Self {
            buckets: ArcSwap::from_pointee(BucketMap::new()),
            write_lock: Mutex::new(()),
            ready: AtomicBool::new(false),
            origin: next_origin(),
            bus: Mutex::new(None),
        }
    }

    /// Whether the initial bulk load has completed. Matching against a
    /// not-yet-ready cache yields "no trigger found", never an error.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Bulk-fetches the global bucket plus every listed tenant and replaces
    /// all buckets atomically, then opens the readiness gate. A scope whose
    /// fetch fails stays empty until a forced reload.
    pub async fn load(&self, store: &dyn TriggerStore, tenant_ids: &[TenantId]) -> CacheLoadReport {
        let mut report = CacheLoadReport::default();
        let mut next = BucketMap::new();

        let mut scopes = vec![TriggerScope::Global];
        scopes.extend(tenant_ids.iter().copied().map(TriggerScope::Tenant));
        for scope in scopes {
            match store.fetch_by_tenant(scope.tenant_id()).await {
                Ok(rows) => {
                    report.scopes_loaded += 1;
                    report.triggers_loaded += rows.len();
                    next.insert(scope, Arc::new(rows));
                }
                Err(error) => {
                    tracing::warn!(?scope, %error, "trigger load failed; bucket left empty");
                    report.scopes_failed += 1;
                    report.diagnostics.push(format!("{scope:?}: {error}"));
                    next.insert(scope, empty_bucket());
                }
            }
        }

        {
            let _guard = self.write_lock.lock().expect("cache write lock poisoned");
            self.buckets.store(Arc::new(next));
        }
        self.ready.store(true, Ordering::Release);
        report
    }

    /// Installs a tenant's bucket when the tenant joins. Returns the number
    /// of triggers installed; a fetch failure installs an empty bucket.
    pub async fn on_tenant_join(&self, store: &dyn TriggerStore, tenant_id: TenantId) -> usize {
        let rows = match store.fetch_by_tenant(Some(tenant_id)).await {
            Ok(rows) => rows,
            Err(error) => {
                tracing::warn!(%tenant_id, %error, "tenant trigger fetch failed; bucket left empty");
                Vec::new()
            }
        };
        let installed = rows.len();
        self.replace_bucket(TriggerScope::Tenant(tenant_id), Arc::new(rows));
        installed
    }

    /// Evicts a tenant's bucket when the tenant departs.
    pub fn on_tenant_leave(&self, tenant_id: TenantId) {
        let _guard = self.write_lock.lock().expect("cache write lock poisoned");
        let current = self.buckets.load();
        if !current.contains_key(&TriggerScope::Tenant(tenant_id)) {
            return;
        }
        let mut next: BucketMap = (**current).clone();
        next.remove(&TriggerScope::Tenant(tenant_id));
        self.buckets.store(Arc::new(next));
    }

    /// Inserts or replaces a trigger by id. Global mutations are broadcast
    /// to peer processes after the local apply.
    pub async fn upsert(
        &self,
        tenant_id: Option<TenantId>,
        trigger: Trigger,
    ) -> Result<(), TriggerError> {
        let scope = TriggerScope::from_tenant(tenant_id);
        self.apply_upsert(scope, trigger.clone());
        if scope == TriggerScope::Global {
            self.broadcast(CacheBroadcastEvent::Upsert { trigger }).await?;
        }
        Ok(())
    }

    /// Removes a trigger by id, with the same broadcast rule as `upsert`.
    pub async fn remove(
        &self,
        tenant_id: Option<TenantId>,
        id: TriggerId,
    ) -> Result<(), TriggerError> {
        let scope = TriggerScope::from_tenant(tenant_id);
        self.apply_remove(scope, id);
        if scope == TriggerScope::Global {
            self.broadcast(CacheBroadcastEvent::Remove { id }).await?;
        }
        Ok(())
    }

    /// Returns the current snapshot for a scope without copying. Empty until
    /// the initial load completes, and empty for scopes with no bucket.
    pub fn get_all(&self, tenant_id: Option<TenantId>) -> Arc<Vec<Trigger>> {
        if !self.is_ready() {
            return empty_bucket();
        }
        self.buckets
            .load()
            .get(&TriggerScope::from_tenant(tenant_id))
            .cloned()
            .unwrap_or_else(empty_bucket)
    }

    /// The tenant's visible trigger set: its own rows followed by the global
    /// rows.
    pub fn visible_triggers(&self, tenant_id: TenantId) -> Vec<Trigger> {
        let mut rows = self.get_all(Some(tenant_id)).as_ref().clone();
        rows.extend(self.get_all(None).iter().cloned());
        rows
    }

    fn replace_bucket(&self, scope: TriggerScope, rows: Arc<Vec<Trigger>>) {
        let _guard = self.write_lock.lock().expect("cache write lock poisoned");
        let current = self.buckets.load();
        let mut next: BucketMap = (**current).clone();
        next.insert(scope, rows);
        self.buckets.store(Arc::new(next));
    }

    fn apply_upsert(&self, scope: TriggerScope, trigger: Trigger) {
        let _guard = self.write_lock.lock().expect("cache write lock poisoned");
        let current = self.buckets.load();
        let mut next: BucketMap = (**current).clone();
        let bucket = next.entry(scope).or_insert_with(empty_bucket);
        let mut rows = (**bucket).clone();
        match rows.iter().position(|row| row.id == trigger.id) {
            Some(index) => rows[index] = trigger,
            None => rows.push(trigger),
        }
        *bucket = Arc::new(rows);
        self.buckets.store(Arc::new(next));
    }

    fn apply_remove(&self, scope: TriggerScope, id: TriggerId) {
        let _guard = self.write_lock.lock().expect("cache write lock poisoned");
        let current = self.buckets.load();
        let Some(bucket) = current.get(&scope) else {
            return;
        };
        if !bucket.iter().any(|row| row.id == id) {
            return;
        }
        let mut next: BucketMap = (**current).clone();
        let rows: Vec<Trigger> = bucket.iter().filter(|row| row.id != id).cloned().collect();
        next.insert(scope, Arc::new(rows));
        self.buckets.store(Arc::new(next));
    }

    async fn broadcast(&self, event: CacheBroadcastEvent) -> Result<(), TriggerError> {
        let bus = self
            .bus
            .lock()
            .expect("cache bus lock poisoned")
            .as_ref()
            .map(Arc::clone);
        let Some(bus) = bus else {
            return Ok(());
        };
        let envelope = CacheBroadcast {
            schema_version: CACHE_BROADCAST_SCHEMA_VERSION,
            origin: self.origin.clone(),
            event,
        };
        bus.publish(TRIGGER_CACHE_TOPIC, serde_json::to_value(&envelope)?)
            .await
    }

    fn apply_broadcast_payload(&self, payload: Value) {
        let envelope: CacheBroadcast = match serde_json::from_value(payload) {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::warn!(%error, "discarding malformed trigger-cache broadcast");
                return;
            }
        };
        if envelope.origin == self.origin {
            return;
        }
        if envelope.schema_version != CACHE_BROADCAST_SCHEMA_VERSION {
            tracing::warn!(
                schema_version = envelope.schema_version,
                "discarding trigger-cache broadcast with unsupported schema version"
            );
            return;
        }
        match envelope.event {
            CacheBroadcastEvent::Upsert { trigger } => {
                self.apply_upsert(TriggerScope::Global, trigger);
            }
            CacheBroadcastEvent::Remove { id } => {
                self.apply_remove(TriggerScope::Global, id);
            }
        }
    }
}

impl Default for TriggerCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Wires a cache to the bus: global mutations publish an envelope, and
/// envelopes from peer caches are applied idempotently. The cache's own
/// echoes are skipped by origin tag.
pub fn connect_cache_to_bus(cache: &Arc<TriggerCache>, bus: Arc<dyn TriggerBus>) {
    let weak = Arc::downgrade(cache);
    bus.subscribe(
        TRIGGER_CACHE_TOPIC,
        Arc::new(move |payload| {
            if let Some(cache) = weak.upgrade() {
                cache.apply_broadcast_payload(payload);
            }
        }),
    );
    *cache.bus.lock().expect("cache bus lock poisoned") = Some(bus);
}
