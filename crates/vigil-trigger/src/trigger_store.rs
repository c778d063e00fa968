//! Durable CRUD contract for trigger rows plus the bundled backends.
//!
//! The cache consumes the store through the `TriggerStore` trait only;
//! single-row atomicity is all the contract requires. `MemoryTriggerStore`
//! backs tests and embedded deployments; `JsonFileTriggerStore` persists a
//! schema-tagged state file with temp-file-then-rename writes so readers
//! never observe partial data.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::trigger_errors::TriggerError;
use crate::trigger_model::{TenantId, Trigger, TriggerId};

pub const TRIGGER_STORE_SCHEMA_VERSION: u32 = 1;

fn trigger_store_schema_version() -> u32 {
    TRIGGER_STORE_SCHEMA_VERSION
}

#[async_trait]
/// Trait contract for `TriggerStore` behavior.
pub trait TriggerStore: Send + Sync {
    /// Fetches every trigger owned by the given tenant, or the global rows
    /// when `tenant_id` is `None`.
    async fn fetch_by_tenant(&self, tenant_id: Option<TenantId>)
        -> Result<Vec<Trigger>, TriggerError>;

    /// Inserts a row and returns the store-assigned id.
    async fn insert(&self, trigger: &Trigger) -> Result<TriggerId, TriggerError>;

    /// Replaces an existing row by id.
    async fn update(&self, trigger: &Trigger) -> Result<(), TriggerError>;

    /// Deletes a row by id. Deleting an absent row is a no-op so callers can
    /// re-invoke after a transient failure.
    async fn delete(&self, id: TriggerId) -> Result<(), TriggerError>;
}

#[derive(Debug, Default)]
struct StoreRows {
    next_id: u64,
    triggers: Vec<Trigger>,
}

impl StoreRows {
    fn fetch(&self, tenant_id: Option<TenantId>) -> Vec<Trigger> {
        self.triggers
            .iter()
            .filter(|trigger| trigger.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    fn insert(&mut self, trigger: &Trigger) -> TriggerId {
        self.next_id += 1;
        let id = TriggerId(self.next_id);
        let mut row = trigger.clone();
        row.id = id;
        self.triggers.push(row);
        id
    }

    fn update(&mut self, trigger: &Trigger) -> Result<(), TriggerError> {
        match self.triggers.iter().position(|row| row.id == trigger.id) {
            Some(index) => {
                self.triggers[index] = trigger.clone();
                Ok(())
            }
            None => Err(TriggerError::NotFound(trigger.id)),
        }
    }

    fn delete(&mut self, id: TriggerId) {
        self.triggers.retain(|row| row.id != id);
    }
}

#[derive(Debug, Default)]
/// In-memory `TriggerStore` used by tests and embedded deployments.
pub struct MemoryTriggerStore {
    rows: Mutex<StoreRows>,
}

impl MemoryTriggerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store with existing rows, advancing the id counter past the
    /// highest seeded id.
    pub fn with_rows(triggers: Vec<Trigger>) -> Self {
        let next_id = triggers.iter().map(|row| row.id.0).max().unwrap_or(0);
        Self {
            rows: Mutex::new(StoreRows { next_id, triggers }),
        }
    }
}

#[async_trait]
impl TriggerStore for MemoryTriggerStore {
    async fn fetch_by_tenant(
        &self,
        tenant_id: Option<TenantId>,
    ) -> Result<Vec<Trigger>, TriggerError> {
        Ok(self.rows.lock().expect("trigger rows lock poisoned").fetch(tenant_id))
    }

    async fn insert(&self, trigger: &Trigger) -> Result<TriggerId, TriggerError> {
        Ok(self.rows.lock().expect("trigger rows lock poisoned").insert(trigger))
    }

    async fn update(&self, trigger: &Trigger) -> Result<(), TriggerError> {
        self.rows.lock().expect("trigger rows lock poisoned").update(trigger)
    }

    async fn delete(&self, id: TriggerId) -> Result<(), TriggerError> {
        self.rows.lock().expect("trigger rows lock poisoned").delete(id);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TriggerStoreState {
    #[serde(default = "trigger_store_schema_version")]
    schema_version: u32,
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    triggers: Vec<Trigger>,
}

impl Default for TriggerStoreState {
    fn default() -> Self {
        Self {
            schema_version: TRIGGER_STORE_SCHEMA_VERSION,
            next_id: 0,
            triggers: Vec::new(),
        }
    }
}

#[derive(Debug)]
/// File-backed `TriggerStore` persisting one schema-tagged JSON state file.
pub struct JsonFileTriggerStore {
    path: PathBuf,
    rows: Mutex<StoreRows>,
}

impl JsonFileTriggerStore {
    /// Loads existing state from `path`, or starts empty when the file does
    /// not exist yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, TriggerError> {
        let path = path.into();
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let state: TriggerStoreState = serde_json::from_str(&raw)?;
            if state.schema_version != TRIGGER_STORE_SCHEMA_VERSION {
                return Err(TriggerError::Store(format!(
                    "unsupported trigger store schema version {} (expected {})",
                    state.schema_version, TRIGGER_STORE_SCHEMA_VERSION
                )));
            }
            state
        } else {
            TriggerStoreState::default()
        };
        Ok(Self {
            path,
            rows: Mutex::new(StoreRows {
                next_id: state.next_id,
                triggers: state.triggers,
            }),
        })
    }

    fn persist(&self, rows: &StoreRows) -> Result<(), TriggerError> {
        let state = TriggerStoreState {
            schema_version: TRIGGER_STORE_SCHEMA_VERSION,
            next_id: rows.next_id,
            triggers: rows.triggers.clone(),
        };
        let rendered = serde_json::to_string_pretty(&state)?;
        write_text_atomic(&self.path, &rendered)
    }
}

#[async_trait]
impl TriggerStore for JsonFileTriggerStore {
    async fn fetch_by_tenant(
        &self,
        tenant_id: Option<TenantId>,
    ) -> Result<Vec<Trigger>, TriggerError> {
        Ok(self.rows.lock().expect("trigger rows lock poisoned").fetch(tenant_id))
    }

    async fn insert(&self, trigger: &Trigger) -> Result<TriggerId, TriggerError> {
        let mut rows = self.rows.lock().expect("trigger rows lock poisoned");
        let id = rows.insert(trigger);
        self.persist(&rows)?;
        Ok(id)
    }

    async fn update(&self, trigger: &Trigger) -> Result<(), TriggerError> {
        let mut rows = self.rows.lock().expect("trigger rows lock poisoned");
        rows.update(trigger)?;
        self.persist(&rows)
    }

    async fn delete(&self, id: TriggerId) -> Result<(), TriggerError> {
        let mut rows = self.rows.lock().expect("trigger rows lock poisoned");
        rows.delete(id);
        self.persist(&rows)
    }
}

/// Writes text using a temp file + rename so readers never observe partial
/// data.
fn write_text_atomic(path: &Path, content: &str) -> Result<(), TriggerError> {
    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir)?;

    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or(0);
    let temp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("trigger-store"),
        std::process::id(),
        stamp
    );
    let temp_path = parent_dir.join(temp_name);
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}
