//! Typed error taxonomy for the trigger subsystem.

use thiserror::Error;

use crate::trigger_command_tree::InteractionConflict;
use crate::trigger_model::TriggerId;

#[derive(Debug, Error)]
/// Enumerates supported `TriggerError` values.
///
/// A regex evaluation that exceeds its time budget is an ordinary non-match,
/// not an error, and never appears here. Per-user role-apply failures are
/// isolated into `RoleApplyReport` diagnostics rather than raised.
pub enum TriggerError {
    #[error("invalid trigger: {0}")]
    Validation(String),
    #[error("command tree blocked by {} structural conflict(s)", .0.len())]
    StructuralConflicts(Vec<InteractionConflict>),
    #[error("trigger {0} not found")]
    NotFound(TriggerId),
    #[error("trigger store unavailable: {0}")]
    Store(String),
    #[error("pub/sub bus unavailable: {0}")]
    Bus(String),
    #[error("command registrar rejected submission: {0}")]
    Registrar(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
