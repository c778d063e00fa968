//! Chat-trigger subsystem for the Vigil community bot.
//!
//! Maintains a per-tenant (plus global) rule table mapping text and pattern
//! keys to automated responses, kept consistent across bot processes via
//! pub/sub, and synthesizes each tenant's rules into the three-level
//! command tree the external registrar accepts. Matching runs against
//! copy-on-write cache snapshots and never blocks on writers.

pub mod trigger_admin;
pub mod trigger_bus;
pub mod trigger_cache;
pub mod trigger_command_tree;
pub mod trigger_errors;
pub mod trigger_matcher;
pub mod trigger_model;
pub mod trigger_reactions;
pub mod trigger_roles;
pub mod trigger_store;

pub use trigger_admin::TriggerService;
pub use trigger_bus::{
    CacheBroadcast, CacheBroadcastEvent, InProcessTriggerBus, TriggerBus, TRIGGER_CACHE_TOPIC,
};
pub use trigger_cache::{connect_cache_to_bus, CacheLoadReport, TriggerCache, TriggerScope};
pub use trigger_command_tree::{
    build_command_tree, submit_command_tree, validate_interactions, CommandNode, CommandNodeKind,
    CommandRegistrar, InteractionConflict, InteractionConflictKind,
};
pub use trigger_errors::TriggerError;
pub use trigger_matcher::{MatcherConfig, TriggerHit, TriggerMatcher};
pub use trigger_model::{
    validate_trigger, ApplicationCommandKind, PrefixKind, RoleGrantKind, RoleId, TenantId,
    Trigger, TriggerEventKind, TriggerId, UserId,
};
pub use trigger_reactions::{match_reaction, ReactionEvent};
pub use trigger_roles::{
    apply_role_grants, compute_role_update, RoleApplyReport, RolePlatform, MAX_MENTION_GRANTS,
};
pub use trigger_store::{JsonFileTriggerStore, MemoryTriggerStore, TriggerStore};
