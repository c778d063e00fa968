//! Synthesizes a tenant's flat trigger set into the registrar's three-level
//! command tree and detects structural defects before submission.
//!
//! Validation runs over the whole set independently of construction and
//! reports every conflict; any conflict blocks synthesis entirely. There is
//! never a partial registration of the valid subset.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::trigger_cache::TriggerCache;
use crate::trigger_errors::TriggerError;
use crate::trigger_model::{ApplicationCommandKind, TenantId, Trigger, TriggerId};

pub const MAX_COMMAND_NAME_CHARS: usize = 32;
pub const MAX_SLASH_NAME_DEPTH: usize = 3;
pub const MAX_CHILDREN_PER_NODE: usize = 25;
pub const MAX_COMMAND_DESCRIPTION_CHARS: usize = 100;

const PLACEHOLDER_DESCRIPTION: &str = "Command group";
const FALLBACK_LEAF_DESCRIPTION: &str = "Automated response";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `CommandNodeKind` values.
pub enum CommandNodeKind {
    Root,
    Group,
    Subcommand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// One node of the registrar command hierarchy, rebuilt on every synthesis.
pub struct CommandNode {
    pub name: String,
    pub description: String,
    pub kind: CommandNodeKind,
    pub source_trigger: Option<TriggerId>,
    pub children: Vec<CommandNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `InteractionConflictKind` values.
pub enum InteractionConflictKind {
    Duplicate,
    InvalidName,
    SubcommandMatchesParent,
    TooManyChildren,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A structural defect that blocks registrar submission.
pub struct InteractionConflict {
    pub kind: InteractionConflictKind,
    pub trigger_ids: Vec<TriggerId>,
    pub trigger_names: Vec<String>,
}

fn is_name_char(character: char) -> bool {
    character.is_alphanumeric() || character == '_' || character == '-'
}

/// Whether `name` is registrable for the given command kind: 1-32 chars for
/// every kind, and for slash commands one to three space-separated segments
/// of word characters or hyphens.
pub fn is_valid_command_name(name: &str, kind: ApplicationCommandKind) -> bool {
    let length = name.chars().count();
    if length == 0 || length > MAX_COMMAND_NAME_CHARS {
        return false;
    }
    if kind != ApplicationCommandKind::Slash {
        return true;
    }
    let segments: Vec<&str> = name.split(' ').collect();
    if segments.len() > MAX_SLASH_NAME_DEPTH {
        return false;
    }
    segments
        .iter()
        .all(|segment| !segment.is_empty() && segment.chars().all(is_name_char))
}

fn segments(name: &str) -> Vec<&str> {
    name.split(' ').collect()
}

/// Slash names nest by space-separated segments; message and user commands
/// are always flat roots (their looser name grammar permits spaces).
fn command_segments(trigger: &Trigger, name: &str) -> Vec<String> {
    if trigger.application_command_type == ApplicationCommandKind::Slash {
        segments(name).iter().map(|s| (*s).to_string()).collect()
    } else {
        vec![name.to_string()]
    }
}

/// Whether a command named `parent` shadows `child`: a depth-1 name equal to
/// the first segment of a depth-2 name, or a depth-2 name equal to the first
/// two segments of a depth-3 name.
fn parent_shadows(parent: &str, child: &str) -> bool {
    let parent_segments = segments(parent);
    let child_segments = segments(child);
    match (parent_segments.len(), child_segments.len()) {
        (1, 2) => child_segments[0] == parent,
        (2, 3) => child_segments[0] == parent_segments[0] && child_segments[1] == parent_segments[1],
        _ => false,
    }
}

/// Validates every distinct pair of registrable triggers and returns the
/// full conflict list, never truncated to the first defect.
pub fn validate_interactions(triggers: &[Trigger]) -> Vec<InteractionConflict> {
    let commands: Vec<(&Trigger, String)> = triggers
        .iter()
        .filter(|trigger| trigger.application_command_type.is_registrable())
        .map(|trigger| (trigger, trigger.resolved_command_name()))
        .collect();

    let mut conflicts = Vec::new();

    for (trigger, name) in &commands {
        if !is_valid_command_name(name, trigger.application_command_type) {
            conflicts.push(InteractionConflict {
                kind: InteractionConflictKind::InvalidName,
                trigger_ids: vec![trigger.id],
                trigger_names: vec![name.clone()],
            });
        }
    }

    let mut by_name: BTreeMap<&str, Vec<&Trigger>> = BTreeMap::new();
    for (trigger, name) in &commands {
        by_name.entry(name.as_str()).or_default().push(*trigger);
    }
    for (name, group) in &by_name {
        if group.len() > 1 {
            conflicts.push(InteractionConflict {
                kind: InteractionConflictKind::Duplicate,
                trigger_ids: group.iter().map(|trigger| trigger.id).collect(),
                trigger_names: vec![(*name).to_string()],
            });
        }
    }

    let slash_commands: Vec<(&Trigger, &String)> = commands
        .iter()
        .filter(|(trigger, _)| {
            trigger.application_command_type == ApplicationCommandKind::Slash
        })
        .map(|(trigger, name)| (*trigger, name))
        .collect();

    for i in 0..slash_commands.len() {
        for j in (i + 1)..slash_commands.len() {
            let (trigger_a, name_a) = slash_commands[i];
            let (trigger_b, name_b) = slash_commands[j];
            if parent_shadows(name_a, name_b) || parent_shadows(name_b, name_a) {
                conflicts.push(InteractionConflict {
                    kind: InteractionConflictKind::SubcommandMatchesParent,
                    trigger_ids: vec![trigger_a.id, trigger_b.id],
                    trigger_names: vec![name_a.clone(), name_b.clone()],
                });
            }
        }
    }

    // Children per synthesized parent path; a depth-3 trigger contributes a
    // group node under its root and a leaf under that group.
    let mut children_by_parent: BTreeMap<String, BTreeMap<String, Vec<TriggerId>>> =
        BTreeMap::new();
    for (trigger, name) in &slash_commands {
        let parts = segments(name);
        match parts.len() {
            2 => {
                children_by_parent
                    .entry(parts[0].to_string())
                    .or_default()
                    .entry(parts[1].to_string())
                    .or_default()
                    .push(trigger.id);
            }
            3 => {
                children_by_parent
                    .entry(parts[0].to_string())
                    .or_default()
                    .entry(parts[1].to_string())
                    .or_default()
                    .push(trigger.id);
                children_by_parent
                    .entry(format!("{} {}", parts[0], parts[1]))
                    .or_default()
                    .entry(parts[2].to_string())
                    .or_default()
                    .push(trigger.id);
            }
            _ => {}
        }
    }
    for (parent, children) in &children_by_parent {
        if children.len() > MAX_CHILDREN_PER_NODE {
            let mut trigger_ids: Vec<TriggerId> =
                children.values().flatten().copied().collect();
            trigger_ids.sort();
            trigger_ids.dedup();
            conflicts.push(InteractionConflict {
                kind: InteractionConflictKind::TooManyChildren,
                trigger_ids,
                trigger_names: vec![parent.clone()],
            });
        }
    }

    conflicts
}

#[derive(Default)]
struct RootAccum<'a> {
    direct: Option<&'a Trigger>,
    subcommands: BTreeMap<String, &'a Trigger>,
    groups: BTreeMap<String, BTreeMap<String, &'a Trigger>>,
}

fn leaf_description(trigger: &Trigger) -> String {
    let response = trigger.response.trim();
    if response.is_empty() {
        return FALLBACK_LEAF_DESCRIPTION.to_string();
    }
    response
        .chars()
        .take(MAX_COMMAND_DESCRIPTION_CHARS)
        .collect()
}

/// Builds the validated three-level command tree, or fails closed with the
/// full conflict list.
pub fn build_command_tree(triggers: &[Trigger]) -> Result<Vec<CommandNode>, TriggerError> {
    let conflicts = validate_interactions(triggers);
    if !conflicts.is_empty() {
        return Err(TriggerError::StructuralConflicts(conflicts));
    }

    // Pass 1: group triggers by depth and parent key.
    let mut roots: BTreeMap<String, RootAccum<'_>> = BTreeMap::new();
    for trigger in triggers {
        if !trigger.application_command_type.is_registrable() {
            continue;
        }
        let name = trigger.resolved_command_name();
        let parts = command_segments(trigger, &name);
        match parts.len() {
            1 => {
                roots.entry(parts[0].clone()).or_default().direct = Some(trigger);
            }
            2 => {
                roots
                    .entry(parts[0].clone())
                    .or_default()
                    .subcommands
                    .insert(parts[1].clone(), trigger);
            }
            3 => {
                roots
                    .entry(parts[0].clone())
                    .or_default()
                    .groups
                    .entry(parts[1].clone())
                    .or_default()
                    .insert(parts[2].clone(), trigger);
            }
            _ => {}
        }
    }

    // Pass 2: walk the grouping bottom-up into nodes.
    let mut nodes = Vec::new();
    for (root_name, accum) in roots {
        // Depth-1 commands are leaf roots. Message/user commands never
        // nest, so such a leaf may coexist with slash children that share
        // the first word of its name.
        if let Some(trigger) = accum.direct {
            nodes.push(CommandNode {
                name: root_name.clone(),
                description: leaf_description(trigger),
                kind: CommandNodeKind::Root,
                source_trigger: Some(trigger.id),
                children: Vec::new(),
            });
        }
        if accum.subcommands.is_empty() && accum.groups.is_empty() {
            continue;
        }

        let mut children = Vec::new();
        for (group_name, leaves) in accum.groups {
            let group_children = leaves
                .into_iter()
                .map(|(leaf_name, trigger)| CommandNode {
                    name: leaf_name,
                    description: leaf_description(trigger),
                    kind: CommandNodeKind::Subcommand,
                    source_trigger: Some(trigger.id),
                    children: Vec::new(),
                })
                .collect();
            children.push(CommandNode {
                name: group_name,
                description: PLACEHOLDER_DESCRIPTION.to_string(),
                kind: CommandNodeKind::Group,
                source_trigger: None,
                children: group_children,
            });
        }
        for (sub_name, trigger) in accum.subcommands {
            children.push(CommandNode {
                name: sub_name,
                description: leaf_description(trigger),
                kind: CommandNodeKind::Subcommand,
                source_trigger: Some(trigger.id),
                children: Vec::new(),
            });
        }
        nodes.push(CommandNode {
            name: root_name,
            description: PLACEHOLDER_DESCRIPTION.to_string(),
            kind: CommandNodeKind::Root,
            source_trigger: None,
            children,
        });
    }
    Ok(nodes)
}

#[async_trait]
/// Trait contract for `CommandRegistrar` behavior.
///
/// A submission replaces every previously registered command for the tenant
/// (bulk overwrite).
pub trait CommandRegistrar: Send + Sync {
    async fn overwrite_tenant_commands(
        &self,
        tenant_id: TenantId,
        commands: &[CommandNode],
    ) -> Result<(), TriggerError>;
}

/// Builds the tree over the tenant's visible set (its own rows plus global)
/// and submits it. Fails closed on any structural conflict; registrar
/// failures surface directly with no internal retry.
pub async fn submit_command_tree(
    cache: &TriggerCache,
    tenant_id: TenantId,
    registrar: &dyn CommandRegistrar,
) -> Result<usize, TriggerError> {
    let rows = cache.visible_triggers(tenant_id);
    let tree = build_command_tree(&rows)?;
    registrar.overwrite_tenant_commands(tenant_id, &tree).await?;
    Ok(tree.len())
}
