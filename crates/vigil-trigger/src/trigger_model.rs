//! Trigger row model shared across the trigger subsystem.
//!
//! A trigger associates a matching key (literal text or a regular
//! expression) with an automated response plus side effects (role grants,
//! reactions, slash-command registration). Rows are owned by a tenant or by
//! the global scope; global rows are visible to every tenant.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::trigger_command_tree::is_valid_command_name;
use crate::trigger_errors::TriggerError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
/// Store-assigned unique trigger row id.
pub struct TriggerId(pub u64);

impl fmt::Display for TriggerId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
/// Isolated scope owning its own trigger set (one community).
pub struct TenantId(pub u64);

impl fmt::Display for TenantId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
/// Chat platform user id.
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
/// Chat platform role id. The tenant "everyone" pseudo-role shares the
/// tenant id.
pub struct RoleId(pub u64);

impl fmt::Display for RoleId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `PrefixKind` values.
pub enum PrefixKind {
    #[default]
    None,
    Global,
    GuildOrGlobal,
    GuildOrNone,
    Custom,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `TriggerEventKind` values.
pub enum TriggerEventKind {
    Message,
    Interaction,
    Button,
    Reaction,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `RoleGrantKind` values.
pub enum RoleGrantKind {
    #[default]
    Sender,
    Mentioned,
    Both,
}

impl RoleGrantKind {
    pub fn includes_sender(self) -> bool {
        matches!(self, RoleGrantKind::Sender | RoleGrantKind::Both)
    }

    /// Whether user mentions in the message content are consumed by this
    /// grant mode (and therefore are not part of the literal match key).
    pub fn consumes_mentions(self) -> bool {
        matches!(self, RoleGrantKind::Mentioned | RoleGrantKind::Both)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `ApplicationCommandKind` values.
pub enum ApplicationCommandKind {
    #[default]
    None,
    Slash,
    Message,
    User,
}

impl ApplicationCommandKind {
    pub fn is_registrable(self) -> bool {
        self != ApplicationCommandKind::None
    }
}

fn default_valid_trigger_types() -> BTreeSet<TriggerEventKind> {
    BTreeSet::from([TriggerEventKind::Message])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Public struct `Trigger` used across Vigil components.
pub struct Trigger {
    pub id: TriggerId,
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    pub trigger_text: String,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub is_regex: bool,
    #[serde(default)]
    pub allow_target: bool,
    #[serde(default)]
    pub contains_anywhere: bool,
    #[serde(default)]
    pub prefix_type: PrefixKind,
    #[serde(default)]
    pub custom_prefix: Option<String>,
    #[serde(default = "default_valid_trigger_types")]
    pub valid_trigger_types: BTreeSet<TriggerEventKind>,
    #[serde(default)]
    pub role_grant_type: RoleGrantKind,
    #[serde(default)]
    pub granted_role_ids: Vec<RoleId>,
    #[serde(default)]
    pub removed_role_ids: Vec<RoleId>,
    #[serde(default)]
    pub application_command_type: ApplicationCommandKind,
    #[serde(default)]
    pub application_command_name: Option<String>,
    #[serde(default)]
    pub reactions: Vec<String>,
    #[serde(default)]
    pub no_respond: bool,
    #[serde(default)]
    pub react_to_trigger: bool,
    #[serde(default)]
    pub auto_delete_trigger: bool,
    #[serde(default)]
    pub dm_response: bool,
}

impl Trigger {
    /// Builds a message trigger with default flags; mutate fields to opt in
    /// to other behaviors.
    pub fn new(
        id: TriggerId,
        tenant_id: Option<TenantId>,
        trigger_text: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            trigger_text: trigger_text.into(),
            response: response.into(),
            is_regex: false,
            allow_target: false,
            contains_anywhere: false,
            prefix_type: PrefixKind::None,
            custom_prefix: None,
            valid_trigger_types: default_valid_trigger_types(),
            role_grant_type: RoleGrantKind::Sender,
            granted_role_ids: Vec::new(),
            removed_role_ids: Vec::new(),
            application_command_type: ApplicationCommandKind::None,
            application_command_name: None,
            reactions: Vec::new(),
            no_respond: false,
            react_to_trigger: false,
            auto_delete_trigger: false,
            dm_response: false,
        }
    }

    /// The name this trigger would register under with the external command
    /// registrar: the explicit override when present, else the trigger text.
    /// Names are resolved lower-case; the registrar treats names
    /// case-insensitively.
    pub fn resolved_command_name(&self) -> String {
        let raw = self
            .application_command_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.trigger_text.trim());
        raw.to_lowercase()
    }
}

pub fn validate_trigger(trigger: &Trigger) -> Result<(), TriggerError> {
    if trigger.trigger_text.trim().is_empty() {
        return Err(TriggerError::Validation(
            "trigger text must not be empty".to_string(),
        ));
    }
    match trigger.prefix_type {
        PrefixKind::Custom => {
            let has_prefix = trigger
                .custom_prefix
                .as_deref()
                .is_some_and(|prefix| !prefix.is_empty());
            if !has_prefix {
                return Err(TriggerError::Validation(
                    "custom prefix type requires a non-empty custom_prefix".to_string(),
                ));
            }
        }
        _ => {
            if trigger.custom_prefix.is_some() {
                return Err(TriggerError::Validation(format!(
                    "custom_prefix is only valid with the custom prefix type, not {:?}",
                    trigger.prefix_type
                )));
            }
        }
    }
    if trigger.valid_trigger_types.is_empty() {
        return Err(TriggerError::Validation(
            "trigger must accept at least one event kind".to_string(),
        ));
    }
    if trigger.application_command_type == ApplicationCommandKind::Slash {
        let name = trigger.resolved_command_name();
        if !is_valid_command_name(&name, ApplicationCommandKind::Slash) {
            return Err(TriggerError::Validation(format!(
                "slash command name '{name}' is not registrable"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        validate_trigger, ApplicationCommandKind, PrefixKind, TenantId, Trigger, TriggerId,
    };

    fn sample() -> Trigger {
        Trigger::new(TriggerId(1), Some(TenantId(10)), "ping", "pong")
    }

    #[test]
    fn unit_validate_trigger_accepts_minimal_message_trigger() {
        validate_trigger(&sample()).expect("minimal trigger should validate");
    }

    #[test]
    fn unit_validate_trigger_rejects_empty_text() {
        let mut trigger = sample();
        trigger.trigger_text = "   ".to_string();
        let error = validate_trigger(&trigger).expect_err("empty text should fail");
        assert!(error.to_string().contains("must not be empty"));
    }

    #[test]
    fn unit_validate_trigger_requires_custom_prefix_iff_custom_kind() {
        let mut trigger = sample();
        trigger.prefix_type = PrefixKind::Custom;
        assert!(validate_trigger(&trigger).is_err());

        trigger.custom_prefix = Some("?".to_string());
        validate_trigger(&trigger).expect("custom prefix should validate");

        trigger.prefix_type = PrefixKind::Global;
        assert!(validate_trigger(&trigger).is_err());
    }

    #[test]
    fn unit_validate_trigger_rejects_unregistrable_slash_name() {
        let mut trigger = sample();
        trigger.application_command_type = ApplicationCommandKind::Slash;
        trigger.trigger_text = "not a valid!name".to_string();
        let error = validate_trigger(&trigger).expect_err("bad slash name should fail");
        assert!(error.to_string().contains("not registrable"));
    }

    #[test]
    fn unit_resolved_command_name_prefers_non_empty_override() {
        let mut trigger = sample();
        trigger.application_command_name = Some("  Greet  ".to_string());
        assert_eq!(trigger.resolved_command_name(), "greet");

        trigger.application_command_name = Some("   ".to_string());
        assert_eq!(trigger.resolved_command_name(), "ping");
    }
}
