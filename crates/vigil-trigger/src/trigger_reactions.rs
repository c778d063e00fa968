//! Matches reaction-add events against reaction-mode triggers.
//!
//! A reaction is a broadcast event: every matching trigger fires
//! independently, unlike message matching which selects exactly one. The
//! asymmetry is intentional.

use crate::trigger_model::{Trigger, TriggerEventKind};

#[derive(Debug, Clone, PartialEq, Eq)]
/// A reaction-add event carries an emote identifier only, no text.
pub struct ReactionEvent {
    pub emote_name: String,
    /// Present for custom emotes; unicode emotes have no id.
    pub emote_id: Option<u64>,
}

impl ReactionEvent {
    /// The full `<:name:id>` identifier for custom emotes.
    pub fn full_identifier(&self) -> Option<String> {
        self.emote_id
            .map(|id| format!("<:{}:{}>", self.emote_name, id))
    }
}

/// Returns every reaction-mode trigger matching the event, comparing
/// case-insensitively on the emote name or the full identifier.
pub fn match_reaction<'a>(event: &ReactionEvent, triggers: &'a [Trigger]) -> Vec<&'a Trigger> {
    let name = event.emote_name.trim().to_lowercase();
    if name.is_empty() {
        return Vec::new();
    }
    let full = event.full_identifier().map(|id| id.to_lowercase());
    triggers
        .iter()
        .filter(|trigger| {
            trigger
                .valid_trigger_types
                .contains(&TriggerEventKind::Reaction)
        })
        .filter(|trigger| {
            let key = trigger.trigger_text.trim().to_lowercase();
            key == name || full.as_deref() == Some(key.as_str())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{match_reaction, ReactionEvent};
    use crate::trigger_model::{TenantId, Trigger, TriggerEventKind, TriggerId};

    fn reaction_trigger(id: u64, text: &str) -> Trigger {
        let mut trigger = Trigger::new(TriggerId(id), Some(TenantId(1)), text, "hi");
        trigger.valid_trigger_types = BTreeSet::from([TriggerEventKind::Reaction]);
        trigger
    }

    #[test]
    fn functional_all_matching_reaction_triggers_fire() {
        let triggers = vec![
            reaction_trigger(1, "wave"),
            reaction_trigger(2, "WAVE"),
            reaction_trigger(3, "clap"),
        ];
        let event = ReactionEvent {
            emote_name: "Wave".to_string(),
            emote_id: None,
        };
        let matched = match_reaction(&event, &triggers);
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn unit_full_identifier_matches_custom_emote_trigger() {
        let triggers = vec![reaction_trigger(1, "<:blob:42>")];
        let event = ReactionEvent {
            emote_name: "Blob".to_string(),
            emote_id: Some(42),
        };
        assert_eq!(match_reaction(&event, &triggers).len(), 1);
    }

    #[test]
    fn unit_message_only_triggers_do_not_fire_on_reactions() {
        let triggers = vec![Trigger::new(TriggerId(1), None, "wave", "hi")];
        let event = ReactionEvent {
            emote_name: "wave".to_string(),
            emote_id: None,
        };
        assert!(match_reaction(&event, &triggers).is_empty());
    }
}
