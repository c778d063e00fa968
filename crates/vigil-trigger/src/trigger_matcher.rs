//! Resolves message text against a tenant's trigger set.
//!
//! At most one trigger fires per message. Every candidate goes through
//! prefix resolution, normalization, and either regex evaluation under a
//! wall-clock budget or literal comparison (exact, standalone-word
//! contains, or target-prefixed). When several triggers pass, one is picked
//! uniformly at random so identically-keyed rows (duplicate imports) all
//! stay reachable.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use rand::Rng;
use regex::{Regex, RegexBuilder};

use crate::trigger_model::{Trigger, TriggerEventKind, TriggerId, UserId};

pub const DEFAULT_PREFIX: &str = "!";
pub const DEFAULT_REGEX_TIME_BUDGET: Duration = Duration::from_millis(2);
pub const DEFAULT_REGEX_SIZE_LIMIT: usize = 1 << 20;
pub const DEFAULT_REGEX_DFA_SIZE_LIMIT: usize = 1 << 20;

#[derive(Debug, Clone)]
/// Public struct `MatcherConfig` used across Vigil components.
pub struct MatcherConfig {
    /// Process-global fallback prefix for `Global` and `GuildOrGlobal`
    /// triggers.
    pub default_prefix: String,
    /// Wall-clock budget for one regex evaluation; exceeding it counts as a
    /// non-match.
    pub regex_time_budget: Duration,
    pub regex_size_limit: usize,
    pub regex_dfa_size_limit: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            default_prefix: DEFAULT_PREFIX.to_string(),
            regex_time_budget: DEFAULT_REGEX_TIME_BUDGET,
            regex_size_limit: DEFAULT_REGEX_SIZE_LIMIT,
            regex_dfa_size_limit: DEFAULT_REGEX_DFA_SIZE_LIMIT,
        }
    }
}

#[derive(Debug, Clone)]
/// A firing trigger plus what the match extracted from the content.
pub struct TriggerHit {
    pub trigger: Trigger,
    /// Payload following the trigger text for `allow_target` matches.
    pub target: Option<String>,
    /// User mentions consumed from the content, in order of appearance.
    pub mentioned_user_ids: Vec<UserId>,
}

struct CachedRegex {
    pattern: String,
    compiled: Option<Regex>,
}

/// Public struct `TriggerMatcher` used across Vigil components.
pub struct TriggerMatcher {
    config: MatcherConfig,
    regex_cache: Mutex<HashMap<TriggerId, CachedRegex>>,
}

impl TriggerMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            config,
            regex_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves `content` against the candidate set and returns at most one
    /// firing trigger. `tenant_prefix` is the tenant's configured prefix, if
    /// any.
    pub fn match_message(
        &self,
        content: &str,
        triggers: &[Trigger],
        tenant_prefix: Option<&str>,
    ) -> Option<TriggerHit> {
        let mut hits: Vec<TriggerHit> = triggers
            .iter()
            .filter(|trigger| {
                trigger
                    .valid_trigger_types
                    .contains(&TriggerEventKind::Message)
            })
            .filter_map(|trigger| self.evaluate(content, trigger, tenant_prefix))
            .collect();
        match hits.len() {
            0 => None,
            1 => hits.pop(),
            count => {
                let index = rand::thread_rng().gen_range(0..count);
                Some(hits.swap_remove(index))
            }
        }
    }

    fn evaluate(
        &self,
        content: &str,
        trigger: &Trigger,
        tenant_prefix: Option<&str>,
    ) -> Option<TriggerHit> {
        let stripped = strip_required_prefix(
            content.trim_start(),
            trigger,
            tenant_prefix,
            &self.config.default_prefix,
        )?;
        let normalized = stripped.trim().to_lowercase();

        if trigger.is_regex {
            let mentioned_user_ids = if trigger.role_grant_type.consumes_mentions() {
                collect_user_mentions(&normalized)
            } else {
                Vec::new()
            };
            return self.evaluate_regex(&normalized, trigger).then(|| TriggerHit {
                trigger: trigger.clone(),
                target: None,
                mentioned_user_ids,
            });
        }

        let key = trigger.trigger_text.trim().to_lowercase();
        if key.is_empty() {
            return None;
        }

        let (content, mentioned_user_ids) = if trigger.role_grant_type.consumes_mentions() {
            strip_user_mentions(&normalized)
        } else {
            (normalized, Vec::new())
        };

        let hit = |target: Option<String>| TriggerHit {
            trigger: trigger.clone(),
            target,
            mentioned_user_ids: mentioned_user_ids.clone(),
        };

        if content.len() > key.len() {
            if trigger.allow_target {
                if let Some(payload) = target_payload(&content, &key) {
                    return Some(hit(Some(payload)));
                }
            }
            if trigger.contains_anywhere && contains_standalone_word(&content, &key) {
                return Some(hit(None));
            }
            None
        } else if content == key {
            Some(hit(None))
        } else {
            None
        }
    }

    fn evaluate_regex(&self, content: &str, trigger: &Trigger) -> bool {
        let Some(regex) = self.compiled_regex_for(trigger) else {
            return false;
        };
        let started = Instant::now();
        let matched = regex.is_match(content);
        let elapsed = started.elapsed();
        if elapsed > self.config.regex_time_budget {
            tracing::warn!(
                trigger_id = trigger.id.0,
                elapsed_micros = elapsed.as_micros() as u64,
                "regex evaluation exceeded time budget; treated as non-match"
            );
            return false;
        }
        matched
    }

    fn compiled_regex_for(&self, trigger: &Trigger) -> Option<Regex> {
        let mut cache = self.regex_cache.lock().expect("regex cache lock poisoned");
        if let Some(entry) = cache.get(&trigger.id) {
            if entry.pattern == trigger.trigger_text {
                return entry.compiled.clone();
            }
        }
        let compiled = match RegexBuilder::new(&trigger.trigger_text)
            .case_insensitive(true)
            .size_limit(self.config.regex_size_limit)
            .dfa_size_limit(self.config.regex_dfa_size_limit)
            .build()
        {
            Ok(regex) => Some(regex),
            Err(error) => {
                tracing::warn!(
                    trigger_id = trigger.id.0,
                    %error,
                    "trigger pattern failed to compile; trigger will never match"
                );
                None
            }
        };
        cache.insert(
            trigger.id,
            CachedRegex {
                pattern: trigger.trigger_text.clone(),
                compiled: compiled.clone(),
            },
        );
        compiled
    }
}

impl Default for TriggerMatcher {
    fn default() -> Self {
        Self::new(MatcherConfig::default())
    }
}

/// Strips the prefix the trigger requires, or returns `None` when the
/// content does not carry it. `GuildOrNone` triggers can never match on a
/// tenant without a configured prefix.
fn strip_required_prefix<'a>(
    content: &'a str,
    trigger: &Trigger,
    tenant_prefix: Option<&str>,
    default_prefix: &str,
) -> Option<&'a str> {
    use crate::trigger_model::PrefixKind;

    let required = match trigger.prefix_type {
        PrefixKind::None => return Some(content),
        PrefixKind::Global => default_prefix,
        PrefixKind::GuildOrGlobal => tenant_prefix.unwrap_or(default_prefix),
        PrefixKind::GuildOrNone => tenant_prefix?,
        PrefixKind::Custom => trigger
            .custom_prefix
            .as_deref()
            .filter(|prefix| !prefix.is_empty())?,
    };
    content.strip_prefix(required)
}

/// The `allow_target` form: trigger text, exactly one space, then a
/// non-empty payload.
fn target_payload(content: &str, key: &str) -> Option<String> {
    let rest = content.strip_prefix(key)?;
    let payload = rest.strip_prefix(' ')?;
    if payload.is_empty() || payload.starts_with(' ') {
        return None;
    }
    Some(payload.to_string())
}

fn is_word_char(character: Option<char>) -> bool {
    character.is_some_and(|c| c.is_alphanumeric() || c == '_')
}

/// Whether `needle` occurs in `content` with no word-character neighbours.
fn contains_standalone_word(content: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let mut from = 0;
    while let Some(found) = content[from..].find(needle) {
        let begin = from + found;
        let end = begin + needle.len();
        let before = content[..begin].chars().next_back();
        let after = content[end..].chars().next();
        if !is_word_char(before) && !is_word_char(after) {
            return true;
        }
        from = end;
    }
    false
}

fn mention_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<@!?(\d+)>").expect("mention pattern compiles"))
}

/// Extracts mentioned user ids without altering the content.
pub fn collect_user_mentions(content: &str) -> Vec<UserId> {
    mention_pattern()
        .captures_iter(content)
        .filter_map(|captures| captures[1].parse::<u64>().ok().map(UserId))
        .collect()
}

/// Removes user mention tokens from the content and collapses the leftover
/// whitespace, returning the extracted ids in order of appearance.
pub fn strip_user_mentions(content: &str) -> (String, Vec<UserId>) {
    let ids = collect_user_mentions(content);
    let stripped = mention_pattern().replace_all(content, "");
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    (collapsed, ids)
}
