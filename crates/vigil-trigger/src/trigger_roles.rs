//! Computes and applies role changes after a trigger fires.
//!
//! Each affected user's new role set is the current set minus the tenant
//! "everyone" pseudo-role, minus the trigger's removed roles, plus granted
//! roles not already held. Unchanged sets are skipped. Per-user apply
//! failures are logged and isolated; they never abort the remaining users.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::trigger_errors::TriggerError;
use crate::trigger_model::{RoleId, TenantId, Trigger, UserId};

/// Most mentioned users one firing may grant roles to.
pub const MAX_MENTION_GRANTS: usize = 5;

#[async_trait]
/// Trait contract for `RolePlatform` behavior.
pub trait RolePlatform: Send + Sync {
    /// The user's current roles, excluding or including the "everyone"
    /// pseudo-role; the engine filters it out either way.
    async fn member_roles(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> Result<Vec<RoleId>, TriggerError>;

    async fn replace_member_roles(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        roles: &[RoleId],
    ) -> Result<(), TriggerError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Per-firing outcome summary; failures carry one diagnostic line each.
pub struct RoleApplyReport {
    pub applied: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub diagnostics: Vec<String>,
}

/// The tenant's "everyone" pseudo-role shares the tenant id.
fn everyone_role(tenant_id: TenantId) -> RoleId {
    RoleId(tenant_id.0)
}

/// Computes the user's new role list, or `None` when nothing would change.
pub fn compute_role_update(
    current: &[RoleId],
    trigger: &Trigger,
    everyone: RoleId,
) -> Option<Vec<RoleId>> {
    let mut next: Vec<RoleId> = current
        .iter()
        .copied()
        .filter(|role| *role != everyone)
        .filter(|role| !trigger.removed_role_ids.contains(role))
        .collect();
    for granted in &trigger.granted_role_ids {
        if *granted != everyone && !next.contains(granted) {
            next.push(*granted);
        }
    }

    let current_set: BTreeSet<RoleId> = current
        .iter()
        .copied()
        .filter(|role| *role != everyone)
        .collect();
    let next_set: BTreeSet<RoleId> = next.iter().copied().collect();
    if next_set == current_set {
        None
    } else {
        Some(next)
    }
}

async fn apply_for_user(
    platform: &dyn RolePlatform,
    tenant_id: TenantId,
    user_id: UserId,
    trigger: &Trigger,
) -> Result<bool, TriggerError> {
    let current = platform.member_roles(tenant_id, user_id).await?;
    match compute_role_update(&current, trigger, everyone_role(tenant_id)) {
        Some(next) => {
            platform
                .replace_member_roles(tenant_id, user_id, &next)
                .await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Applies the firing trigger's role changes to every affected user: the
/// sender for `Sender`/`Both` grants, mentioned users (capped at
/// `MAX_MENTION_GRANTS`) for `Mentioned`/`Both`.
pub async fn apply_role_grants(
    platform: &dyn RolePlatform,
    tenant_id: TenantId,
    trigger: &Trigger,
    sender: UserId,
    mentioned: &[UserId],
) -> RoleApplyReport {
    let mut report = RoleApplyReport::default();
    if trigger.granted_role_ids.is_empty() && trigger.removed_role_ids.is_empty() {
        return report;
    }

    let mut targets: Vec<UserId> = Vec::new();
    if trigger.role_grant_type.includes_sender() {
        targets.push(sender);
    }
    if trigger.role_grant_type.consumes_mentions() {
        for user_id in mentioned.iter().take(MAX_MENTION_GRANTS) {
            if !targets.contains(user_id) {
                targets.push(*user_id);
            }
        }
    }

    for user_id in targets {
        match apply_for_user(platform, tenant_id, user_id, trigger).await {
            Ok(true) => report.applied += 1,
            Ok(false) => report.unchanged += 1,
            Err(error) => {
                tracing::warn!(%tenant_id, %user_id, %error, "role update failed for user");
                report.failed += 1;
                report
                    .diagnostics
                    .push(format!("user {user_id}: {error}"));
            }
        }
    }
    report
}
