//! Guards team membership changes.
//!
//! Owners can do anything. Everyone else is held to a fixed rule list so that a team manager can
//! neither lock themselves out, touch an owner, nor hand out (or strip) the owner and form
//! designer roles. Rules are checked in order and the first one broken is reported.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::Gate;
use crate::{
    auth::context::AuthorizationContext,
    errors::{Error, Result},
    lookup::RoleLookup,
    types::{FormId, Role, UserId, abbrev_uuid, parse_id},
};

/// A broken role-change rule. The message is returned to the caller verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RoleChangeViolation {
    #[error("You cannot remove yourself from this form")]
    RemoveSelf,
    #[error("You cannot modify an owner's roles")]
    ModifyOwner,
    #[error("You cannot remove a form designer role")]
    RemoveFormDesigner,
    #[error("You cannot remove your own team manager role")]
    RemoveOwnTeamManager,
    #[error("You cannot update an owner's roles")]
    UpdateOwner,
    #[error("You cannot add an owner role")]
    AddOwner,
    #[error("You cannot add a form designer role")]
    AddFormDesigner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleMutationMode {
    /// Body: array of user ids to remove from the form's team
    Remove,
    /// Route `userId` names the target; body: array of `{role}` entries, the target's new roles
    Update,
}

#[derive(Debug, Deserialize)]
struct RoleAssignment {
    role: Role,
}

/// Proposed change, parsed from the request before any rule is evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RoleChange {
    Remove { targets: Vec<UserId> },
    Update { target: UserId, proposed: BTreeSet<Role> },
}

impl RoleChange {
    fn parse(mode: RoleMutationMode, ctx: &AuthorizationContext) -> Result<Self> {
        let body = ctx.body.clone().ok_or_else(|| Error::BadRequest {
            message: "Missing request body".to_string(),
        })?;

        match mode {
            RoleMutationMode::Remove => {
                let raw: Vec<String> = serde_json::from_value(body).map_err(|_| Error::BadRequest {
                    message: "Expected an array of user ids".to_string(),
                })?;
                let targets = raw
                    .iter()
                    .map(|id| parse_id(Some(id), "userId"))
                    .collect::<Result<Vec<_>>>()?;
                Ok(RoleChange::Remove { targets })
            }
            RoleMutationMode::Update => {
                let target = parse_id(ctx.params.get("userId"), "userId")?;
                let assignments: Vec<RoleAssignment> = parse_assignments(body)?;
                Ok(RoleChange::Update {
                    target,
                    proposed: assignments.into_iter().map(|a| a.role).collect(),
                })
            }
        }
    }
}

fn parse_assignments(body: Value) -> Result<Vec<RoleAssignment>> {
    serde_json::from_value(body).map_err(|_| Error::BadRequest {
        message: "Expected an array of role assignments".to_string(),
    })
}

pub struct RoleMutationGuard {
    mode: RoleMutationMode,
    roles: Arc<dyn RoleLookup>,
}

impl RoleMutationGuard {
    pub fn new(mode: RoleMutationMode, roles: Arc<dyn RoleLookup>) -> Self {
        Self { mode, roles }
    }

    async fn current_roles(&self, user_id: UserId, form_id: FormId) -> Result<BTreeSet<Role>> {
        let entries = self.roles.read_user_role(user_id, form_id).await?;
        Ok(entries.into_iter().map(|entry| entry.role).collect())
    }

    async fn check_removal(&self, form_id: FormId, acting: UserId, targets: &[UserId]) -> Result<()> {
        if targets.contains(&acting) {
            return Err(RoleChangeViolation::RemoveSelf.into());
        }

        for target in targets {
            let current = self.current_roles(*target, form_id).await?;
            if current.contains(&Role::Owner) && *target != acting {
                return Err(RoleChangeViolation::ModifyOwner.into());
            }
            if current.contains(&Role::FormDesigner) {
                return Err(RoleChangeViolation::RemoveFormDesigner.into());
            }
        }
        Ok(())
    }

    async fn check_update(&self, form_id: FormId, acting: UserId, target: UserId, proposed: &BTreeSet<Role>) -> Result<()> {
        let current = self.current_roles(target, form_id).await?;
        let holds = |role: Role| current.contains(&role);
        let proposes = |role: Role| proposed.contains(&role);

        let violation = if holds(Role::TeamManager) && !proposes(Role::TeamManager) && target == acting {
            Some(RoleChangeViolation::RemoveOwnTeamManager)
        } else if holds(Role::Owner) && target != acting {
            Some(RoleChangeViolation::UpdateOwner)
        } else if !holds(Role::Owner) && proposes(Role::Owner) {
            Some(RoleChangeViolation::AddOwner)
        } else if holds(Role::FormDesigner) && !proposes(Role::FormDesigner) {
            Some(RoleChangeViolation::RemoveFormDesigner)
        } else if !holds(Role::FormDesigner) && proposes(Role::FormDesigner) {
            Some(RoleChangeViolation::AddFormDesigner)
        } else {
            None
        };

        match violation {
            Some(violation) => Err(violation.into()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Gate for RoleMutationGuard {
    fn name(&self) -> &'static str {
        "role_mutation"
    }

    fn reads_body(&self) -> bool {
        true
    }

    #[instrument(skip_all)]
    async fn check(&self, ctx: &mut AuthorizationContext) -> Result<()> {
        let form_id = ctx.params.form_id()?;
        let change = RoleChange::parse(self.mode, ctx)?;

        let acting = ctx.current_user()?;
        let acting_id = acting
            .id
            .ok_or_else(|| Error::forbidden("Anonymous users cannot change team roles"))?;

        // Ownership comes from this request's grant snapshot
        if acting.active_grant(form_id).is_some_and(|grant| grant.has_role(Role::Owner)) {
            debug!(form_id = %abbrev_uuid(&form_id), "Owner changing roles, no restrictions");
            return Ok(());
        }

        let result = match &change {
            RoleChange::Remove { targets } => self.check_removal(form_id, acting_id, targets).await,
            RoleChange::Update { target, proposed } => self.check_update(form_id, acting_id, *target, proposed).await,
        };

        if let Err(Error::RoleChangeRejected(violation)) = &result {
            debug!(form_id = %abbrev_uuid(&form_id), acting_user = %abbrev_uuid(&acting_id), "Role change rejected: {violation}");
        }
        result
    }
}
