//! The per-request user snapshot the gates decide against.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::{FormId, Permission, PermissionSet, Role, UserId};

/// What a user may do on one form, as resolved for this request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormGrant {
    pub form_id: FormId,
    #[serde(default)]
    pub permissions: PermissionSet,
    #[serde(default)]
    pub roles: BTreeSet<Role>,
}

impl FormGrant {
    pub fn new(form_id: FormId, permissions: impl IntoIterator<Item = Permission>, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            form_id,
            permissions: permissions.into_iter().collect(),
            roles: roles.into_iter().collect(),
        }
    }

    /// ALL semantics: every required permission must be granted.
    pub fn satisfies(&self, required: &PermissionSet) -> bool {
        required.is_subset(&self.permissions)
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// The caller, as returned by the session service.
///
/// Built once per request by the session resolver and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    /// `None` for the anonymous user
    pub id: Option<UserId>,
    /// User id at the identity provider (the token subject)
    pub idp_user_id: Option<String>,
    #[serde(default)]
    pub forms: Vec<FormGrant>,
    /// Grants on forms that have since been soft-deleted
    #[serde(default)]
    pub deleted_forms: Vec<FormGrant>,
    /// Set when the caller presented a per-form API key instead of a session
    #[serde(default)]
    pub api_user: bool,
}

impl CurrentUser {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.id.is_none()
    }

    /// Grant on an active form.
    pub fn active_grant(&self, form_id: FormId) -> Option<&FormGrant> {
        self.forms.iter().find(|grant| grant.form_id == form_id)
    }

    /// Grant on an active form, falling back to soft-deleted forms.
    pub fn grant(&self, form_id: FormId) -> Option<&FormGrant> {
        self.active_grant(form_id)
            .or_else(|| self.deleted_forms.iter().find(|grant| grant.form_id == form_id))
    }
}
