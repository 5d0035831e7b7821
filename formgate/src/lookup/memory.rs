//! Collaborators answered from a YAML fixture.
//!
//! ```yaml
//! users:
//!   - sub: jdoe@idir
//!     id: 6f1c3c1e-5f43-4a5e-9d3b-1b1a3f2f6c11
//!     forms:
//!       - formId: 0f8fad5b-d9cb-469f-a165-70867728950e
//!         roles: [owner]
//!         permissions: [form_read, form_update, team_read, team_update]
//! forms:
//!   - id: 0f8fad5b-d9cb-469f-a165-70867728950e
//!     identityProviders: [{code: public}]
//! submissions:
//!   - id: 7c9e6679-7425-40de-944b-e07fc1f90ae7
//!     formId: 0f8fad5b-d9cb-469f-a165-70867728950e
//!     sharedWith:
//!       - userId: 6f1c3c1e-5f43-4a5e-9d3b-1b1a3f2f6c11
//!         permissions: [submission_read]
//! ```

use anyhow::Context;
use async_trait::async_trait;
use figment::{
    Figment,
    providers::{Format, Yaml},
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    FormRoleEntry, FormSummary, IdentityProvider, LookupError, Result, RoleLookup, SessionService, SubmissionFormView, SubmissionLookup,
    SubmissionMetadata, SubmissionSummary,
};
use crate::{
    auth::{
        current_user::{CurrentUser, FormGrant},
        token::TokenClaims,
    },
    types::{FormId, Permission, PermissionSet, Role, SubmissionId, UserId},
};

/// Permissions every caller gets on a public form.
const PUBLIC_FORM_PERMISSIONS: [Permission; 2] = [Permission::FormRead, Permission::SubmissionCreate];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Fixture {
    pub users: Vec<FixtureUser>,
    pub forms: Vec<FixtureForm>,
    pub submissions: Vec<FixtureSubmission>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FixtureUser {
    /// Token subject
    pub sub: String,
    pub id: UserId,
    #[serde(default)]
    pub forms: Vec<FormGrant>,
    #[serde(default)]
    pub deleted_forms: Vec<FormGrant>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FixtureForm {
    pub id: FormId,
    #[serde(default)]
    pub identity_providers: Vec<IdentityProvider>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FixtureSubmission {
    pub id: SubmissionId,
    pub form_id: FormId,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub shared_with: Vec<SharedPermission>,
}

/// Permissions delegated on one submission to one user.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SharedPermission {
    pub user_id: UserId,
    pub permissions: PermissionSet,
}

/// [`SessionService`], [`SubmissionLookup`] and [`RoleLookup`] over a [`Fixture`].
#[derive(Debug, Clone)]
pub struct StaticDirectory {
    users: HashMap<String, FixtureUser>,
    forms: HashMap<FormId, FixtureForm>,
    submissions: HashMap<SubmissionId, FixtureSubmission>,
}

impl StaticDirectory {
    pub fn new(fixture: Fixture) -> Self {
        Self {
            users: fixture.users.into_iter().map(|user| (user.sub.clone(), user)).collect(),
            forms: fixture.forms.into_iter().map(|form| (form.id, form)).collect(),
            submissions: fixture.submissions.into_iter().map(|s| (s.id, s)).collect(),
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        anyhow::ensure!(path.exists(), "Directory fixture {} does not exist", path.display());
        let fixture: Fixture = Figment::from(Yaml::file(path))
            .extract()
            .with_context(|| format!("Failed to parse directory fixture {}", path.display()))?;

        info!(
            users = fixture.users.len(),
            forms = fixture.forms.len(),
            submissions = fixture.submissions.len(),
            "Loaded directory fixture from {}",
            path.display()
        );
        Ok(Self::new(fixture))
    }

    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let fixture: Fixture = Figment::from(Yaml::string(yaml)).extract()?;
        Ok(Self::new(fixture))
    }

    fn user_by_id(&self, user_id: UserId) -> Option<&FixtureUser> {
        self.users.values().find(|user| user.id == user_id)
    }

    fn form_summary(&self, form_id: FormId) -> Result<FormSummary> {
        let form = self.forms.get(&form_id).ok_or_else(|| LookupError::NotFound {
            resource: "Form".to_string(),
            id: form_id.to_string(),
        })?;
        Ok(FormSummary {
            id: form.id,
            identity_providers: form.identity_providers.clone(),
        })
    }

    fn public_grants(&self) -> Vec<FormGrant> {
        self.forms
            .values()
            .filter(|form| form.identity_providers.iter().any(|idp| idp.code == IdentityProvider::PUBLIC))
            .map(|form| FormGrant::new(form.id, PUBLIC_FORM_PERMISSIONS, std::iter::empty::<Role>()))
            .collect()
    }
}

#[async_trait]
impl SessionService for StaticDirectory {
    #[instrument(skip_all)]
    async fn login(&self, claims: Option<&TokenClaims>, params: &HashMap<String, String>) -> Result<CurrentUser> {
        let mut user = match claims {
            Some(claims) => match self.users.get(&claims.sub) {
                Some(known) => CurrentUser {
                    id: Some(known.id),
                    idp_user_id: Some(known.sub.clone()),
                    forms: known.forms.clone(),
                    deleted_forms: known.deleted_forms.clone(),
                    api_user: false,
                },
                // Signed-in but unknown to the forms API: a user with no grants
                None => CurrentUser {
                    id: Some(Uuid::new_v5(&Uuid::NAMESPACE_URL, claims.sub.as_bytes())),
                    idp_user_id: Some(claims.sub.clone()),
                    ..Default::default()
                },
            },
            None => CurrentUser {
                forms: self.public_grants(),
                ..Default::default()
            },
        };

        if let Some(form_id) = params.get("formId").and_then(|raw| Uuid::parse_str(raw).ok()) {
            user.forms.retain(|grant| grant.form_id == form_id);
            user.deleted_forms.retain(|grant| grant.form_id == form_id);
        }

        Ok(user)
    }
}

#[async_trait]
impl SubmissionLookup for StaticDirectory {
    async fn get_submission_form(&self, submission_id: SubmissionId) -> Result<SubmissionFormView> {
        let submission = self.submissions.get(&submission_id).ok_or_else(|| LookupError::NotFound {
            resource: "Submission".to_string(),
            id: submission_id.to_string(),
        })?;

        Ok(SubmissionFormView {
            form: self.form_summary(submission.form_id)?,
            submission: SubmissionSummary {
                id: submission.id,
                deleted: submission.deleted,
            },
        })
    }

    async fn check_submission_permission(
        &self,
        user: &CurrentUser,
        submission_id: SubmissionId,
        permissions: &PermissionSet,
    ) -> Result<bool> {
        let Some(user_id) = user.id else {
            return Ok(false);
        };
        let allowed = self.submissions.get(&submission_id).is_some_and(|submission| {
            submission
                .shared_with
                .iter()
                .any(|shared| shared.user_id == user_id && permissions.is_subset(&shared.permissions))
        });
        Ok(allowed)
    }

    async fn get_multiple_submission(&self, submission_ids: &[SubmissionId]) -> Result<Vec<SubmissionMetadata>> {
        let mut found: Vec<SubmissionMetadata> = submission_ids
            .iter()
            .filter_map(|id| self.submissions.get(id))
            .map(|submission| SubmissionMetadata {
                id: submission.id,
                form_id: submission.form_id,
            })
            .collect();
        // One record per submission, however often it was requested
        found.sort_by_key(|meta| meta.id);
        found.dedup_by_key(|meta| meta.id);
        Ok(found)
    }
}

#[async_trait]
impl RoleLookup for StaticDirectory {
    async fn read_user_role(&self, user_id: UserId, form_id: FormId) -> Result<Vec<FormRoleEntry>> {
        let roles = self
            .user_by_id(user_id)
            .and_then(|user| user.forms.iter().find(|grant| grant.form_id == form_id))
            .map(|grant| grant.roles.iter().map(|role| FormRoleEntry { role: *role }).collect())
            .unwrap_or_default();
        Ok(roles)
    }
}
