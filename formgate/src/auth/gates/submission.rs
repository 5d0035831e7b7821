use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

use super::Gate;
use crate::{
    auth::{context::AuthorizationContext, current_user::CurrentUser},
    errors::{Error, Result},
    lookup::{SubmissionFormView, SubmissionLookup},
    types::{Permission, PermissionSet, abbrev_uuid, parse_id},
};

/// Route parameter carrying the submission id.
pub const SUBMISSION_ID_PARAM: &str = "formSubmissionId";

/// Requires permissions on the submission named by `formSubmissionId`.
///
/// Access is granted, in order, by:
/// 1. the caller's grant on the submission's form (the only path for deleted submissions)
/// 2. the form being public, for plain reads
/// 3. permissions delegated on the submission itself
///
/// When access comes from the form grant and includes a delete-capable permission, the form id is
/// recorded in the context for [`BulkSubmissionFilter`](super::BulkSubmissionFilter).
pub struct SubmissionAccessGate {
    required: PermissionSet,
    submissions: Arc<dyn SubmissionLookup>,
}

impl SubmissionAccessGate {
    pub fn new(required: impl IntoIterator<Item = Permission>, submissions: Arc<dyn SubmissionLookup>) -> Self {
        Self {
            required: required.into_iter().collect(),
            submissions,
        }
    }

    /// Only SUBMISSION_READ on its own opens a public form's submissions.
    fn is_public_read(&self, view: &SubmissionFormView) -> bool {
        self.required.len() == 1 && self.required.contains(&Permission::SubmissionRead) && view.form.is_public()
    }

    /// Form-level path. Soft-deleted form grants do not count here.
    fn check_form_grant(&self, user: &CurrentUser, view: &SubmissionFormView) -> bool {
        user.active_grant(view.form.id)
            .is_some_and(|grant| grant.satisfies(&self.required))
    }

    fn grants_delete(&self) -> bool {
        self.required.iter().any(|permission| permission.is_delete_capable())
    }
}

#[async_trait]
impl Gate for SubmissionAccessGate {
    fn name(&self) -> &'static str {
        "submission_access"
    }

    #[instrument(skip_all)]
    async fn check(&self, ctx: &mut AuthorizationContext) -> Result<()> {
        if ctx.is_api_user() {
            return Ok(());
        }

        let submission_id = parse_id(ctx.params.get(SUBMISSION_ID_PARAM), "submissionId")?;
        let user = ctx.current_user()?;

        let view = self.submissions.get_submission_form(submission_id).await?;
        let form_id = view.form.id;
        trace!(
            submission_id = %abbrev_uuid(&submission_id),
            form_id = %abbrev_uuid(&form_id),
            deleted = view.submission.deleted,
            "Fetched submission form"
        );

        if self.check_form_grant(user, &view) {
            if self.grants_delete() {
                ctx.record_delete_permission(form_id);
            }
            return Ok(());
        }

        if view.submission.deleted {
            debug!(submission_id = %abbrev_uuid(&submission_id), "Deleted submission without form grant");
            return Err(Error::forbidden(format!(
                "You do not have access to submission {submission_id}"
            )));
        }

        if self.is_public_read(&view) {
            return Ok(());
        }

        if self
            .submissions
            .check_submission_permission(user, submission_id, &self.required)
            .await?
        {
            return Ok(());
        }

        Err(Error::forbidden(format!(
            "You do not have permission to perform this action on submission {submission_id}"
        )))
    }
}
