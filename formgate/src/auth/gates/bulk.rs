use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::Gate;
use crate::{
    auth::context::AuthorizationContext,
    errors::{Error, Result},
    lookup::SubmissionLookup,
    types::{SubmissionId, abbrev_uuid, parse_id},
};

/// Restricts a bulk delete to submissions of the one form the caller already proved delete
/// rights on.
///
/// Must run after a [`SubmissionAccessGate`](super::SubmissionAccessGate) requiring
/// SUBMISSION_DELETE in the same chain; that gate records the form this filter compares against.
pub struct BulkSubmissionFilter {
    submissions: Arc<dyn SubmissionLookup>,
}

impl BulkSubmissionFilter {
    pub fn new(submissions: Arc<dyn SubmissionLookup>) -> Self {
        Self { submissions }
    }
}

fn submission_ids(body: Option<&Value>) -> Result<Vec<SubmissionId>> {
    let ids = body
        .and_then(|body| body.get("submissionIds"))
        .and_then(Value::as_array)
        .ok_or_else(|| Error::BadRequest {
            message: "Bad submissionIds".to_string(),
        })?;

    ids.iter().map(|id| parse_id(id.as_str(), "submissionId")).collect()
}

#[async_trait]
impl Gate for BulkSubmissionFilter {
    fn name(&self) -> &'static str {
        "bulk_submission"
    }

    fn reads_body(&self) -> bool {
        true
    }

    #[instrument(skip_all)]
    async fn check(&self, ctx: &mut AuthorizationContext) -> Result<()> {
        let requested = submission_ids(ctx.body.as_ref())?;
        let form_id = ctx.params.form_id()?;

        if ctx.form_id_with_delete_permission() != Some(form_id) {
            debug!(form_id = %abbrev_uuid(&form_id), "No delete rights established on form");
            return Err(Error::forbidden(format!(
                "You do not have permission to delete submissions on form {form_id}"
            )));
        }

        let found = self.submissions.get_multiple_submission(&requested).await?;
        let all_on_form = found.iter().all(|meta| meta.form_id == form_id);

        if !all_on_form || found.len() != requested.len() {
            debug!(
                form_id = %abbrev_uuid(&form_id),
                requested = requested.len(),
                found = found.len(),
                "Bulk request includes submissions outside the form"
            );
            return Err(Error::forbidden(format!(
                "Some submissions do not belong to form {form_id}"
            )));
        }

        Ok(())
    }
}
