use async_trait::async_trait;
use tracing::{debug, instrument};

use super::Gate;
use crate::{
    auth::context::AuthorizationContext,
    errors::{Error, Result},
    types::{Permission, PermissionSet, abbrev_uuid, display_permissions},
};

/// Requires every listed permission on the form named by the `formId` route parameter.
///
/// The grant is looked up among the user's active forms first, then among soft-deleted forms, so
/// restore and read-after-delete routes keep working. API-key callers always pass.
#[derive(Debug, Clone)]
pub struct FormAccessGate {
    required: PermissionSet,
}

impl FormAccessGate {
    pub fn new(required: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            required: required.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Gate for FormAccessGate {
    fn name(&self) -> &'static str {
        "form_access"
    }

    #[instrument(skip_all)]
    async fn check(&self, ctx: &mut AuthorizationContext) -> Result<()> {
        if ctx.is_api_user() {
            return Ok(());
        }

        let user = ctx.current_user()?;
        let form_id = ctx.params.form_id()?;

        let grant = user
            .grant(form_id)
            .ok_or_else(|| Error::forbidden(format!("You do not have access to form {form_id}")))?;

        if !grant.satisfies(&self.required) {
            debug!(form_id = %abbrev_uuid(&form_id), required = %display_permissions(&self.required), "Grant lacks required permissions");
            return Err(Error::forbidden(format!(
                "You do not have permission to perform this action on form {form_id}"
            )));
        }

        Ok(())
    }
}
