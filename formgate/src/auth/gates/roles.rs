use async_trait::async_trait;
use tracing::{debug, instrument};

use super::Gate;
use crate::{
    auth::context::AuthorizationContext,
    errors::{Error, Result},
    types::{Role, abbrev_uuid},
};

/// Requires roles on the form named by the `formId` route parameter.
///
/// With `require_all`, every listed role must be held; listing a role twice does not make a single
/// holding count twice. Otherwise one held role is enough. There is no API-key bypass.
#[derive(Debug, Clone)]
pub struct RoleMembershipGate {
    required: Vec<Role>,
    require_all: bool,
}

impl RoleMembershipGate {
    pub fn all(required: impl IntoIterator<Item = Role>) -> Self {
        Self {
            required: required.into_iter().collect(),
            require_all: true,
        }
    }

    pub fn any(required: impl IntoIterator<Item = Role>) -> Self {
        Self {
            required: required.into_iter().collect(),
            require_all: false,
        }
    }
}

#[async_trait]
impl Gate for RoleMembershipGate {
    fn name(&self) -> &'static str {
        "role_membership"
    }

    #[instrument(skip_all)]
    async fn check(&self, ctx: &mut AuthorizationContext) -> Result<()> {
        let form_id = ctx.params.form_id()?;
        let user = ctx.current_user()?;

        let grant = user
            .active_grant(form_id)
            .ok_or_else(|| Error::forbidden(format!("You do not have access to form {form_id}")))?;

        let allowed = if self.require_all {
            // Each held role consumes at most one outstanding requirement
            let mut outstanding = self.required.clone();
            for role in &grant.roles {
                if let Some(pos) = outstanding.iter().position(|r| r == role) {
                    outstanding.swap_remove(pos);
                }
            }
            outstanding.is_empty()
        } else {
            self.required.iter().any(|role| grant.has_role(*role))
        };

        if !allowed {
            debug!(form_id = %abbrev_uuid(&form_id), require_all = self.require_all, "Missing required roles");
            return Err(Error::forbidden(format!(
                "You do not have the required role on form {form_id}"
            )));
        }

        Ok(())
    }
}
