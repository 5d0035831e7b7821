//! Session resolution: the first gate of every chain.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::{
    auth::{context::AuthorizationContext, gates::Gate, token::TokenValidator},
    errors::{Error, Result},
    lookup::SessionService,
    types::abbrev_uuid,
};

/// Turns the request's bearer token (or its absence) into the [`CurrentUser`] snapshot every
/// later gate decides against.
///
/// A missing token is not an error: the session service returns the anonymous user, which
/// public-form paths rely on. A token that is present but fails validation is.
///
/// [`CurrentUser`]: crate::auth::current_user::CurrentUser
pub struct SessionResolver {
    validator: Arc<dyn TokenValidator>,
    sessions: Arc<dyn SessionService>,
}

impl SessionResolver {
    pub fn new(validator: Arc<dyn TokenValidator>, sessions: Arc<dyn SessionService>) -> Self {
        Self { validator, sessions }
    }
}

#[async_trait]
impl Gate for SessionResolver {
    fn name(&self) -> &'static str {
        "session"
    }

    #[instrument(skip_all)]
    async fn check(&self, ctx: &mut AuthorizationContext) -> Result<()> {
        let claims = match ctx.bearer_token.as_deref() {
            Some(token) => {
                if !self.validator.validate(token).await? {
                    return Err(Error::Unauthenticated {
                        message: Some("Invalid authorization token".to_string()),
                    });
                }
                // A validator that accepts a token it cannot read claims from is treated as a rejection
                let claims = self.validator.claims(token).await?.ok_or(Error::Unauthenticated {
                    message: Some("Invalid authorization token".to_string()),
                })?;
                Some(claims)
            }
            None => None,
        };

        let params = ctx.params.merged();
        let mut user = self.sessions.login(claims.as_ref(), &params).await?;
        user.api_user |= ctx.api_access;

        match user.id {
            Some(id) => debug!(user_id = %abbrev_uuid(&id), grants = user.forms.len(), api_user = user.api_user, "Resolved session"),
            None => debug!(api_user = user.api_user, "Resolved anonymous session"),
        }

        ctx.set_current_user(user)
    }
}
