//! Test utilities for integration testing (available with `test-utils` feature).

use async_trait::async_trait;
use axum::http::StatusCode;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Once};
use uuid::Uuid;

use crate::{
    auth::{
        context::{AuthorizationContext, RouteParams},
        current_user::{CurrentUser, FormGrant},
        token::{TokenClaims, TokenValidator},
    },
    config::{AuthConfig, Config, DirectoryConfig, TokenKeyConfig},
    lookup::{
        self, Directory, FormRoleEntry, FormSummary, IdentityProvider, LookupError, RoleLookup, SessionService, SubmissionFormView,
        SubmissionLookup, SubmissionMetadata, SubmissionSummary,
    },
    types::{FormId, Permission, PermissionSet, Role, SubmissionId, UserId},
};

static CRYPTO_PROVIDER: Once = Once::new();

/// Install the rustls provider once per test binary, before any reqwest client is built.
pub fn install_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

pub fn create_test_config() -> Config {
    Config {
        auth: AuthConfig {
            key: TokenKeyConfig::Secret {
                secret: "test-secret-key-for-jwt".to_string(),
            },
            ..Default::default()
        },
        directory: DirectoryConfig::Static {
            path: "fixtures.yaml".into(),
        },
        ..Default::default()
    }
}

pub fn grant(form_id: FormId, permissions: &[Permission], roles: &[Role]) -> FormGrant {
    FormGrant::new(form_id, permissions.iter().copied(), roles.iter().copied())
}

/// A signed-in user holding the given grants.
pub fn user_with(forms: Vec<FormGrant>) -> CurrentUser {
    let id = Uuid::new_v4();
    CurrentUser {
        id: Some(id),
        idp_user_id: Some(format!("{}@idir", crate::types::abbrev_uuid(&id))),
        forms,
        ..Default::default()
    }
}

pub fn params(path: &[(&str, String)], query: &[(&str, String)]) -> RouteParams {
    RouteParams::new(
        path.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        query.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
    )
}

/// A context as the session gate would leave it.
pub fn context_for(user: CurrentUser, path: &[(&str, String)]) -> AuthorizationContext {
    let mut ctx = AuthorizationContext::new(params(path, &[]));
    ctx.set_current_user(user).expect("fresh context has no user");
    ctx
}

pub fn claims(sub: &str) -> TokenClaims {
    TokenClaims {
        sub: sub.to_string(),
        exp: i64::MAX,
        iss: None,
        aud: None,
        extra: Default::default(),
    }
}

/// Token validator that accepts a fixed set of opaque tokens.
#[derive(Default)]
pub struct FakeTokens {
    tokens: HashMap<String, Option<TokenClaims>>,
}

impl FakeTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(mut self, token: &str, claims: TokenClaims) -> Self {
        self.tokens.insert(token.to_string(), Some(claims));
        self
    }

    /// Accept the token but yield no claims for it.
    pub fn accept_without_claims(mut self, token: &str) -> Self {
        self.tokens.insert(token.to_string(), None);
        self
    }
}

#[async_trait]
impl TokenValidator for FakeTokens {
    async fn validate(&self, token: &str) -> lookup::Result<bool> {
        Ok(self.tokens.contains_key(token))
    }

    async fn claims(&self, token: &str) -> lookup::Result<Option<TokenClaims>> {
        Ok(self.tokens.get(token).cloned().flatten())
    }
}

/// Scriptable stand-in for all three collaborators, recording every call it receives.
#[derive(Default)]
pub struct FakeDirectory {
    users: HashMap<String, CurrentUser>,
    anonymous: Option<CurrentUser>,
    submissions: HashMap<SubmissionId, SubmissionFormView>,
    delegated: HashMap<SubmissionId, PermissionSet>,
    roles: HashMap<(UserId, FormId), Vec<Role>>,
    unavailable: bool,
    calls: Mutex<Vec<String>>,
    logins: Mutex<Vec<(Option<TokenClaims>, HashMap<String, String>)>>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The user returned when `sub` logs in.
    pub fn with_user(mut self, sub: &str, user: CurrentUser) -> Self {
        self.users.insert(sub.to_string(), user);
        self
    }

    /// The user returned for requests without a token.
    pub fn with_anonymous(mut self, user: CurrentUser) -> Self {
        self.anonymous = Some(user);
        self
    }

    pub fn with_submission(mut self, submission_id: SubmissionId, form_id: FormId, deleted: bool, public: bool) -> Self {
        let identity_providers = if public {
            vec![IdentityProvider::public()]
        } else {
            vec![IdentityProvider::new("idir")]
        };
        self.submissions.insert(
            submission_id,
            SubmissionFormView {
                form: FormSummary {
                    id: form_id,
                    identity_providers,
                },
                submission: SubmissionSummary {
                    id: submission_id,
                    deleted,
                },
            },
        );
        self
    }

    /// Permissions delegated on a submission to any caller.
    pub fn with_delegated(mut self, submission_id: SubmissionId, permissions: &[Permission]) -> Self {
        self.delegated.insert(submission_id, permissions.iter().copied().collect());
        self
    }

    pub fn with_roles(mut self, user_id: UserId, form_id: FormId, roles: &[Role]) -> Self {
        self.roles.insert((user_id, form_id), roles.to_vec());
        self
    }

    /// Every lookup fails with an upstream 503.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn directory(self: &Arc<Self>) -> Directory {
        Directory::from_shared(self.clone())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|call| call.as_str() == name).count()
    }

    pub fn logins(&self) -> Vec<(Option<TokenClaims>, HashMap<String, String>)> {
        self.logins.lock().unwrap().clone()
    }

    fn record(&self, name: &str) -> lookup::Result<()> {
        self.calls.lock().unwrap().push(name.to_string());
        if self.unavailable {
            return Err(LookupError::Status {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: "directory unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SessionService for FakeDirectory {
    async fn login(&self, claims: Option<&TokenClaims>, params: &HashMap<String, String>) -> lookup::Result<CurrentUser> {
        self.record("login")?;
        self.logins.lock().unwrap().push((claims.cloned(), params.clone()));
        let user = match claims {
            Some(claims) => self.users.get(&claims.sub).cloned().unwrap_or_else(|| CurrentUser {
                idp_user_id: Some(claims.sub.clone()),
                id: Some(Uuid::new_v4()),
                ..Default::default()
            }),
            None => self.anonymous.clone().unwrap_or_default(),
        };
        Ok(user)
    }
}

#[async_trait]
impl SubmissionLookup for FakeDirectory {
    async fn get_submission_form(&self, submission_id: SubmissionId) -> lookup::Result<SubmissionFormView> {
        self.record("get_submission_form")?;
        self.submissions.get(&submission_id).cloned().ok_or_else(|| LookupError::NotFound {
            resource: "Submission".to_string(),
            id: submission_id.to_string(),
        })
    }

    async fn check_submission_permission(
        &self,
        _user: &CurrentUser,
        submission_id: SubmissionId,
        permissions: &PermissionSet,
    ) -> lookup::Result<bool> {
        self.record("check_submission_permission")?;
        Ok(self
            .delegated
            .get(&submission_id)
            .is_some_and(|delegated| permissions.is_subset(delegated)))
    }

    async fn get_multiple_submission(&self, submission_ids: &[SubmissionId]) -> lookup::Result<Vec<SubmissionMetadata>> {
        self.record("get_multiple_submission")?;
        let unique: HashSet<_> = submission_ids.iter().collect();
        Ok(unique
            .into_iter()
            .filter_map(|id| {
                self.submissions.get(id).map(|view| SubmissionMetadata {
                    id: *id,
                    form_id: view.form.id,
                })
            })
            .collect())
    }
}

#[async_trait]
impl RoleLookup for FakeDirectory {
    async fn read_user_role(&self, user_id: UserId, form_id: FormId) -> lookup::Result<Vec<FormRoleEntry>> {
        self.record("read_user_role")?;
        Ok(self
            .roles
            .get(&(user_id, form_id))
            .map(|roles| roles.iter().map(|role| FormRoleEntry { role: *role }).collect())
            .unwrap_or_default())
    }
}
