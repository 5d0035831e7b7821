//! Collaborator interfaces the gates consume.
//!
//! The forms API owns users, forms, submissions and team membership. This module defines the
//! narrow read-only views the authorization engine needs from it, as traits injected into each
//! gate, plus two implementations:
//!
//! - [`memory::StaticDirectory`]: everything answered from a YAML fixture. For local development
//!   and tests.
//! - [`http::HttpDirectory`]: calls the forms API's internal endpoints over HTTP.
//!
//! [`create_directory`] is the single point where configuration becomes a [`Directory`].

use async_trait::async_trait;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    auth::{current_user::CurrentUser, token::TokenClaims},
    config::DirectoryConfig,
    types::{FormId, PermissionSet, Role, SubmissionId, UserId},
};

pub mod http;
pub mod memory;

/// Result type for collaborator calls
pub type Result<T> = std::result::Result<T, LookupError>;

/// Errors raised by collaborators. Gates pass these through untouched.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    #[error("Upstream returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid upstream payload: {0}")]
    Decode(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Identity provider attached to a form. The `public` code opens the form to anonymous users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProvider {
    pub code: String,
}

impl IdentityProvider {
    pub const PUBLIC: &'static str = "public";

    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }

    pub fn public() -> Self {
        Self::new(Self::PUBLIC)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSummary {
    pub id: FormId,
    #[serde(default)]
    pub identity_providers: Vec<IdentityProvider>,
}

impl FormSummary {
    pub fn is_public(&self) -> bool {
        self.identity_providers.iter().any(|idp| idp.code == IdentityProvider::PUBLIC)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionSummary {
    pub id: SubmissionId,
    #[serde(default)]
    pub deleted: bool,
}

/// A submission together with the form it belongs to. Fetched fresh for every check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionFormView {
    pub form: FormSummary,
    pub submission: SubmissionSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionMetadata {
    pub id: SubmissionId,
    pub form_id: FormId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormRoleEntry {
    pub role: Role,
}

/// Turns token claims into the request's user snapshot.
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Log the caller in. `claims` is `None` for anonymous callers; `params` are the merged route
    /// parameters, which scope the returned grants to the form or user the route refers to.
    async fn login(&self, claims: Option<&TokenClaims>, params: &HashMap<String, String>) -> Result<CurrentUser>;
}

#[async_trait]
pub trait SubmissionLookup: Send + Sync {
    async fn get_submission_form(&self, submission_id: SubmissionId) -> Result<SubmissionFormView>;

    /// Permissions delegated on one submission, independent of any form role.
    async fn check_submission_permission(
        &self,
        user: &CurrentUser,
        submission_id: SubmissionId,
        permissions: &PermissionSet,
    ) -> Result<bool>;

    /// Metadata for every known id. Unknown ids are omitted from the result.
    async fn get_multiple_submission(&self, submission_ids: &[SubmissionId]) -> Result<Vec<SubmissionMetadata>>;
}

#[async_trait]
pub trait RoleLookup: Send + Sync {
    async fn read_user_role(&self, user_id: UserId, form_id: FormId) -> Result<Vec<FormRoleEntry>>;
}

/// All three collaborators, as handed to the gates.
#[derive(Clone)]
pub struct Directory {
    pub sessions: Arc<dyn SessionService>,
    pub submissions: Arc<dyn SubmissionLookup>,
    pub roles: Arc<dyn RoleLookup>,
}

impl Directory {
    /// Use one value for every collaborator.
    pub fn from_shared<T>(shared: Arc<T>) -> Self
    where
        T: SessionService + SubmissionLookup + RoleLookup + 'static,
    {
        Self {
            sessions: shared.clone(),
            submissions: shared.clone(),
            roles: shared,
        }
    }
}

/// Create the collaborators from configuration
pub fn create_directory(config: &DirectoryConfig) -> anyhow::Result<Directory> {
    let directory = match config {
        DirectoryConfig::Static { path } => Directory::from_shared(Arc::new(memory::StaticDirectory::load(path)?)),
        DirectoryConfig::Http {
            base_url,
            api_key,
            request_timeout,
        } => Directory::from_shared(Arc::new(http::HttpDirectory::new(
            base_url.clone(),
            api_key.clone(),
            *request_timeout,
        )?)),
    };
    Ok(directory)
}
