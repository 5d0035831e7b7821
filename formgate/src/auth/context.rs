//! Per-request authorization state threaded through a gate chain.

use serde_json::Value;
use std::collections::HashMap;

use crate::auth::current_user::CurrentUser;
use crate::errors::{Error, Result};
use crate::types::{FormId, parse_id};

/// Route identifiers for one request.
///
/// Lookups prefer the path segment over the query string when both carry the same key.
#[derive(Debug, Clone, Default)]
pub struct RouteParams {
    pub path: HashMap<String, String>,
    pub query: HashMap<String, String>,
}

impl RouteParams {
    pub fn new(path: HashMap<String, String>, query: HashMap<String, String>) -> Self {
        Self { path, query }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.path.get(key).or_else(|| self.query.get(key)).map(String::as_str)
    }

    /// Query and path merged into one map, path winning on collision.
    pub fn merged(&self) -> HashMap<String, String> {
        let mut merged = self.query.clone();
        merged.extend(self.path.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// The `formId` parameter, if present and well-formed.
    pub fn form_id(&self) -> Result<FormId> {
        parse_id(self.get("formId"), "formId")
    }
}

/// Marker inserted into request extensions by the API-key layer once it has accepted a key.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiKeyAccess;

/// Everything the gates in one chain read and write.
///
/// Created when the request arrives and dropped with it.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationContext {
    /// Bearer token from the `Authorization` header
    pub bearer_token: Option<String>,
    /// The caller authenticated with a per-form API key
    pub api_access: bool,
    pub params: RouteParams,
    /// JSON request body, only populated for chains that read the payload
    pub body: Option<Value>,
    current_user: Option<CurrentUser>,
    form_id_with_delete_permission: Option<FormId>,
}

impl AuthorizationContext {
    pub fn new(params: RouteParams) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_api_access(mut self) -> Self {
        self.api_access = true;
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// The resolved user. Fails if no session gate ran earlier in the chain.
    pub fn current_user(&self) -> Result<&CurrentUser> {
        self.current_user
            .as_ref()
            .ok_or_else(|| Error::misconfigured("no current user in context; the session gate must run first"))
    }

    pub fn has_current_user(&self) -> bool {
        self.current_user.is_some()
    }

    /// Store the request's user snapshot. It can only be set once per request.
    pub fn set_current_user(&mut self, user: CurrentUser) -> Result<()> {
        if self.current_user.is_some() {
            return Err(Error::misconfigured("current user resolved twice in one request"));
        }
        self.current_user = Some(user);
        Ok(())
    }

    /// API-key callers bypass the form and submission gates.
    pub fn is_api_user(&self) -> bool {
        self.api_access || self.current_user.as_ref().is_some_and(|user| user.api_user)
    }

    pub fn record_delete_permission(&mut self, form_id: FormId) {
        self.form_id_with_delete_permission = Some(form_id);
    }

    /// Form on which an earlier gate in this chain established delete rights.
    pub fn form_id_with_delete_permission(&self) -> Option<FormId> {
        self.form_id_with_delete_permission
    }
}
