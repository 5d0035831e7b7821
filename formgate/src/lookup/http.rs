//! Collaborators backed by the forms API's internal HTTP surface.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, instrument};
use url::Url;

use super::{
    FormRoleEntry, LookupError, Result, RoleLookup, SessionService, SubmissionFormView, SubmissionLookup, SubmissionMetadata,
};
use crate::{
    auth::{current_user::CurrentUser, token::TokenClaims},
    types::{FormId, PermissionSet, SubmissionId, UserId},
};

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Serialize)]
struct LoginRequest<'a> {
    claims: Option<&'a TokenClaims>,
    params: &'a HashMap<String, String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PermissionCheckRequest<'a> {
    user_id: Option<UserId>,
    idp_user_id: Option<&'a str>,
    permissions: &'a PermissionSet,
}

#[derive(Deserialize)]
struct PermissionCheckResponse {
    allowed: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetadataRequest<'a> {
    submission_ids: &'a [SubmissionId],
}

/// Makes sure a url has a trailing slash, so that `join` appends instead of replacing the last
/// path segment.
fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let path = format!("{}/", new_url.path());
        new_url.set_path(&path);
        new_url
    }
}

pub struct HttpDirectory {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpDirectory {
    pub fn new(base_url: Url, api_key: Option<String>, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url: ensure_slash(&base_url),
            api_key,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| LookupError::Other(anyhow::anyhow!("Failed to construct URL for {path}: {e}")))
    }

    /// Send a request and decode a JSON reply. A 404 becomes [`LookupError::NotFound`] for
    /// `resource`/`id`.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, resource: &str, id: &str) -> Result<T> {
        let request = match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(LookupError::NotFound {
                resource: resource.to_string(),
                id: id.to_string(),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, resource, "Forms API request failed");
            return Err(LookupError::Status { status, body });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| LookupError::Decode(format!("{resource} response: {e}")))
    }
}

#[async_trait]
impl SessionService for HttpDirectory {
    #[instrument(skip_all)]
    async fn login(&self, claims: Option<&TokenClaims>, params: &HashMap<String, String>) -> Result<CurrentUser> {
        let url = self.url("internal/sessions")?;
        let subject = claims.map(|c| c.sub.as_str()).unwrap_or("anonymous");
        debug!(subject, "Logging in via forms API");

        let request = self.client.post(url).json(&LoginRequest { claims, params });
        self.send(request, "User", subject).await
    }
}

#[async_trait]
impl SubmissionLookup for HttpDirectory {
    #[instrument(skip_all)]
    async fn get_submission_form(&self, submission_id: SubmissionId) -> Result<SubmissionFormView> {
        let url = self.url(&format!("internal/submissions/{submission_id}/form"))?;
        self.send(self.client.get(url), "Submission", &submission_id.to_string())
            .await
    }

    #[instrument(skip_all)]
    async fn check_submission_permission(
        &self,
        user: &CurrentUser,
        submission_id: SubmissionId,
        permissions: &PermissionSet,
    ) -> Result<bool> {
        let url = self.url(&format!("internal/submissions/{submission_id}/permissions"))?;
        let body = PermissionCheckRequest {
            user_id: user.id,
            idp_user_id: user.idp_user_id.as_deref(),
            permissions,
        };

        let response: PermissionCheckResponse = self
            .send(self.client.post(url).json(&body), "Submission", &submission_id.to_string())
            .await?;
        Ok(response.allowed)
    }

    #[instrument(skip_all)]
    async fn get_multiple_submission(&self, submission_ids: &[SubmissionId]) -> Result<Vec<SubmissionMetadata>> {
        let url = self.url("internal/submissions/metadata")?;
        let body = MetadataRequest { submission_ids };
        self.send(self.client.post(url).json(&body), "Submissions", "metadata")
            .await
    }
}

#[async_trait]
impl RoleLookup for HttpDirectory {
    #[instrument(skip_all)]
    async fn read_user_role(&self, user_id: UserId, form_id: FormId) -> Result<Vec<FormRoleEntry>> {
        let url = self.url(&format!("internal/forms/{form_id}/users/{user_id}/roles"))?;
        self.send(self.client.get(url), "Form", &form_id.to_string()).await
    }
}
