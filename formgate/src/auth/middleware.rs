//! Axum middleware running a route's gate chain.
//!
//! The middleware is attached per route with `from_fn_with_state`, so the matched path parameters
//! are available when it runs. It builds an [`AuthorizationContext`] from the request, runs the
//! chain, and on success hands the context to the handler through request extensions.

use axum::{
    body::Body,
    extract::{FromRequestParts, Query, RawPathParams, Request, State},
    http::{HeaderMap, Uri, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, trace};

use crate::{
    auth::{
        context::{ApiKeyAccess, AuthorizationContext, RouteParams},
        gates::{GateChain, submission::SUBMISSION_ID_PARAM},
    },
    errors::{Error, Result},
};

/// Middleware state: the chain for one route plus the body limit applied when a gate reads it.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    pub chain: GateChain,
    pub max_body_bytes: usize,
}

impl RouteGuard {
    pub fn new(chain: GateChain, max_body_bytes: usize) -> Self {
        Self { chain, max_body_bytes }
    }
}

/// Token from an `Authorization: Bearer <token>` header. Any other scheme, or a header that is not
/// visible ASCII, is treated as no token.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .split_once(' ')
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Query parameters naming the resource a gate decides on. Each may appear at most once.
const IDENTIFIER_PARAMS: [&str; 3] = ["formId", SUBMISSION_ID_PARAM, "userId"];

fn query_params(uri: &Uri) -> Result<HashMap<String, String>> {
    let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(uri).map_err(|_| Error::BadRequest {
        message: "Invalid query string".to_string(),
    })?;

    let mut query = HashMap::with_capacity(pairs.len());
    for (key, value) in pairs {
        let repeated_identifier = IDENTIFIER_PARAMS.contains(&key.as_str()) && query.contains_key(&key);
        if repeated_identifier {
            return Err(Error::BadRequest {
                message: format!("Repeated query parameter {key}"),
            });
        }
        query.insert(key, value);
    }
    Ok(query)
}

/// Implementation for [`authorize`]. Returns the request with the context attached.
pub(crate) async fn authorize_request(guard: &RouteGuard, request: Request) -> Result<Request> {
    let (mut parts, body) = request.into_parts();

    // Without the path values the query could stand in for them, so a rejection fails the request
    let path: HashMap<String, String> = RawPathParams::from_request_parts(&mut parts, &())
        .await
        .map_err(|e| {
            debug!("Path parameters rejected: {e}");
            Error::BadRequest {
                message: "Invalid path parameters".to_string(),
            }
        })?
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let query = query_params(&parts.uri)?;

    let mut ctx = AuthorizationContext::new(RouteParams::new(path, query));
    ctx.bearer_token = bearer_token(&parts.headers);
    ctx.api_access = parts.extensions.get::<ApiKeyAccess>().is_some();

    let body = if guard.chain.reads_body() {
        let bytes = axum::body::to_bytes(body, guard.max_body_bytes)
            .await
            .map_err(|_| Error::BadRequest {
                message: "Request body too large or unreadable".to_string(),
            })?;
        ctx.body = serde_json::from_slice::<Value>(&bytes).ok();
        if ctx.body.is_none() && !bytes.is_empty() {
            debug!("Request body is not JSON");
        }
        // Restore the body for the handler
        Body::from(bytes)
    } else {
        body
    };

    guard.chain.run(&mut ctx).await?;
    trace!(chain = ?guard.chain, "Request authorized");

    parts.extensions.insert(ctx);
    Ok(Request::from_parts(parts, body))
}

/// Runs the route's gate chain before the handler. Failures short-circuit with the error response.
pub async fn authorize(State(guard): State<RouteGuard>, request: Request, next: Next) -> Result<Response> {
    let request = authorize_request(&guard, request).await?;
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::gates::{FormAccessGate, Gate};
    use crate::errors::Error;
    use crate::test_utils::{FakeDirectory, FakeTokens, claims, grant, user_with};
    use crate::{auth::session::SessionResolver, types::Permission};
    use async_trait::async_trait;
    use axum::{
        Extension, Router,
        http::{self, HeaderValue, StatusCode},
        middleware::from_fn_with_state,
        routing::post,
    };
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    /// Reads the body and fails unless it was parsed.
    struct NeedsBody;

    #[async_trait]
    impl Gate for NeedsBody {
        fn name(&self) -> &'static str {
            "needs_body"
        }

        fn reads_body(&self) -> bool {
            true
        }

        async fn check(&self, ctx: &mut AuthorizationContext) -> Result<()> {
            match &ctx.body {
                Some(_) => Ok(()),
                None => Err(Error::BadRequest {
                    message: "no body".to_string(),
                }),
            }
        }
    }

    async fn echo(Extension(ctx): Extension<AuthorizationContext>, body: String) -> String {
        format!("{}|{}", ctx.params.get("formId").unwrap_or_default(), body)
    }

    fn app(chain: GateChain) -> Router {
        Router::new().route(
            "/forms/{formId}",
            post(echo).layer(from_fn_with_state(RouteGuard::new(chain, 64), authorize)),
        )
    }

    async fn status_and_text(response: Response) -> (StatusCode, String) {
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer  xyz "));
        assert_eq!(bearer_token(&headers).as_deref(), Some("xyz"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_bytes(b"Bearer \xFF").unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_repeated_identifier_query_keys_are_rejected() {
        let uri: Uri = "/rbac/users?formId=a&draft=1&draft=2".parse().unwrap();
        let query = query_params(&uri).unwrap();
        assert_eq!(query.get("formId").map(String::as_str), Some("a"));
        assert_eq!(query.get("draft").map(String::as_str), Some("2"));

        for key in ["formId", "formSubmissionId", "userId"] {
            let uri: Uri = format!("/rbac/users?{key}=a&{key}=b").parse().unwrap();
            match query_params(&uri) {
                Err(Error::BadRequest { message }) => assert_eq!(message, format!("Repeated query parameter {key}")),
                other => panic!("expected BadRequest for {key}, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_undecodable_path_does_not_fall_back_to_query() {
        let granted = Uuid::new_v4();
        let user = user_with(vec![grant(granted, &[Permission::FormRead], &[])]);
        let directory = FakeDirectory::new().with_user("jdoe", user).into_shared();
        let chain = GateChain::new()
            .then(SessionResolver::new(
                Arc::new(FakeTokens::new().accept("t1", claims("jdoe"))),
                directory.clone(),
            ))
            .then(FormAccessGate::new([Permission::FormRead]));

        let response = app(chain)
            .oneshot(
                http::Request::post(format!("/forms/%FF?formId={granted}"))
                    .header(AUTHORIZATION, "Bearer t1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let (status, text) = status_and_text(response).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(text, "Invalid path parameters");
        assert!(directory.calls().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_form_id_fails_before_any_gate() {
        let granted = Uuid::new_v4();
        let directory = FakeDirectory::new().into_shared();
        let chain = GateChain::new().then(SessionResolver::new(Arc::new(FakeTokens::new()), directory.clone()));

        let response = app(chain)
            .oneshot(
                http::Request::post(format!("/forms/{granted}?formId={granted}&formId={}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let (status, text) = status_and_text(response).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(text, "Repeated query parameter formId");
        assert!(directory.calls().is_empty());
    }

    #[tokio::test]
    async fn test_context_built_from_request_and_body_restored() {
        let form_id = Uuid::new_v4();
        let user = user_with(vec![grant(form_id, &[Permission::FormRead], &[])]);
        let directory = FakeDirectory::new().with_user("jdoe", user).into_shared();
        let chain = GateChain::new()
            .then(SessionResolver::new(
                Arc::new(FakeTokens::new().accept("t1", claims("jdoe"))),
                directory.clone(),
            ))
            .then(FormAccessGate::new([Permission::FormRead]))
            .then(NeedsBody);

        let response = app(chain)
            .oneshot(
                http::Request::post(format!("/forms/{form_id}?formId=ignored&draft=true"))
                    .header(AUTHORIZATION, "Bearer t1")
                    .body(Body::from(r#"{"a":1}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(String::from_utf8(body.to_vec()).unwrap(), format!(r#"{form_id}|{{"a":1}}"#));

        let logins = directory.logins();
        assert_eq!(logins[0].1.get("draft").map(String::as_str), Some("true"));
    }

    #[tokio::test]
    async fn test_gate_failure_short_circuits_with_status() {
        let directory = FakeDirectory::new().into_shared();
        let chain = GateChain::new()
            .then(SessionResolver::new(Arc::new(FakeTokens::new()), directory))
            .then(FormAccessGate::new([Permission::FormRead]));

        let response = app(chain)
            .oneshot(
                http::Request::post(format!("/forms/{}", Uuid::new_v4()))
                    .header(AUTHORIZATION, "Bearer unknown")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_oversized_or_non_json_body() {
        let chain = GateChain::new().then(NeedsBody);

        let response = app(chain.clone())
            .oneshot(
                http::Request::post(format!("/forms/{}", Uuid::new_v4()))
                    .body(Body::from(vec![b'x'; 65]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"Request body too large or unreadable");

        let response = app(chain)
            .oneshot(
                http::Request::post(format!("/forms/{}", Uuid::new_v4()))
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"no body");
    }

    #[tokio::test]
    async fn test_api_key_marker_is_read_from_extensions() {
        let directory = FakeDirectory::new().into_shared();
        let chain = GateChain::new()
            .then(SessionResolver::new(Arc::new(FakeTokens::new()), directory))
            .then(FormAccessGate::new([Permission::FormDelete]));

        let mut request = http::Request::post("/forms/not-even-a-uuid").body(Body::empty()).unwrap();
        request.extensions_mut().insert(ApiKeyAccess);

        let response = app(chain).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
