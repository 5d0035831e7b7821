//! Route table: which gates guard which method and path.

use axum::{
    Extension, Json, Router,
    middleware::from_fn_with_state,
    routing::{MethodRouter, delete, get, post, put},
};
use tracing::instrument;

use crate::{
    AppState,
    auth::{
        context::AuthorizationContext,
        gates::{
            BulkSubmissionFilter, Decision, FormAccessGate, GateChain, RoleMembershipGate, RoleMutationGuard, RoleMutationMode,
            SubmissionAccessGate,
        },
        middleware::{RouteGuard, authorize},
        session::SessionResolver,
    },
    types::{Permission, Role},
};

pub const API_PREFIX: &str = "/authorize/api/v1";

/// Terminal handler for every guarded route.
#[instrument(skip_all)]
pub async fn decision(Extension(ctx): Extension<AuthorizationContext>) -> Json<Decision> {
    Json(Decision::from(&ctx))
}

pub async fn healthz() -> &'static str {
    "OK"
}

/// Builds the chains for each route from the shared validator and collaborators.
struct Chains<'a> {
    state: &'a AppState,
}

impl Chains<'_> {
    /// Every chain starts by resolving the session.
    fn session(&self) -> GateChain {
        GateChain::new().then(SessionResolver::new(
            self.state.validator.clone(),
            self.state.directory.sessions.clone(),
        ))
    }

    fn form(&self, required: &[Permission]) -> GateChain {
        self.session().then(FormAccessGate::new(required.iter().copied()))
    }

    fn submission(&self, required: &[Permission]) -> GateChain {
        self.session().then(SubmissionAccessGate::new(
            required.iter().copied(),
            self.state.directory.submissions.clone(),
        ))
    }

    fn role_change(&self, mode: RoleMutationMode) -> GateChain {
        self.form(&[Permission::TeamUpdate])
            .then(RoleMutationGuard::new(mode, self.state.directory.roles.clone()))
    }

    /// Run `chain` before `route`'s handler.
    fn guard(&self, route: MethodRouter, chain: GateChain) -> MethodRouter {
        let guard = RouteGuard::new(chain, self.state.config.limits.max_body_bytes);
        route.route_layer(from_fn_with_state(guard, authorize))
    }
}

/// The guarded routes, unprefixed.
pub fn authorization_routes(state: &AppState) -> Router {
    use Permission::*;

    let chains = Chains { state };

    Router::new()
        // Forms
        .route("/forms/{formId}", chains.guard(get(decision), chains.form(&[FormRead])))
        .route("/forms/{formId}", chains.guard(put(decision), chains.form(&[FormUpdate])))
        .route("/forms/{formId}", chains.guard(delete(decision), chains.form(&[FormDelete])))
        .route("/forms/{formId}/restore", chains.guard(put(decision), chains.form(&[FormDelete])))
        .route(
            "/forms/{formId}/submissions",
            chains.guard(get(decision), chains.form(&[FormRead, SubmissionRead])),
        )
        .route(
            "/forms/{formId}/submissions",
            chains.guard(post(decision), chains.form(&[SubmissionCreate])),
        )
        .route(
            "/forms/{formId}/apiKey",
            chains.guard(get(decision), chains.form(&[FormRead]).then(RoleMembershipGate::all([Role::Owner]))),
        )
        .route(
            "/forms/{formId}/subscriptions",
            chains.guard(
                put(decision),
                chains.session().then(RoleMembershipGate::any([Role::Owner, Role::TeamManager])),
            ),
        )
        .route(
            "/forms/{formId}/documentTemplates",
            chains.guard(get(decision), chains.form(&[DocumentTemplateRead])),
        )
        .route(
            "/forms/{formId}/documentTemplates",
            chains.guard(post(decision), chains.form(&[DocumentTemplateCreate])),
        )
        // Submissions
        .route(
            "/submissions/{formSubmissionId}",
            chains.guard(get(decision), chains.submission(&[SubmissionRead])),
        )
        .route(
            "/submissions/{formSubmissionId}",
            chains.guard(put(decision), chains.submission(&[SubmissionUpdate])),
        )
        .route(
            "/submissions/{formSubmissionId}",
            chains.guard(delete(decision), chains.submission(&[SubmissionDelete])),
        )
        .route(
            "/submissions/{formSubmissionId}/restore",
            chains.guard(put(decision), chains.submission(&[SubmissionDelete])),
        )
        .route(
            "/submissions/{formSubmissionId}/{formId}/submissions",
            chains.guard(
                delete(decision),
                chains
                    .submission(&[SubmissionDelete])
                    .then(BulkSubmissionFilter::new(state.directory.submissions.clone())),
            ),
        )
        // Team management
        .route("/rbac/users", chains.guard(get(decision), chains.form(&[TeamRead])))
        .route("/rbac/users", chains.guard(put(decision), chains.role_change(RoleMutationMode::Update)))
        .route(
            "/rbac/users",
            chains.guard(delete(decision), chains.role_change(RoleMutationMode::Remove)),
        )
}

/// Full router: prefixed authorization routes plus the health check.
pub fn router(state: &AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .nest(API_PREFIX, authorization_routes(state))
}
