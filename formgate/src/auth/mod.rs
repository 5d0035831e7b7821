//! Authorization resolution.
//!
//! Every protected route runs an ordered chain of gates against a per-request
//! [`AuthorizationContext`](context::AuthorizationContext):
//!
//! 1. [`session::SessionResolver`] validates the bearer token (if any) and asks the session
//!    service for the caller's [`CurrentUser`](current_user::CurrentUser) snapshot.
//! 2. Decision gates from [`gates`] check that snapshot for the route: form permissions,
//!    submission access, role membership, role-change rules and bulk-delete scoping.
//!
//! The snapshot is built once and never re-fetched, so every gate in a chain decides against the
//! same grants.
//!
//! # Access paths
//!
//! - **Form grants**: permissions and roles the user holds on a form, including forms that have
//!   since been soft-deleted
//! - **Delegated permissions**: permissions shared on a single submission
//! - **Public forms**: anonymous callers may read submissions of forms with the `public` identity
//!   provider
//! - **API keys**: callers marked by the API-key layer bypass the form and submission gates
//!
//! # Modules
//!
//! - [`context`]: The per-request context and route parameters
//! - [`current_user`]: The user snapshot and form grants
//! - [`gates`]: The [`Gate`](gates::Gate) trait, [`GateChain`](gates::GateChain) and decision gates
//! - [`middleware`]: Axum middleware running a chain for a route
//! - [`session`]: Session resolution
//! - [`token`]: Bearer token validation

pub mod context;
pub mod current_user;
pub mod gates;
pub mod middleware;
pub mod session;
pub mod token;
