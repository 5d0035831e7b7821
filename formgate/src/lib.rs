//! # formgate: authorization gates for the forms platform
//!
//! `formgate` decides whether a caller may perform an operation on a form, a submission or a
//! form's team. It runs as a forward-auth service: the reverse proxy in front of the forms API
//! sends each incoming request's method, path and headers to `/authorize/api/v1/...` and only
//! forwards the request when formgate answers 200.
//!
//! ## Request Flow
//!
//! Every route declares an ordered chain of gates (see [`api::routes`]). The chain always starts
//! with the session resolver, which validates the bearer token and asks the session service for
//! the caller's permissions and roles. Later gates check that snapshot: form permissions,
//! submission access (form grants, public forms, permissions delegated on one submission), team
//! roles, role-change rules and bulk-delete scoping. The first failing gate ends the request with
//! its status and message; if every gate passes the caller gets a JSON
//! [`Decision`](auth::gates::Decision).
//!
//! ## Collaborators
//!
//! Users, forms, submissions and team membership belong to the forms API. Gates reach them
//! through the traits in [`lookup`], backed either by a YAML fixture (local development) or by the
//! forms API's internal HTTP endpoints.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use formgate::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = formgate::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     formgate::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod auth;
pub mod config;
pub mod errors;
pub mod lookup;
pub mod telemetry;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#[cfg(test)]
mod test;

use axum::Router;
use bon::Builder;
pub use config::Config;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info};

use crate::{
    auth::token::{JwtTokenValidator, TokenValidator},
    lookup::{Directory, create_directory},
};

/// Shared resources the route table is built from.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .validator(Arc::new(JwtTokenValidator::with_secret("...")))
///     .directory(directory)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub validator: Arc<dyn TokenValidator>,
    pub directory: Directory,
}

/// Build the full router, wrapped in request tracing.
pub fn build_router(state: &AppState) -> Router {
    api::routes::router(state).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}

/// The forward-auth server.
///
/// 1. **Create**: [`Application::new`] builds the token validator and collaborators from config
/// 2. **Serve**: [`Application::serve`] binds the listener and handles requests until shutdown
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting formgate with configuration: {:#?}", config);

        let validator = JwtTokenValidator::from_config(&config.auth)?;
        let directory = create_directory(&config.directory)?;

        let state = AppState::builder()
            .config(config.clone())
            .validator(Arc::new(validator))
            .directory(directory)
            .build();

        Ok(Self::from_state(state))
    }

    /// Build around already-constructed collaborators.
    pub fn from_state(state: AppState) -> Self {
        Self {
            router: build_router(&state),
            config: state.config,
        }
    }

    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "formgate listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
