use crate::auth::gates::role_mutation::RoleChangeViolation;
use crate::lookup::LookupError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

/// Failure classes a gate can report.
///
/// The boundary layer picks the wire status from this; [`Error::status_code`] is the default
/// mapping used by [`IntoResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Malformed or missing identifiers or payload shape
    BadRequest,
    /// Missing or invalid token
    Unauthenticated,
    /// Authenticated but the grant is insufficient
    Forbidden,
    /// A gate ran before the upstream gate that populates its inputs
    InternalMisconfiguration,
    /// A collaborator call failed
    Upstream,
}

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided, or the token was rejected
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Caller is known but lacks access
    #[error("{message}")]
    Forbidden { message: String },

    /// A role change would break an ownership or designer-protection rule
    #[error(transparent)]
    RoleChangeRejected(#[from] RoleChangeViolation),

    /// Invalid identifiers or payload
    #[error("{message}")]
    BadRequest { message: String },

    /// Gate chain wired out of order
    #[error("Authorization chain misconfigured: {detail}")]
    Misconfigured { detail: String },

    /// Collaborator failure, propagated as-is
    #[error(transparent)]
    Upstream(#[from] LookupError),
}

impl Error {
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Unauthenticated { .. } => FailureKind::Unauthenticated,
            Error::Forbidden { .. } | Error::RoleChangeRejected(_) => FailureKind::Forbidden,
            Error::BadRequest { .. } => FailureKind::BadRequest,
            Error::Misconfigured { .. } => FailureKind::InternalMisconfiguration,
            Error::Upstream(_) => FailureKind::Upstream,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Upstream(LookupError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            other => match other.kind() {
                FailureKind::BadRequest => StatusCode::BAD_REQUEST,
                FailureKind::Unauthenticated => StatusCode::UNAUTHORIZED,
                FailureKind::Forbidden => StatusCode::FORBIDDEN,
                FailureKind::InternalMisconfiguration | FailureKind::Upstream => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::Forbidden { message } | Error::BadRequest { message } => message.clone(),
            Error::RoleChangeRejected(violation) => violation.to_string(),
            Error::Misconfigured { .. } => "Internal server error".to_string(),
            Error::Upstream(LookupError::NotFound { resource, id }) => format!("{resource} with ID {id} not found"),
            Error::Upstream(_) => "Upstream service error".to_string(),
        }
    }

    pub(crate) fn forbidden(message: impl Into<String>) -> Self {
        Error::Forbidden { message: message.into() }
    }

    pub(crate) fn misconfigured(detail: impl Into<String>) -> Self {
        Error::Misconfigured { detail: detail.into() }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match self.kind() {
            FailureKind::InternalMisconfiguration => {
                tracing::error!("Authorization misconfiguration: {}", self);
            }
            FailureKind::Upstream => {
                tracing::error!("Collaborator error: {:#}", self);
            }
            FailureKind::Unauthenticated | FailureKind::Forbidden => {
                tracing::info!("Authorization error: {}", self);
            }
            FailureKind::BadRequest => {
                tracing::debug!("Client error: {}", self);
            }
        }

        (self.status_code(), self.user_message()).into_response()
    }
}

/// Type alias for gate and service operation results
pub type Result<T> = std::result::Result<T, Error>;
