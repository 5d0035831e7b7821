//! HTTP surface of the forward-auth service.
//!
//! The reverse proxy in front of the forms API asks `/authorize/api/v1/<original path>` before
//! forwarding a request. Each route runs the gate chain declared for it in [`routes`] and answers
//! with a JSON [`Decision`](crate::auth::gates::Decision) when every gate passes, or with the
//! failure's status and plain-text message when one does not.
//!
//! - **Forms** (`/forms/{formId}/*`): form permission and role checks
//! - **Submissions** (`/submissions/{formSubmissionId}/*`): submission access and bulk deletes
//! - **Team management** (`/rbac/users`): team permission checks and role-change rules
//!
//! `GET /healthz` answers `OK` without authorization.

pub mod routes;
