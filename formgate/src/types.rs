//! Common type definitions and permission system types.
//!
//! This module defines:
//! - Type aliases for entity IDs (FormId, SubmissionId, UserId)
//! - The [`Permission`] and [`Role`] codes carried by a form grant
//! - Helpers for validating identifiers taken from route parameters
//!
//! # ID Types
//!
//! All entity IDs are UUIDs wrapped in type aliases:
//!
//! - [`UserId`]: User account identifier
//! - [`FormId`]: Form identifier
//! - [`SubmissionId`]: Form submission identifier
//!
//! # Permissions and roles
//!
//! Both enums serialize as the lowercase snake codes the forms API uses on the wire
//! (`form_read`, `team_manager`, ...). A role is a named bundle of permissions assigned to a user
//! on one form; the forms API expands roles into permissions when it builds a grant, so the gates
//! only ever compare the two sets it hands back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::errors::{Error, Result};

// Type aliases for IDs
pub type UserId = Uuid;
pub type FormId = Uuid;
pub type SubmissionId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Parse an identifier taken from a route parameter or payload.
///
/// A missing or malformed value is a client error, reported as `Bad {name}`.
pub fn parse_id(raw: Option<&str>, name: &str) -> Result<Uuid> {
    raw.and_then(|value| Uuid::parse_str(value.trim()).ok())
        .ok_or_else(|| Error::BadRequest {
            message: format!("Bad {name}"),
        })
}

/// Permissions that can be granted on a form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    FormRead,
    FormUpdate,
    FormDelete,
    SubmissionCreate,
    SubmissionRead,
    SubmissionUpdate,
    SubmissionDelete,
    DesignCreate,
    DesignRead,
    DesignUpdate,
    DesignDelete,
    TeamRead,
    TeamUpdate,
    SubmissionReview,
    DocumentTemplateCreate,
    DocumentTemplateRead,
    DocumentTemplateDelete,
}

impl Permission {
    /// Whether holding this permission on a submission establishes delete rights on its form
    /// for the rest of the request.
    pub fn is_delete_capable(self) -> bool {
        matches!(self, Permission::SubmissionDelete)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::FormRead => "form_read",
            Permission::FormUpdate => "form_update",
            Permission::FormDelete => "form_delete",
            Permission::SubmissionCreate => "submission_create",
            Permission::SubmissionRead => "submission_read",
            Permission::SubmissionUpdate => "submission_update",
            Permission::SubmissionDelete => "submission_delete",
            Permission::DesignCreate => "design_create",
            Permission::DesignRead => "design_read",
            Permission::DesignUpdate => "design_update",
            Permission::DesignDelete => "design_delete",
            Permission::TeamRead => "team_read",
            Permission::TeamUpdate => "team_update",
            Permission::SubmissionReview => "submission_review",
            Permission::DocumentTemplateCreate => "document_template_create",
            Permission::DocumentTemplateRead => "document_template_read",
            Permission::DocumentTemplateDelete => "document_template_delete",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Roles a user can hold on a form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    TeamManager,
    FormDesigner,
    SubmissionReviewer,
    FormSubmitter,
    SubmissionApprover,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::TeamManager => "team_manager",
            Role::FormDesigner => "form_designer",
            Role::SubmissionReviewer => "submission_reviewer",
            Role::FormSubmitter => "form_submitter",
            Role::SubmissionApprover => "submission_approver",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of permissions. Ordered so that logs and error details are stable.
pub type PermissionSet = BTreeSet<Permission>;

/// Render a permission set as a comma-separated list of codes.
pub fn display_permissions(permissions: &PermissionSet) -> String {
    permissions.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(", ")
}
