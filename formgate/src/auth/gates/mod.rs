//! Decision units and the chain that runs them.
//!
//! A route declares an ordered [`GateChain`]. Each [`Gate`] reads the shared
//! [`AuthorizationContext`], optionally calls a collaborator, and either lets the request continue
//! or fails it. Some gates write to the context for later gates to read (the submission gate
//! records the form it established delete rights on, the bulk filter consumes it), so order
//! within a chain matters.

use async_trait::async_trait;
use serde::Serialize;
use std::{fmt, sync::Arc};
use tracing::{debug, trace};

use crate::{
    auth::context::AuthorizationContext,
    errors::Result,
    types::{FormId, UserId},
};

pub mod bulk;
pub mod form;
pub mod role_mutation;
pub mod roles;
pub mod submission;

pub use bulk::BulkSubmissionFilter;
pub use form::FormAccessGate;
pub use role_mutation::{RoleMutationGuard, RoleMutationMode};
pub use roles::RoleMembershipGate;
pub use submission::SubmissionAccessGate;

/// One decision unit. `Ok(())` means continue with the next gate.
#[async_trait]
pub trait Gate: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Whether this gate needs the JSON request body in the context
    fn reads_body(&self) -> bool {
        false
    }

    async fn check(&self, ctx: &mut AuthorizationContext) -> Result<()>;
}

/// Gates run in declaration order, stopping at the first failure.
#[derive(Clone, Default)]
pub struct GateChain {
    gates: Vec<Arc<dyn Gate>>,
}

impl GateChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, gate: impl Gate + 'static) -> Self {
        self.gates.push(Arc::new(gate));
        self
    }

    pub fn reads_body(&self) -> bool {
        self.gates.iter().any(|gate| gate.reads_body())
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    pub async fn run(&self, ctx: &mut AuthorizationContext) -> Result<()> {
        for gate in &self.gates {
            trace!(gate = gate.name(), "Running gate");
            if let Err(e) = gate.check(ctx).await {
                debug!(gate = gate.name(), kind = ?e.kind(), "Gate failed: {e}");
                return Err(e);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for GateChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.gates.iter().map(|gate| gate.name())).finish()
    }
}

/// What the decision endpoint reports for an allowed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub user_id: Option<UserId>,
    pub api_user: bool,
    pub form_id_with_delete_permission: Option<FormId>,
}

impl From<&AuthorizationContext> for Decision {
    fn from(ctx: &AuthorizationContext) -> Self {
        Self {
            user_id: ctx.current_user().ok().and_then(|user| user.id),
            api_user: ctx.is_api_user(),
            form_id_with_delete_permission: ctx.form_id_with_delete_permission(),
        }
    }
}
