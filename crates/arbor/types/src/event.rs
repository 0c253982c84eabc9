//! Audit signals emitted at kernel decision points.
//!
//! Delivery is fire-and-forget: sinks are called synchronously but their
//! failures never influence a decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AgentId, CapabilityId, ProposalId};

/// An authorization-relevant event for the external observability
/// collaborator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum KernelEvent {
    AuthorizationGranted {
        principal_id: AgentId,
        resource_uri: String,
        capability_id: CapabilityId,
        at: DateTime<Utc>,
    },
    AuthorizationDenied {
        principal_id: AgentId,
        resource_uri: String,
        reason: String,
        at: DateTime<Utc>,
    },
    AuthorizationPending {
        principal_id: AgentId,
        resource_uri: String,
        proposal_id: ProposalId,
        at: DateTime<Utc>,
    },
    CapabilityGranted {
        principal_id: AgentId,
        capability_id: CapabilityId,
        resource_uri: String,
        at: DateTime<Utc>,
    },
    CapabilityRevoked {
        capability_id: CapabilityId,
        at: DateTime<Utc>,
    },
    IdentitySuspended {
        agent_id: AgentId,
        reason: String,
        at: DateTime<Utc>,
    },
    IdentityRevoked {
        agent_id: AgentId,
        reason: String,
        cascade_count: usize,
        at: DateTime<Utc>,
    },
    TrustFrozen {
        agent_id: AgentId,
        at: DateTime<Utc>,
    },
}

impl KernelEvent {
    /// Short stable name, useful as a metrics/event key.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AuthorizationGranted { .. } => "authorization_granted",
            Self::AuthorizationDenied { .. } => "authorization_denied",
            Self::AuthorizationPending { .. } => "authorization_pending",
            Self::CapabilityGranted { .. } => "capability_granted",
            Self::CapabilityRevoked { .. } => "capability_revoked",
            Self::IdentitySuspended { .. } => "identity_suspended",
            Self::IdentityRevoked { .. } => "identity_revoked",
            Self::TrustFrozen { .. } => "trust_frozen",
        }
    }
}
