//! Arbor Types - shared data model for the security kernel
//!
//! Capabilities are the ONLY proof of permission in Arbor. Everything the
//! kernel decides is phrased in terms of the types defined here.

#![deny(unsafe_code)]

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod constraint;
pub mod event;
pub mod uri;

pub use constraint::{Constraint, ConstraintKind};
pub use event::KernelEvent;
pub use uri::{path_segment_prefix, ResourceUri, UriError};

/// Identifier of an agent principal.
///
/// Derived deterministically from the agent's public key (BLAKE3 hex), so a
/// forged id requires breaking the hash or the signature scheme.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilityId(pub String);

impl CapabilityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProposalId(pub String);

impl ProposalId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for ProposalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReflexId(pub String);

impl ReflexId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for ReflexId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Constraint parameters keyed by constraint name.
///
/// A `BTreeMap` keeps iteration (and therefore canonical serialization)
/// deterministic. Unknown keys are carried along and ignored at enforcement
/// time so older kernels accept capabilities issued by newer ones.
pub type ConstraintMap = BTreeMap<String, serde_json::Value>;

/// An unforgeable, signed token granting a principal an action on a resource.
///
/// Never mutated in place after issuance; revocation is a tombstone in the
/// store, and delegation produces a new capability with its own id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub id: CapabilityId,
    pub resource_uri: String,
    pub principal_id: AgentId,
    pub issuer_id: AgentId,
    #[serde(default)]
    pub constraints: ConstraintMap,
    pub issued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Remaining delegation hops. Zero means the holder may not re-grant.
    pub delegation_depth: u32,
    #[serde(default)]
    pub delegation_chain: Vec<DelegationRecord>,
    /// Signature of the issuing authority over the canonical payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer_signature: Option<String>,
}

impl Capability {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// One hop of a delegation chain, signed by the delegating principal's own
/// key (distinct from the issuer signature on the capability itself).
///
/// Records carry both capability ids of the hop so a verifier can recompute
/// the signed payload and check that the chain is contiguous: each record's
/// parent must be the previous record's child, and the final child must be
/// the capability the chain is attached to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DelegationRecord {
    pub delegator_id: AgentId,
    pub parent_capability_id: CapabilityId,
    pub child_capability_id: CapabilityId,
    /// Constraints the child was narrowed to at this hop.
    #[serde(default)]
    pub constraints: ConstraintMap,
    /// Hex Ed25519 signature over the hop payload
    /// `(parent id, child id, child constraints)`.
    pub delegator_signature: String,
}

/// Lifecycle status of a registered identity.
///
/// Transitions: `Active ⇄ Suspended`, either → `Revoked` (terminal).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityStatus {
    Active,
    Suspended { reason: String },
    Revoked { reason: String },
}

impl IdentityStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, IdentityStatus::Active)
    }
}

/// A registrable agent identity. Holds no secret material; the private key
/// stays with the client that generated it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub agent_id: AgentId,
    /// Hex-encoded Ed25519 verifying key.
    pub public_key: String,
    /// Hex-encoded X25519 public key for encrypted channels.
    pub encryption_public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: IdentityStatus,
}

/// Outcome of a successful authorization call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AuthDecision {
    Authorized { capability_id: CapabilityId },
    /// The matched capability requires approval; the escalation collaborator
    /// opened a proposal and the caller must wait for it.
    PendingApproval { proposal_id: ProposalId },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capability(expires_at: Option<DateTime<Utc>>) -> Capability {
        Capability {
            id: CapabilityId::generate(),
            resource_uri: "arbor://fs/read/project".to_string(),
            principal_id: AgentId::new("agent-a"),
            issuer_id: AgentId::new("system"),
            constraints: ConstraintMap::new(),
            issued_at: Utc::now(),
            expires_at,
            delegation_depth: 3,
            delegation_chain: vec![],
            issuer_signature: None,
        }
    }

    #[test]
    fn capability_without_expiry_never_expires() {
        let cap = capability(None);
        assert!(!cap.is_expired(Utc::now() + chrono::Duration::days(3650)));
    }

    #[test]
    fn capability_expires_at_boundary() {
        let now = Utc::now();
        let cap = capability(Some(now));
        assert!(cap.is_expired(now));
        assert!(!cap.is_expired(now - chrono::Duration::seconds(1)));
    }

    #[test]
    fn generated_ids_are_distinct_and_displayable() {
        assert_ne!(CapabilityId::generate(), CapabilityId::generate());
        assert_ne!(ProposalId::generate(), ProposalId::generate());
        assert_ne!(ReflexId::generate(), ReflexId::generate());
        let id = ReflexId::generate();
        assert_eq!(id.to_string(), id.0);
    }

    #[test]
    fn capability_round_trips_through_json() {
        let mut cap = capability(Some(Utc::now()));
        cap.constraints
            .insert("rate_limit".to_string(), serde_json::json!(5));
        let json = serde_json::to_string(&cap).unwrap();
        let back: Capability = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cap);
    }

    #[test]
    fn identity_status_transitions_are_distinguishable() {
        assert!(IdentityStatus::Active.is_active());
        assert!(!IdentityStatus::Suspended {
            reason: "audit".to_string()
        }
        .is_active());
        assert!(!IdentityStatus::Revoked {
            reason: "compromised".to_string()
        }
        .is_active());
    }
}
