//! The authorization kernel: the single decision point.
//!
//! Every permission question funnels through [`AuthorizationKernel::authorize`].
//! The pipeline short-circuits on the first failure and emits an audit event
//! whichever way the decision goes.

use std::sync::Arc;

use arbor_capability::{CapabilityError, CapabilityStore, ListOptions};
use arbor_constraint::ConstraintEngine;
use arbor_crypto::{
    sign_capability, sign_delegation, verify_capability, verify_delegation_chain, verify_request,
    Keypair,
};
use arbor_identity::{IdentityError, IdentityRegistry};
use arbor_types::{
    constraint::requires_approval, path_segment_prefix, AgentId, AuthDecision, Capability,
    CapabilityId, Constraint, ConstraintKind, ConstraintMap, Identity, IdentityStatus, KernelEvent,
    ProposalId, ResourceUri,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::{AuthorizeOptions, DelegateOptions, GrantOptions, KernelConfig};
use crate::hooks::{EscalationHook, EventSink, NullSink, TrustMonitor};
use crate::AuthError;

/// The kernel. Owns the identity registry, capability store, constraint
/// engine, and the system authority keypair that signs every grant.
pub struct AuthorizationKernel {
    config: KernelConfig,
    identities: IdentityRegistry,
    capabilities: CapabilityStore,
    constraints: ConstraintEngine,
    authority: Keypair,
    authority_public_key: String,
    sink: Arc<dyn EventSink>,
    escalation: Option<Arc<dyn EscalationHook>>,
    trust: Option<Arc<dyn TrustMonitor>>,
}

impl AuthorizationKernel {
    pub fn new(config: KernelConfig) -> Self {
        Self::with_hooks(config, Arc::new(NullSink), None, None)
    }

    pub fn with_sink(config: KernelConfig, sink: Arc<dyn EventSink>) -> Self {
        Self::with_hooks(config, sink, None, None)
    }

    pub fn with_hooks(
        config: KernelConfig,
        sink: Arc<dyn EventSink>,
        escalation: Option<Arc<dyn EscalationHook>>,
        trust: Option<Arc<dyn TrustMonitor>>,
    ) -> Self {
        let authority = Keypair::generate();
        let authority_public_key = authority.public_key_hex();
        info!(authority = %authority.agent_id(), "authorization kernel initialized");
        Self {
            config,
            identities: IdentityRegistry::new(),
            capabilities: CapabilityStore::new(),
            constraints: ConstraintEngine::new(),
            authority,
            authority_public_key,
            sink,
            escalation,
            trust,
        }
    }

    /// The authority's agent id. Appears as `issuer_id` on every grant.
    pub fn authority_id(&self) -> AgentId {
        self.authority.agent_id()
    }

    /// Hex public key external parties can verify grants against.
    pub fn authority_public_key(&self) -> &str {
        &self.authority_public_key
    }

    // ----- authorization ---------------------------------------------------

    /// Decide whether `principal` may perform `resource_uri` right now.
    ///
    /// The pipeline short-circuits: identity status, trust freeze, signed
    /// request, capability lookup, signature and delegation-chain
    /// verification, constraints, approval escalation. A granted, pending,
    /// or denied event is emitted regardless of outcome.
    pub fn authorize(
        &self,
        principal: &AgentId,
        resource_uri: &str,
        action: Option<&str>,
        opts: AuthorizeOptions,
    ) -> Result<AuthDecision, AuthError> {
        let result = self.authorize_inner(principal, resource_uri, action, &opts);
        let at = Utc::now();
        match &result {
            Ok(AuthDecision::Authorized { capability_id }) => {
                info!(principal = %principal, resource = resource_uri, "authorized");
                self.sink.emit(KernelEvent::AuthorizationGranted {
                    principal_id: principal.clone(),
                    resource_uri: resource_uri.to_string(),
                    capability_id: capability_id.clone(),
                    at,
                });
            }
            Ok(AuthDecision::PendingApproval { proposal_id }) => {
                info!(principal = %principal, resource = resource_uri, proposal = %proposal_id, "pending approval");
                self.sink.emit(KernelEvent::AuthorizationPending {
                    principal_id: principal.clone(),
                    resource_uri: resource_uri.to_string(),
                    proposal_id: proposal_id.clone(),
                    at,
                });
            }
            Err(err) => {
                warn!(principal = %principal, resource = resource_uri, error = %err, "denied");
                self.sink.emit(KernelEvent::AuthorizationDenied {
                    principal_id: principal.clone(),
                    resource_uri: resource_uri.to_string(),
                    reason: err.to_string(),
                    at,
                });
            }
        }
        result
    }

    fn authorize_inner(
        &self,
        principal: &AgentId,
        resource_uri: &str,
        action: Option<&str>,
        opts: &AuthorizeOptions,
    ) -> Result<AuthDecision, AuthError> {
        ResourceUri::parse(resource_uri)?;

        if self.config.verify_identity {
            self.require_active(principal)?;
        }

        if self.config.trust_checks {
            if let Some(monitor) = &self.trust {
                if monitor.is_frozen(principal) {
                    self.sink.emit(KernelEvent::TrustFrozen {
                        agent_id: principal.clone(),
                        at: Utc::now(),
                    });
                    return Err(AuthError::TrustFrozen(principal.clone()));
                }
            }
        }

        if self.config.require_signed_requests && opts.signed_request.is_none() {
            return Err(AuthError::InvalidSignedRequest);
        }
        if let Some(request) = &opts.signed_request {
            if &request.principal_id != principal
                || request.resource_uri != resource_uri
                || request.action.as_deref() != action
            {
                return Err(AuthError::InvalidSignedRequest);
            }
            let public_key = self
                .identities
                .lookup(principal)
                .map_err(|_| AuthError::Unauthorized)?;
            verify_request(request, &public_key)
                .map_err(|_| AuthError::InvalidSignedRequest)?;
        }

        let capability = match self.capabilities.find_authorizing(principal, resource_uri) {
            Ok(capability) => capability,
            Err(CapabilityError::NoMatch) => return Err(AuthError::Unauthorized),
            Err(e) => return Err(e.into()),
        };

        verify_capability(&capability, &self.authority_public_key)?;
        verify_delegation_chain(&capability, |id| self.identities.lookup(id).ok())?;

        if self.config.enforce_constraints {
            self.constraints
                .enforce(&capability.constraints, principal, resource_uri)?;
        }

        if requires_approval(&capability.constraints) {
            let proposal_id = self
                .escalation
                .as_ref()
                .and_then(|hook| hook.propose(principal, resource_uri, action))
                .unwrap_or_else(ProposalId::generate);
            return Ok(AuthDecision::PendingApproval { proposal_id });
        }

        Ok(AuthDecision::Authorized {
            capability_id: capability.id,
        })
    }

    /// Capability-presence fast path: would a live capability cover this
    /// request? No constraint evaluation, no token consumption, no events.
    pub fn can(&self, principal: &AgentId, resource_uri: &str) -> bool {
        self.capabilities
            .find_authorizing(principal, resource_uri)
            .is_ok()
    }

    // ----- grants ----------------------------------------------------------

    /// Issue a capability to a registered, active principal, signed by the
    /// system authority.
    pub fn grant(
        &self,
        principal: &AgentId,
        resource_uri: &str,
        opts: GrantOptions,
    ) -> Result<Capability, AuthError> {
        ResourceUri::parse(resource_uri)?;
        self.require_active(principal)?;

        let now = Utc::now();
        let expires_at = opts
            .expires_at
            .or_else(|| self.config.default_grant_ttl.map(|ttl| now + ttl));
        let capability = Capability {
            id: CapabilityId::generate(),
            resource_uri: resource_uri.to_string(),
            principal_id: principal.clone(),
            issuer_id: self.authority.agent_id(),
            constraints: opts.constraints,
            issued_at: now,
            expires_at,
            delegation_depth: opts
                .delegation_depth
                .unwrap_or(self.config.max_delegation_depth),
            delegation_chain: vec![],
            issuer_signature: None,
        };
        let signed = sign_capability(capability, &self.authority)?;
        self.capabilities.put(signed.clone())?;

        info!(principal = %principal, resource = resource_uri, capability = %signed.id, "capability granted");
        self.sink.emit(KernelEvent::CapabilityGranted {
            principal_id: principal.clone(),
            capability_id: signed.id.clone(),
            resource_uri: resource_uri.to_string(),
            at: now,
        });
        Ok(signed)
    }

    /// Tombstone a capability.
    pub fn revoke(&self, capability_id: &CapabilityId, reason: &str) -> Result<(), AuthError> {
        self.capabilities.revoke(capability_id, reason)?;
        self.sink.emit(KernelEvent::CapabilityRevoked {
            capability_id: capability_id.clone(),
            at: Utc::now(),
        });
        Ok(())
    }

    /// Re-grant (a narrowing of) a capability to another principal.
    ///
    /// The delegator must hold the live parent and sign the hop with its own
    /// key; the child may only tighten constraints, never outlives the
    /// parent, and carries one less delegation hop.
    pub fn delegate(
        &self,
        capability_id: &CapabilityId,
        new_principal: &AgentId,
        opts: DelegateOptions,
        delegator: &Keypair,
    ) -> Result<Capability, AuthError> {
        let parent = self.capabilities.get_live(capability_id)?;
        let now = Utc::now();
        if parent.is_expired(now) {
            return Err(AuthError::CapabilityExpired(parent.id.clone()));
        }
        if delegator.agent_id() != parent.principal_id {
            debug!(capability = %parent.id, "delegation attempted by non-holder");
            return Err(AuthError::Unauthorized);
        }
        self.require_active(&parent.principal_id)?;
        self.require_active(new_principal)?;
        if parent.delegation_depth == 0 {
            return Err(AuthError::DelegationDepthExhausted(parent.id.clone()));
        }

        let child_constraints = match opts.constraints {
            Some(constraints) => {
                ensure_narrowing(&parent.constraints, &constraints)?;
                constraints
            }
            None => parent.constraints.clone(),
        };
        let expires_at = clamp_expiry(parent.expires_at, opts.expires_at);

        let mut child = Capability {
            id: CapabilityId::generate(),
            resource_uri: parent.resource_uri.clone(),
            principal_id: new_principal.clone(),
            issuer_id: self.authority.agent_id(),
            constraints: child_constraints,
            issued_at: now,
            expires_at,
            delegation_depth: parent.delegation_depth - 1,
            delegation_chain: parent.delegation_chain.clone(),
            issuer_signature: None,
        };
        let record = sign_delegation(&parent, &child, delegator)?;
        child.delegation_chain.push(record);
        let signed = sign_capability(child, &self.authority)?;
        self.capabilities.put(signed.clone())?;

        info!(
            parent = %parent.id,
            child = %signed.id,
            delegator = %parent.principal_id,
            delegate = %new_principal,
            "capability delegated"
        );
        self.sink.emit(KernelEvent::CapabilityGranted {
            principal_id: new_principal.clone(),
            capability_id: signed.id.clone(),
            resource_uri: signed.resource_uri.clone(),
            at: now,
        });
        Ok(signed)
    }

    pub fn list_capabilities(
        &self,
        principal: &AgentId,
        opts: ListOptions,
    ) -> Result<Vec<Capability>, AuthError> {
        Ok(self.capabilities.list_for_principal(principal, opts)?)
    }

    // ----- identity surface ------------------------------------------------

    /// Mint a fresh identity. The keypair stays with the caller; only the
    /// public record can be registered.
    pub fn generate_identity(&self, name: Option<String>) -> (Identity, Keypair) {
        let keypair = Keypair::generate();
        (keypair.identity(name), keypair)
    }

    pub fn register_identity(&self, identity: Identity) -> Result<(), AuthError> {
        Ok(self.identities.register(identity)?)
    }

    pub fn lookup_public_key(&self, agent_id: &AgentId) -> Result<String, AuthError> {
        Ok(self.identities.lookup(agent_id)?)
    }

    pub fn identity_status(&self, agent_id: &AgentId) -> Result<IdentityStatus, AuthError> {
        Ok(self.identities.status(agent_id)?)
    }

    pub fn suspend_identity(
        &self,
        agent_id: &AgentId,
        reason: Option<&str>,
    ) -> Result<(), AuthError> {
        self.identities.suspend(agent_id, reason)?;
        self.sink.emit(KernelEvent::IdentitySuspended {
            agent_id: agent_id.clone(),
            reason: reason.unwrap_or("suspended").to_string(),
            at: Utc::now(),
        });
        Ok(())
    }

    pub fn resume_identity(&self, agent_id: &AgentId) -> Result<(), AuthError> {
        Ok(self.identities.resume(agent_id)?)
    }

    /// Revoke an identity and cascade: every capability held by the agent is
    /// tombstoned in one sweep. Returns how many were invalidated.
    pub fn revoke_identity(
        &self,
        agent_id: &AgentId,
        reason: Option<&str>,
    ) -> Result<usize, AuthError> {
        self.identities.revoke(agent_id, reason)?;
        let cascade_count = self
            .capabilities
            .revoke_all_for_principal(agent_id, reason.unwrap_or("identity revoked"))?;

        info!(agent_id = %agent_id, cascade_count, "identity revoked with cascade");
        self.sink.emit(KernelEvent::IdentityRevoked {
            agent_id: agent_id.clone(),
            reason: reason.unwrap_or("revoked").to_string(),
            cascade_count,
            at: Utc::now(),
        });
        Ok(cascade_count)
    }

    fn require_active(&self, agent_id: &AgentId) -> Result<(), AuthError> {
        match self.identities.status(agent_id) {
            Ok(IdentityStatus::Active) => Ok(()),
            Ok(IdentityStatus::Suspended { .. }) => {
                Err(AuthError::IdentitySuspended(agent_id.clone()))
            }
            Ok(IdentityStatus::Revoked { .. }) => Err(AuthError::IdentityRevoked(agent_id.clone())),
            // An unknown principal is indistinguishable from an
            // unauthorized one, by policy.
            Err(IdentityError::NotFound(_)) => Err(AuthError::Unauthorized),
            Err(e) => Err(e.into()),
        }
    }
}

/// A child constraint map narrows its parent when every parent entry
/// survives at least as restrictive. New entries only tighten, so they are
/// always allowed.
fn ensure_narrowing(parent: &ConstraintMap, child: &ConstraintMap) -> Result<(), AuthError> {
    for (name, parent_params) in parent {
        let child_params = child.get(name).ok_or_else(|| {
            AuthError::ConstraintWidening(format!("constraint `{}` dropped", name))
        })?;

        let Some(kind) = ConstraintKind::from_name(name) else {
            // Unknown constraints are opaque: the only safe narrowing is
            // carrying them unchanged.
            if child_params != parent_params {
                return Err(AuthError::ConstraintWidening(format!(
                    "unknown constraint `{}` altered",
                    name
                )));
            }
            continue;
        };

        let parent_c = Constraint::parse(kind, parent_params)
            .map_err(AuthError::ConstraintWidening)?;
        let child_c = Constraint::parse(kind, child_params)
            .map_err(AuthError::ConstraintWidening)?;
        let narrowed = match (&parent_c, &child_c) {
            (Constraint::RateLimit(p), Constraint::RateLimit(c)) => c <= p,
            (
                Constraint::TimeWindow {
                    start_hour: ps,
                    end_hour: pe,
                },
                Constraint::TimeWindow {
                    start_hour: cs,
                    end_hour: ce,
                },
            ) => (0..24).all(|h| !hour_in_window(h, *cs, *ce) || hour_in_window(h, *ps, *pe)),
            (Constraint::AllowedPaths(p), Constraint::AllowedPaths(c)) => c
                .iter()
                .all(|child_path| p.iter().any(|parent_path| {
                    path_segment_prefix(parent_path, child_path)
                })),
            (Constraint::RequiresApproval(p), Constraint::RequiresApproval(c)) => *c || !*p,
            _ => false,
        };
        if !narrowed {
            return Err(AuthError::ConstraintWidening(format!(
                "constraint `{}` widened by delegation",
                name
            )));
        }
    }
    Ok(())
}

fn hour_in_window(hour: u32, start: u32, end: u32) -> bool {
    if start <= end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}

fn clamp_expiry(
    parent: Option<DateTime<Utc>>,
    requested: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (parent, requested) {
        (Some(p), Some(r)) => Some(p.min(r)),
        (Some(p), None) => Some(p),
        (None, r) => r,
    }
}
