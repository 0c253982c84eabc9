//! Arbor Identity - agent identity registry and lifecycle
//!
//! Identity is the foundation of accountability: every capability names a
//! registered principal. Identities move through
//! `active ⇄ suspended → revoked` and are never physically deleted outside
//! test teardown, so the audit trail stays intact.

#![deny(unsafe_code)]

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::RwLock;

use arbor_crypto::derive_agent_id;
use arbor_types::{AgentId, Identity, IdentityStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Registry mapping agent id → public key + lifecycle status.
pub struct IdentityRegistry {
    agents: RwLock<HashMap<AgentId, IdentityRecord>>,
    name_index: RwLock<HashMap<String, Vec<AgentId>>>,
}

/// A registered identity plus its lifecycle audit trail.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub identity: Identity,
    pub registered_at: DateTime<Utc>,
    pub status_history: Vec<StatusChange>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: IdentityStatus,
    pub at: DateTime<Utc>,
}

/// Registry counters, consistent with what `lookup` observes at the same
/// instant (computed under one read lock).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityStats {
    pub total_registered: usize,
    pub active: usize,
    pub suspended: usize,
    pub revoked: usize,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            name_index: RwLock::new(HashMap::new()),
        }
    }

    /// Register an identity, making it discoverable.
    ///
    /// Rejects ids that do not hash-match their public key (spoofing) and
    /// duplicate registrations. Under concurrent duplicate attempts exactly
    /// one caller wins; distinct identities never lose writes.
    pub fn register(&self, identity: Identity) -> Result<(), IdentityError> {
        let derived = derive_agent_id(&identity.public_key)
            .map_err(|e| IdentityError::InvalidPublicKey(e.to_string()))?;
        if derived != identity.agent_id {
            warn!(agent_id = %identity.agent_id, "registration rejected: agent id mismatch");
            return Err(IdentityError::AgentIdMismatch {
                claimed: identity.agent_id.clone(),
                derived,
            });
        }

        let agent_id = identity.agent_id.clone();
        let name = identity.name.clone();

        let mut agents = self.agents.write().map_err(|_| IdentityError::LockError)?;
        match agents.entry(agent_id.clone()) {
            Entry::Occupied(_) => return Err(IdentityError::AlreadyRegistered(agent_id)),
            Entry::Vacant(slot) => {
                let now = Utc::now();
                slot.insert(IdentityRecord {
                    identity: Identity {
                        status: IdentityStatus::Active,
                        ..identity
                    },
                    registered_at: now,
                    status_history: vec![StatusChange {
                        status: IdentityStatus::Active,
                        at: now,
                    }],
                });
            }
        }
        drop(agents);

        if let Some(name) = name {
            let mut index = self
                .name_index
                .write()
                .map_err(|_| IdentityError::LockError)?;
            index.entry(name).or_default().push(agent_id.clone());
        }

        info!(agent_id = %agent_id, "identity registered");
        Ok(())
    }

    /// Resolve an agent id to its current public key (hex).
    ///
    /// Suspended and revoked identities fail distinctly from unknown ones —
    /// callers must be able to tell "never existed" from "no longer trusted".
    pub fn lookup(&self, agent_id: &AgentId) -> Result<String, IdentityError> {
        let agents = self.agents.read().map_err(|_| IdentityError::LockError)?;
        let record = agents
            .get(agent_id)
            .ok_or_else(|| IdentityError::NotFound(agent_id.clone()))?;
        match &record.identity.status {
            IdentityStatus::Active => Ok(record.identity.public_key.clone()),
            IdentityStatus::Suspended { .. } => {
                Err(IdentityError::IdentitySuspended(agent_id.clone()))
            }
            IdentityStatus::Revoked { .. } => Err(IdentityError::IdentityRevoked(agent_id.clone())),
        }
    }

    pub fn registered(&self, agent_id: &AgentId) -> bool {
        self.agents
            .read()
            .map(|agents| agents.contains_key(agent_id))
            .unwrap_or(false)
    }

    pub fn status(&self, agent_id: &AgentId) -> Result<IdentityStatus, IdentityError> {
        let agents = self.agents.read().map_err(|_| IdentityError::LockError)?;
        agents
            .get(agent_id)
            .map(|record| record.identity.status.clone())
            .ok_or_else(|| IdentityError::NotFound(agent_id.clone()))
    }

    pub fn record(&self, agent_id: &AgentId) -> Result<IdentityRecord, IdentityError> {
        let agents = self.agents.read().map_err(|_| IdentityError::LockError)?;
        agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| IdentityError::NotFound(agent_id.clone()))
    }

    /// Suspend an active identity. Reversible via [`resume`](Self::resume).
    pub fn suspend(&self, agent_id: &AgentId, reason: Option<&str>) -> Result<(), IdentityError> {
        self.transition(agent_id, |status| match status {
            IdentityStatus::Active => Ok(IdentityStatus::Suspended {
                reason: reason.unwrap_or("suspended").to_string(),
            }),
            IdentityStatus::Suspended { .. } => {
                Err(IdentityError::IdentitySuspended(agent_id.clone()))
            }
            IdentityStatus::Revoked { .. } => Err(IdentityError::IdentityRevoked(agent_id.clone())),
        })
    }

    /// Reactivate a suspended identity.
    pub fn resume(&self, agent_id: &AgentId) -> Result<(), IdentityError> {
        self.transition(agent_id, |status| match status {
            IdentityStatus::Suspended { .. } => Ok(IdentityStatus::Active),
            IdentityStatus::Active => Err(IdentityError::NotSuspended(agent_id.clone())),
            IdentityStatus::Revoked { .. } => Err(IdentityError::IdentityRevoked(agent_id.clone())),
        })
    }

    /// Revoke an identity. Terminal: a revoked identity can never be
    /// resumed, and re-registration is blocked because the record remains.
    pub fn revoke(&self, agent_id: &AgentId, reason: Option<&str>) -> Result<(), IdentityError> {
        self.transition(agent_id, |status| match status {
            IdentityStatus::Revoked { .. } => Err(IdentityError::IdentityRevoked(agent_id.clone())),
            _ => Ok(IdentityStatus::Revoked {
                reason: reason.unwrap_or("revoked").to_string(),
            }),
        })
    }

    /// All agent ids registered under a display name. Names are not unique.
    pub fn lookup_by_name(&self, name: &str) -> Result<Vec<AgentId>, IdentityError> {
        let index = self
            .name_index
            .read()
            .map_err(|_| IdentityError::LockError)?;
        Ok(index.get(name).cloned().unwrap_or_default())
    }

    /// Physically remove an identity. Test/teardown only — production
    /// revocation keeps the record for audit.
    pub fn deregister(&self, agent_id: &AgentId) -> Result<(), IdentityError> {
        let mut agents = self.agents.write().map_err(|_| IdentityError::LockError)?;
        let record = agents
            .remove(agent_id)
            .ok_or_else(|| IdentityError::NotFound(agent_id.clone()))?;
        drop(agents);

        if let Some(name) = record.identity.name {
            let mut index = self
                .name_index
                .write()
                .map_err(|_| IdentityError::LockError)?;
            if let Some(ids) = index.get_mut(&name) {
                ids.retain(|id| id != agent_id);
                if ids.is_empty() {
                    index.remove(&name);
                }
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> Result<IdentityStats, IdentityError> {
        let agents = self.agents.read().map_err(|_| IdentityError::LockError)?;
        let mut stats = IdentityStats {
            total_registered: agents.len(),
            ..Default::default()
        };
        for record in agents.values() {
            match record.identity.status {
                IdentityStatus::Active => stats.active += 1,
                IdentityStatus::Suspended { .. } => stats.suspended += 1,
                IdentityStatus::Revoked { .. } => stats.revoked += 1,
            }
        }
        Ok(stats)
    }

    fn transition<F>(&self, agent_id: &AgentId, next: F) -> Result<(), IdentityError>
    where
        F: FnOnce(&IdentityStatus) -> Result<IdentityStatus, IdentityError>,
    {
        let mut agents = self.agents.write().map_err(|_| IdentityError::LockError)?;
        let record = agents
            .get_mut(agent_id)
            .ok_or_else(|| IdentityError::NotFound(agent_id.clone()))?;
        let new_status = next(&record.identity.status)?;
        info!(agent_id = %agent_id, status = ?new_status, "identity status change");
        record.identity.status = new_status.clone();
        record.status_history.push(StatusChange {
            status: new_status,
            at: Utc::now(),
        });
        Ok(())
    }
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity-related errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("agent already registered: {0}")]
    AlreadyRegistered(AgentId),

    #[error("agent id mismatch: claimed {claimed}, derived {derived} from public key")]
    AgentIdMismatch { claimed: AgentId, derived: AgentId },

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("agent not found: {0}")]
    NotFound(AgentId),

    #[error("identity suspended: {0}")]
    IdentitySuspended(AgentId),

    #[error("identity revoked: {0}")]
    IdentityRevoked(AgentId),

    #[error("identity is not suspended: {0}")]
    NotSuspended(AgentId),

    #[error("lock error")]
    LockError,
}
