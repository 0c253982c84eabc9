//! Arbor Capability - keyed store of issued capabilities
//!
//! Capabilities are never mutated in place and never deleted: revocation is
//! a tombstone, so a revoked grant stays auditable. All mutations take one
//! write lock per index, so a `get` immediately after a `put` observes the
//! new value from any caller.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::sync::RwLock;

use arbor_types::{path_segment_prefix, AgentId, Capability, CapabilityId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Concurrency-safe store of issued capabilities.
pub struct CapabilityStore {
    capabilities: RwLock<HashMap<CapabilityId, StoredCapability>>,
    principal_index: RwLock<HashMap<AgentId, Vec<CapabilityId>>>,
}

/// A stored capability plus its revocation tombstone.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredCapability {
    pub capability: Capability,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation: Option<Revocation>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Revocation {
    pub reason: String,
    pub revoked_at: DateTime<Utc>,
}

/// Filtering options for [`CapabilityStore::list_for_principal`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ListOptions {
    pub include_revoked: bool,
    pub include_expired: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total: usize,
    pub active: usize,
    pub revoked: usize,
    pub expired: usize,
}

impl CapabilityStore {
    pub fn new() -> Self {
        Self {
            capabilities: RwLock::new(HashMap::new()),
            principal_index: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a capability, keyed by its id. Re-putting a live id replaces
    /// the stored value and keeps the principal index in step; re-putting a
    /// tombstoned id is rejected, so revocation cannot be undone by a write.
    pub fn put(&self, capability: Capability) -> Result<(), CapabilityError> {
        let id = capability.id.clone();
        let principal = capability.principal_id.clone();

        let mut capabilities = self
            .capabilities
            .write()
            .map_err(|_| CapabilityError::LockError)?;
        let mut index = self
            .principal_index
            .write()
            .map_err(|_| CapabilityError::LockError)?;

        let previous_principal = match capabilities.get(&id) {
            Some(stored) if stored.revocation.is_some() => {
                return Err(CapabilityError::AlreadyRevoked(id));
            }
            Some(stored) => Some(stored.capability.principal_id.clone()),
            None => None,
        };

        capabilities.insert(
            id.clone(),
            StoredCapability {
                capability,
                revocation: None,
            },
        );

        match previous_principal {
            Some(old) if old != principal => {
                if let Some(ids) = index.get_mut(&old) {
                    ids.retain(|existing| existing != &id);
                }
                index.entry(principal).or_default().push(id);
            }
            Some(_) => {}
            None => index.entry(principal).or_default().push(id),
        }
        Ok(())
    }

    pub fn get(&self, id: &CapabilityId) -> Result<Capability, CapabilityError> {
        let capabilities = self
            .capabilities
            .read()
            .map_err(|_| CapabilityError::LockError)?;
        capabilities
            .get(id)
            .map(|stored| stored.capability.clone())
            .ok_or_else(|| CapabilityError::NotFound(id.clone()))
    }

    /// Fetch a capability only if it has not been tombstoned. Delegation
    /// goes through this so a revoked parent cannot seed new grants.
    pub fn get_live(&self, id: &CapabilityId) -> Result<Capability, CapabilityError> {
        let capabilities = self
            .capabilities
            .read()
            .map_err(|_| CapabilityError::LockError)?;
        let stored = capabilities
            .get(id)
            .ok_or_else(|| CapabilityError::NotFound(id.clone()))?;
        if stored.revocation.is_some() {
            return Err(CapabilityError::AlreadyRevoked(id.clone()));
        }
        Ok(stored.capability.clone())
    }

    /// Tombstone a capability. Idempotent revocation is an error so callers
    /// notice double-revokes.
    pub fn revoke(&self, id: &CapabilityId, reason: &str) -> Result<(), CapabilityError> {
        let mut capabilities = self
            .capabilities
            .write()
            .map_err(|_| CapabilityError::LockError)?;
        let stored = capabilities
            .get_mut(id)
            .ok_or_else(|| CapabilityError::NotFound(id.clone()))?;
        if stored.revocation.is_some() {
            return Err(CapabilityError::AlreadyRevoked(id.clone()));
        }
        stored.revocation = Some(Revocation {
            reason: reason.to_string(),
            revoked_at: Utc::now(),
        });
        info!(capability_id = %id, "capability revoked");
        Ok(())
    }

    /// Find a live capability of `principal` covering `resource_uri`.
    ///
    /// A stored capability covers the request when its URI is equal to, or a
    /// proper path-segment prefix of, the requested URI — the same matching
    /// policy `allowed_paths` uses, so the two layers cannot disagree.
    /// Revoked and expired capabilities never match.
    pub fn find_authorizing(
        &self,
        principal: &AgentId,
        resource_uri: &str,
    ) -> Result<Capability, CapabilityError> {
        let now = Utc::now();
        let capabilities = self
            .capabilities
            .read()
            .map_err(|_| CapabilityError::LockError)?;
        let index = self
            .principal_index
            .read()
            .map_err(|_| CapabilityError::LockError)?;

        let ids = index
            .get(principal)
            .ok_or(CapabilityError::NoMatch)?;

        ids.iter()
            .filter_map(|id| capabilities.get(id))
            .filter(|stored| stored.revocation.is_none())
            .filter(|stored| !stored.capability.is_expired(now))
            .find(|stored| path_segment_prefix(&stored.capability.resource_uri, resource_uri))
            .map(|stored| stored.capability.clone())
            .ok_or(CapabilityError::NoMatch)
    }

    /// All capabilities issued to a principal, newest filtering applied per
    /// `opts`.
    pub fn list_for_principal(
        &self,
        principal: &AgentId,
        opts: ListOptions,
    ) -> Result<Vec<Capability>, CapabilityError> {
        let now = Utc::now();
        let capabilities = self
            .capabilities
            .read()
            .map_err(|_| CapabilityError::LockError)?;
        let index = self
            .principal_index
            .read()
            .map_err(|_| CapabilityError::LockError)?;

        let Some(ids) = index.get(principal) else {
            return Ok(vec![]);
        };

        Ok(ids
            .iter()
            .filter_map(|id| capabilities.get(id))
            .filter(|stored| opts.include_revoked || stored.revocation.is_none())
            .filter(|stored| opts.include_expired || !stored.capability.is_expired(now))
            .map(|stored| stored.capability.clone())
            .collect())
    }

    /// Tombstone every live capability of a principal in one sweep under a
    /// single write lock — the cascade primitive behind identity revocation.
    /// Returns how many capabilities were invalidated.
    pub fn revoke_all_for_principal(
        &self,
        principal: &AgentId,
        reason: &str,
    ) -> Result<usize, CapabilityError> {
        let mut capabilities = self
            .capabilities
            .write()
            .map_err(|_| CapabilityError::LockError)?;
        let index = self
            .principal_index
            .read()
            .map_err(|_| CapabilityError::LockError)?;

        let Some(ids) = index.get(principal) else {
            return Ok(0);
        };

        let now = Utc::now();
        let mut count = 0;
        for id in ids {
            if let Some(stored) = capabilities.get_mut(id) {
                if stored.revocation.is_none() {
                    stored.revocation = Some(Revocation {
                        reason: reason.to_string(),
                        revoked_at: now,
                    });
                    count += 1;
                }
            }
        }
        info!(principal = %principal, count, "cascade revocation");
        Ok(count)
    }

    pub fn stats(&self) -> Result<StoreStats, CapabilityError> {
        let now = Utc::now();
        let capabilities = self
            .capabilities
            .read()
            .map_err(|_| CapabilityError::LockError)?;
        let mut stats = StoreStats {
            total: capabilities.len(),
            ..Default::default()
        };
        for stored in capabilities.values() {
            if stored.revocation.is_some() {
                stats.revoked += 1;
            } else if stored.capability.is_expired(now) {
                stats.expired += 1;
            } else {
                stats.active += 1;
            }
        }
        Ok(stats)
    }
}

impl Default for CapabilityStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability store errors.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("capability not found: {0}")]
    NotFound(CapabilityId),

    #[error("capability already revoked: {0}")]
    AlreadyRevoked(CapabilityId),

    #[error("no capability authorizes this principal for this resource")]
    NoMatch,

    #[error("lock error")]
    LockError,
}
