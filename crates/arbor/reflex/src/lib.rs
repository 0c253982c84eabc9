//! Arbor Reflex - capability-independent pattern guards
//!
//! Reflexes are standalone rules evaluated before an operation is attempted:
//! a cheap pre-filter that needs no capability at all. A matching reflex can
//! block the operation, warn, or merely log for audit. Dangerous-by-default
//! operations ship as built-in reflex sets; callers register their own under
//! the same uniqueness rules.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::sync::RwLock;

pub use arbor_types::ReflexId;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub mod builtin;

/// What a reflex matches against. A closed set, matched exhaustively.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ReflexTrigger {
    /// Regular expression over the proposed input (compiled at registration).
    Pattern(String),
    /// Literal path fragment: matches at a path-segment boundary or as a
    /// contained fragment of the input.
    Path(String),
    /// Exact action identifier.
    Action(String),
    /// Extension point: plain substring match.
    Custom(String),
}

/// What happens when a reflex matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReflexResponse {
    Block,
    Warn,
    Log,
}

/// A registered guard rule. Immutable once registered except for
/// enable/disable toggling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reflex {
    pub id: ReflexId,
    pub name: String,
    pub trigger: ReflexTrigger,
    pub response: ReflexResponse,
    /// Higher priority evaluates first.
    pub priority: i32,
    pub enabled: bool,
    pub message: String,
}

impl Reflex {
    pub fn new(
        name: impl Into<String>,
        trigger: ReflexTrigger,
        response: ReflexResponse,
        priority: i32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: ReflexId::generate(),
            name: name.into(),
            trigger,
            response,
            priority,
            enabled: true,
            message: message.into(),
        }
    }
}

/// A reflex that matched a non-blocking response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReflexMatch {
    pub reflex_id: ReflexId,
    pub name: String,
    pub message: String,
}

/// Outcome of evaluating an input against the registry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ReflexVerdict {
    /// A blocking reflex matched; the operation must not proceed.
    Blocked {
        reflex_id: ReflexId,
        name: String,
        message: String,
    },
    /// Nothing blocked. Warnings go to the caller, logged matches to audit.
    Allowed {
        warnings: Vec<ReflexMatch>,
        logged: Vec<ReflexMatch>,
    },
}

impl ReflexVerdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RegisterOptions {
    /// Replace an existing reflex under the same key instead of rejecting.
    pub force: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflexStats {
    pub total: usize,
    pub enabled: usize,
    pub blocking: usize,
    pub warning: usize,
    pub logging: usize,
}

struct CompiledReflex {
    reflex: Reflex,
    // Pattern triggers compile once here, not per evaluation.
    pattern: Option<Regex>,
}

impl CompiledReflex {
    fn compile(reflex: Reflex) -> Result<Self, ReflexError> {
        let pattern = match &reflex.trigger {
            ReflexTrigger::Pattern(source) => Some(
                Regex::new(source)
                    .map_err(|e| ReflexError::InvalidPattern(reflex.name.clone(), e.to_string()))?,
            ),
            _ => None,
        };
        Ok(Self { reflex, pattern })
    }

    fn matches(&self, input: &str) -> bool {
        match &self.reflex.trigger {
            ReflexTrigger::Pattern(_) => self
                .pattern
                .as_ref()
                .is_some_and(|regex| regex.is_match(input)),
            ReflexTrigger::Path(fragment) => input.contains(fragment.as_str()),
            ReflexTrigger::Action(action) => input == action,
            ReflexTrigger::Custom(fragment) => input.contains(fragment.as_str()),
        }
    }
}

/// Registry of priority-ordered reflexes, keyed by caller-chosen string.
pub struct ReflexRegistry {
    reflexes: RwLock<HashMap<String, CompiledReflex>>,
}

impl ReflexRegistry {
    /// An empty registry, without the built-in sets.
    pub fn new() -> Self {
        Self {
            reflexes: RwLock::new(HashMap::new()),
        }
    }

    /// A registry with the built-in shell/file/network reflex sets
    /// pre-registered.
    pub fn with_builtins() -> Result<Self, ReflexError> {
        let registry = Self::new();
        builtin::install(&registry)?;
        Ok(registry)
    }

    /// Register a reflex under a key. Duplicate keys are rejected unless
    /// `force` is set; invalid regex patterns never enter the registry.
    pub fn register(
        &self,
        key: impl Into<String>,
        reflex: Reflex,
        opts: RegisterOptions,
    ) -> Result<(), ReflexError> {
        let key = key.into();
        let compiled = CompiledReflex::compile(reflex)?;

        let mut reflexes = self.reflexes.write().map_err(|_| ReflexError::LockError)?;
        if !opts.force && reflexes.contains_key(&key) {
            return Err(ReflexError::DuplicateKey(key));
        }
        debug!(key = %key, name = %compiled.reflex.name, "reflex registered");
        reflexes.insert(key, compiled);
        Ok(())
    }

    pub fn unregister(&self, key: &str) -> Result<Reflex, ReflexError> {
        let mut reflexes = self.reflexes.write().map_err(|_| ReflexError::LockError)?;
        reflexes
            .remove(key)
            .map(|compiled| compiled.reflex)
            .ok_or_else(|| ReflexError::NotFound(key.to_string()))
    }

    pub fn get(&self, key: &str) -> Result<Reflex, ReflexError> {
        let reflexes = self.reflexes.read().map_err(|_| ReflexError::LockError)?;
        reflexes
            .get(key)
            .map(|compiled| compiled.reflex.clone())
            .ok_or_else(|| ReflexError::NotFound(key.to_string()))
    }

    /// All registered reflexes with their keys, priority-descending.
    pub fn list(&self) -> Result<Vec<(String, Reflex)>, ReflexError> {
        let reflexes = self.reflexes.read().map_err(|_| ReflexError::LockError)?;
        let mut all: Vec<_> = reflexes
            .iter()
            .map(|(key, compiled)| (key.clone(), compiled.reflex.clone()))
            .collect();
        all.sort_by(|a, b| b.1.priority.cmp(&a.1.priority).then(a.0.cmp(&b.0)));
        Ok(all)
    }

    /// Toggle a reflex without unregistering it.
    pub fn set_enabled(&self, key: &str, enabled: bool) -> Result<(), ReflexError> {
        let mut reflexes = self.reflexes.write().map_err(|_| ReflexError::LockError)?;
        let compiled = reflexes
            .get_mut(key)
            .ok_or_else(|| ReflexError::NotFound(key.to_string()))?;
        compiled.reflex.enabled = enabled;
        Ok(())
    }

    pub fn stats(&self) -> Result<ReflexStats, ReflexError> {
        let reflexes = self.reflexes.read().map_err(|_| ReflexError::LockError)?;
        let mut stats = ReflexStats {
            total: reflexes.len(),
            ..Default::default()
        };
        for compiled in reflexes.values() {
            if compiled.reflex.enabled {
                stats.enabled += 1;
            }
            match compiled.reflex.response {
                ReflexResponse::Block => stats.blocking += 1,
                ReflexResponse::Warn => stats.warning += 1,
                ReflexResponse::Log => stats.logging += 1,
            }
        }
        Ok(stats)
    }

    /// Evaluate an input against every enabled reflex, highest priority
    /// first. The first blocking match short-circuits; warn and log matches
    /// accumulate.
    pub fn evaluate(&self, input: &str) -> Result<ReflexVerdict, ReflexError> {
        let reflexes = self.reflexes.read().map_err(|_| ReflexError::LockError)?;
        let mut enabled: Vec<_> = reflexes
            .values()
            .filter(|compiled| compiled.reflex.enabled)
            .collect();
        enabled.sort_by(|a, b| b.reflex.priority.cmp(&a.reflex.priority));

        let mut warnings = Vec::new();
        let mut logged = Vec::new();
        for compiled in enabled {
            if !compiled.matches(input) {
                continue;
            }
            let reflex = &compiled.reflex;
            match reflex.response {
                ReflexResponse::Block => {
                    warn!(reflex = %reflex.name, "reflex blocked operation");
                    return Ok(ReflexVerdict::Blocked {
                        reflex_id: reflex.id.clone(),
                        name: reflex.name.clone(),
                        message: reflex.message.clone(),
                    });
                }
                ReflexResponse::Warn => warnings.push(ReflexMatch {
                    reflex_id: reflex.id.clone(),
                    name: reflex.name.clone(),
                    message: reflex.message.clone(),
                }),
                ReflexResponse::Log => logged.push(ReflexMatch {
                    reflex_id: reflex.id.clone(),
                    name: reflex.name.clone(),
                    message: reflex.message.clone(),
                }),
            }
        }
        Ok(ReflexVerdict::Allowed { warnings, logged })
    }
}

impl Default for ReflexRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Reflex registry errors.
#[derive(Debug, Error)]
pub enum ReflexError {
    #[error("reflex key already registered: {0}")]
    DuplicateKey(String),

    #[error("reflex not found: {0}")]
    NotFound(String),

    #[error("invalid pattern in reflex `{0}`: {1}")]
    InvalidPattern(String, String),

    #[error("lock error")]
    LockError,
}
