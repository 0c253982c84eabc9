//! Arbor Kernel - the authorization decision point
//!
//! One entry point answers every permission question: does this principal,
//! right now, hold a live, signed, constraint-satisfying capability for
//! this resource? Identity lifecycle and capability issuance live here too,
//! because revoking an identity must atomically invalidate its grants.
//!
//! ```
//! use arbor_kernel::{AuthorizationKernel, GrantOptions, AuthorizeOptions, KernelConfig};
//! use arbor_types::AuthDecision;
//!
//! let kernel = AuthorizationKernel::new(KernelConfig::default());
//! let (identity, _keys) = kernel.generate_identity(Some("scout".to_string()));
//! let agent = identity.agent_id.clone();
//! kernel.register_identity(identity).unwrap();
//!
//! kernel
//!     .grant(&agent, "arbor://fs/read/project", GrantOptions::default())
//!     .unwrap();
//! let decision = kernel
//!     .authorize(&agent, "arbor://fs/read/project/src", None, AuthorizeOptions::default())
//!     .unwrap();
//! assert!(matches!(decision, AuthDecision::Authorized { .. }));
//! ```

#![deny(unsafe_code)]

use arbor_types::{AgentId, CapabilityId, UriError};
use thiserror::Error;

mod config;
mod hooks;
mod kernel;

pub use config::{AuthorizeOptions, DelegateOptions, GrantOptions, KernelConfig};
pub use hooks::{EscalationHook, EventSink, MemorySink, NullSink, TrustMonitor};
pub use kernel::AuthorizationKernel;

/// Kernel-level authorization errors. Denials are typed, never panics:
/// the caller always learns which gate refused.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no capability authorizes this request")]
    Unauthorized,

    #[error("capability expired: {0}")]
    CapabilityExpired(CapabilityId),

    #[error("identity suspended: {0}")]
    IdentitySuspended(AgentId),

    #[error("identity revoked: {0}")]
    IdentityRevoked(AgentId),

    #[error("trust frozen for {0}")]
    TrustFrozen(AgentId),

    #[error("signed request is missing or does not verify")]
    InvalidSignedRequest,

    #[error("delegation depth exhausted for {0}")]
    DelegationDepthExhausted(CapabilityId),

    #[error("delegation widens constraints: {0}")]
    ConstraintWidening(String),

    #[error("invalid resource uri: {0}")]
    InvalidResource(#[from] UriError),

    #[error(transparent)]
    Identity(#[from] arbor_identity::IdentityError),

    #[error(transparent)]
    Capability(#[from] arbor_capability::CapabilityError),

    #[error(transparent)]
    Constraint(#[from] arbor_constraint::ConstraintError),

    #[error(transparent)]
    Crypto(#[from] arbor_crypto::CryptoError),
}
