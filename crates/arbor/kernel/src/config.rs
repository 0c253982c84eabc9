//! Kernel configuration and per-call options.

use arbor_types::ConstraintMap;
use chrono::{DateTime, Duration, Utc};

use arbor_crypto::SignedRequest;

/// Explicit kernel configuration, passed at construction. No ambient
/// globals: two kernels in one process can run different policies.
#[derive(Clone, Debug)]
pub struct KernelConfig {
    /// Check the principal's identity status before anything else.
    pub verify_identity: bool,
    /// Evaluate the matched capability's constraint map.
    pub enforce_constraints: bool,
    /// Demand a per-request signature proving key possession.
    pub require_signed_requests: bool,
    /// Consult the trust monitor collaborator before deciding.
    pub trust_checks: bool,
    /// Applied to grants that specify no expiry of their own.
    pub default_grant_ttl: Option<Duration>,
    /// Delegation depth given to fresh grants unless overridden.
    pub max_delegation_depth: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            verify_identity: true,
            enforce_constraints: true,
            require_signed_requests: false,
            trust_checks: false,
            default_grant_ttl: None,
            max_delegation_depth: 5,
        }
    }
}

/// Per-call options for [`authorize`](crate::AuthorizationKernel::authorize).
#[derive(Clone, Debug, Default)]
pub struct AuthorizeOptions {
    /// Proof of key possession. Verified whenever present; mandatory when
    /// the kernel requires signed requests.
    pub signed_request: Option<SignedRequest>,
}

/// Options for [`grant`](crate::AuthorizationKernel::grant).
#[derive(Clone, Debug, Default)]
pub struct GrantOptions {
    pub constraints: ConstraintMap,
    /// Falls back to `issued_at + default_grant_ttl` when unset.
    pub expires_at: Option<DateTime<Utc>>,
    /// Falls back to the configured maximum when unset.
    pub delegation_depth: Option<u32>,
}

/// Options for [`delegate`](crate::AuthorizationKernel::delegate).
#[derive(Clone, Debug, Default)]
pub struct DelegateOptions {
    /// Narrowed constraint map for the child. Unset inherits the parent's
    /// constraints unchanged; set, it may only tighten them.
    pub constraints: Option<ConstraintMap>,
    /// Clamped to the parent's expiry; a child never outlives its parent.
    pub expires_at: Option<DateTime<Utc>>,
}
