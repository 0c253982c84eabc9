//! Arbor Crypto - identity keys and the canonical capability signer
//!
//! Agent ids are content-derived: `agent_id = blake3(ed25519 public key)`.
//! Capabilities are signed over a canonical payload recomputed from their
//! current field values, so any post-issuance mutation is tamper-evident.

#![deny(unsafe_code)]

use thiserror::Error;

mod keys;
mod request;
mod signer;

pub use keys::{derive_agent_id, Keypair, SecretKeyBytes};
pub use request::{sign_request, verify_request, SignedRequest};
pub use signer::{
    canonical_payload, delegation_payload, sign_capability, sign_delegation, verify_capability,
    verify_delegation_chain,
};

/// Crypto-layer errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("capability signature is missing, malformed, or does not verify")]
    InvalidCapabilitySignature,

    #[error("delegation chain is broken: {0}")]
    BrokenDelegationChain(String),

    #[error("signed request envelope does not verify")]
    InvalidSignedRequest,

    #[error("invalid hex encoding: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("canonical serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
