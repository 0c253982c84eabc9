//! Signed request envelopes.
//!
//! When the kernel is configured to require them, callers prove possession
//! of the principal's key per request, on top of holding a capability.

use arbor_types::AgentId;
use ed25519_dalek::Verifier;
use serde::{Deserialize, Serialize};

use crate::keys::{parse_verifying_key, Keypair};
use crate::CryptoError;

/// A per-request proof of key possession.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignedRequest {
    pub principal_id: AgentId,
    pub resource_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Caller-chosen nonce; replay protection belongs to the transport.
    pub nonce: String,
    /// Hex Ed25519 signature over the envelope payload.
    pub signature: String,
}

fn envelope_payload(
    principal_id: &AgentId,
    resource_uri: &str,
    action: Option<&str>,
    nonce: &str,
) -> Result<Vec<u8>, CryptoError> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&serde_json::to_vec(principal_id)?);
    hasher.update(&serde_json::to_vec(resource_uri)?);
    hasher.update(&serde_json::to_vec(&action)?);
    hasher.update(&serde_json::to_vec(nonce)?);
    Ok(hasher.finalize().as_bytes().to_vec())
}

/// Build a signed request envelope for `(resource, action)` under the
/// caller's key.
pub fn sign_request(
    keypair: &Keypair,
    resource_uri: &str,
    action: Option<&str>,
    nonce: impl Into<String>,
) -> Result<SignedRequest, CryptoError> {
    let principal_id = keypair.agent_id();
    let nonce = nonce.into();
    let payload = envelope_payload(&principal_id, resource_uri, action, &nonce)?;
    let signature = keypair.sign(&payload);
    Ok(SignedRequest {
        principal_id,
        resource_uri: resource_uri.to_string(),
        action: action.map(str::to_string),
        nonce,
        signature: hex::encode(signature.to_bytes()),
    })
}

/// Verify a signed request against the principal's registered public key.
pub fn verify_request(request: &SignedRequest, public_key_hex: &str) -> Result<(), CryptoError> {
    let verifying_key =
        parse_verifying_key(public_key_hex).map_err(|_| CryptoError::InvalidSignedRequest)?;
    let sig_bytes =
        hex::decode(&request.signature).map_err(|_| CryptoError::InvalidSignedRequest)?;
    let sig_array: [u8; 64] = sig_bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidSignedRequest)?;
    let signature = ed25519_dalek::Signature::from_bytes(&sig_array);

    let payload = envelope_payload(
        &request.principal_id,
        &request.resource_uri,
        request.action.as_deref(),
        &request.nonce,
    )?;
    verifying_key
        .verify(&payload, &signature)
        .map_err(|_| CryptoError::InvalidSignedRequest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_request() {
        let kp = Keypair::generate();
        let req = sign_request(&kp, "arbor://fs/read/x", Some("read"), "n-1").unwrap();
        verify_request(&req, &kp.public_key_hex()).unwrap();
    }

    #[test]
    fn tampered_resource_fails() {
        let kp = Keypair::generate();
        let mut req = sign_request(&kp, "arbor://fs/read/x", Some("read"), "n-1").unwrap();
        req.resource_uri = "arbor://fs/write/x".to_string();
        assert!(matches!(
            verify_request(&req, &kp.public_key_hex()),
            Err(CryptoError::InvalidSignedRequest)
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let kp = Keypair::generate();
        let other = Keypair::generate();
        let req = sign_request(&kp, "arbor://fs/read/x", None, "n-2").unwrap();
        assert!(verify_request(&req, &other.public_key_hex()).is_err());
    }
}
