//! Agent keypairs and agent-id derivation.

use arbor_types::{AgentId, Identity, IdentityStatus};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::CryptoError;

/// Exportable secret key material. Zeroized on drop; never leaves the
/// client that generated it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKeyBytes(pub [u8; 32]);

/// An agent's Ed25519 keypair. The registry only ever sees the public half.
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a fresh keypair from the OS entropy source.
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        let signing_key = SigningKey::from_bytes(&secret);
        secret.zeroize();
        Self { signing_key }
    }

    pub fn from_secret_bytes(secret: &SecretKeyBytes) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&secret.0),
        }
    }

    pub fn to_secret_bytes(&self) -> SecretKeyBytes {
        SecretKeyBytes(self.signing_key.to_bytes())
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Hex-encoded Ed25519 verifying key.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key().as_bytes())
    }

    /// Hex-encoded X25519 public key (Montgomery form of the verifying key)
    /// for encrypted channels.
    pub fn encryption_public_key_hex(&self) -> String {
        hex::encode(self.verifying_key().to_montgomery().as_bytes())
    }

    /// `blake3(public key)` as lowercase hex.
    pub fn agent_id(&self) -> AgentId {
        agent_id_from_key_bytes(self.verifying_key().as_bytes())
    }

    /// Build the registrable identity record for this keypair.
    pub fn identity(&self, name: Option<String>) -> Identity {
        Identity {
            agent_id: self.agent_id(),
            public_key: self.public_key_hex(),
            encryption_public_key: self.encryption_public_key_hex(),
            name,
            status: IdentityStatus::Active,
        }
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

/// Derive the agent id for a hex-encoded public key.
pub fn derive_agent_id(public_key_hex: &str) -> Result<AgentId, CryptoError> {
    let bytes = hex::decode(public_key_hex)?;
    let key_bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("public key must be 32 bytes".to_string()))?;
    // Parse to reject off-curve material, not just wrong lengths.
    VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    Ok(agent_id_from_key_bytes(&key_bytes))
}

pub(crate) fn parse_verifying_key(public_key_hex: &str) -> Result<VerifyingKey, CryptoError> {
    let bytes = hex::decode(public_key_hex)?;
    let key_bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("public key must be 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&key_bytes).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

fn agent_id_from_key_bytes(key_bytes: &[u8]) -> AgentId {
    AgentId::new(hex::encode(blake3::hash(key_bytes).as_bytes()))
}
