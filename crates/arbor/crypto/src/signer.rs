//! Canonical capability signing and delegation-chain verification.
//!
//! The canonical payload is `blake3(json(field) || ...)` over every semantic
//! field in fixed declaration order, excluding the signature itself.
//! Constraint maps are `BTreeMap`s, so their JSON is order-stable and the
//! payload is identical across processes for equal logical content.

use arbor_types::{AgentId, Capability, CapabilityId, ConstraintMap, DelegationRecord};
use ed25519_dalek::{Signature, Verifier};

use crate::keys::{parse_verifying_key, Keypair};
use crate::CryptoError;

/// Compute the canonical signable payload of a capability: the BLAKE3
/// digest over its semantic fields, current values, signature excluded.
pub fn canonical_payload(capability: &Capability) -> Result<Vec<u8>, CryptoError> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&serde_json::to_vec(&capability.id)?);
    hasher.update(&serde_json::to_vec(&capability.resource_uri)?);
    hasher.update(&serde_json::to_vec(&capability.principal_id)?);
    hasher.update(&serde_json::to_vec(&capability.issuer_id)?);
    hasher.update(&serde_json::to_vec(&capability.constraints)?);
    hasher.update(&serde_json::to_vec(&capability.issued_at)?);
    hasher.update(&serde_json::to_vec(&capability.expires_at)?);
    hasher.update(&serde_json::to_vec(&capability.delegation_depth)?);
    hasher.update(&serde_json::to_vec(&capability.delegation_chain)?);
    Ok(hasher.finalize().as_bytes().to_vec())
}

/// Sign the canonical payload and attach the signature as
/// `issuer_signature`.
pub fn sign_capability(
    mut capability: Capability,
    issuer: &Keypair,
) -> Result<Capability, CryptoError> {
    let payload = canonical_payload(&capability)?;
    let signature = issuer.sign(&payload);
    capability.issuer_signature = Some(hex::encode(signature.to_bytes()));
    Ok(capability)
}

/// Verify `issuer_signature` against the capability's *current* field
/// values. Any field mutation, wrong key, or missing signature fails —
/// there is no partial-trust mode.
pub fn verify_capability(
    capability: &Capability,
    issuer_public_key_hex: &str,
) -> Result<(), CryptoError> {
    let sig_hex = capability
        .issuer_signature
        .as_ref()
        .ok_or(CryptoError::InvalidCapabilitySignature)?;
    let signature = parse_signature(sig_hex)?;
    let verifying_key = parse_verifying_key(issuer_public_key_hex)
        .map_err(|_| CryptoError::InvalidCapabilitySignature)?;

    let payload = canonical_payload(capability)?;
    verifying_key
        .verify(&payload, &signature)
        .map_err(|_| CryptoError::InvalidCapabilitySignature)
}

/// The signable payload of one delegation hop:
/// `blake3(json(parent id) || json(child id) || json(child constraints))`.
pub fn delegation_payload(
    parent_id: &CapabilityId,
    child_id: &CapabilityId,
    constraints: &ConstraintMap,
) -> Result<Vec<u8>, CryptoError> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&serde_json::to_vec(parent_id)?);
    hasher.update(&serde_json::to_vec(child_id)?);
    hasher.update(&serde_json::to_vec(constraints)?);
    Ok(hasher.finalize().as_bytes().to_vec())
}

/// Sign one delegation hop under the delegator's own key. Independent of
/// the authority signature the resulting capability will carry.
pub fn sign_delegation(
    parent: &Capability,
    child: &Capability,
    delegator: &Keypair,
) -> Result<DelegationRecord, CryptoError> {
    let payload = delegation_payload(&parent.id, &child.id, &child.constraints)?;
    let signature = delegator.sign(&payload);
    Ok(DelegationRecord {
        delegator_id: delegator.agent_id(),
        parent_capability_id: parent.id.clone(),
        child_capability_id: child.id.clone(),
        constraints: child.constraints.clone(),
        delegator_signature: hex::encode(signature.to_bytes()),
    })
}

/// Verify every hop of a delegation chain.
///
/// `lookup` resolves a delegator id to its *current* public key (hex); a
/// registry-backed lookup returns `None` for suspended or revoked
/// identities, which breaks the chain. An empty chain trivially passes.
/// There is no partial credit: one unresolved delegator or bad signature
/// fails the whole chain.
pub fn verify_delegation_chain<F>(capability: &Capability, lookup: F) -> Result<(), CryptoError>
where
    F: Fn(&AgentId) -> Option<String>,
{
    let chain = &capability.delegation_chain;
    if chain.is_empty() {
        return Ok(());
    }

    // Contiguity: hop N's parent is hop N-1's child, and the final hop
    // produced this capability.
    for window in chain.windows(2) {
        if window[1].parent_capability_id != window[0].child_capability_id {
            return Err(CryptoError::BrokenDelegationChain(format!(
                "hop for {} does not continue from {}",
                window[1].child_capability_id, window[0].child_capability_id
            )));
        }
    }
    let last = chain.last().filter(|record| record.child_capability_id == capability.id);
    if last.is_none() {
        return Err(CryptoError::BrokenDelegationChain(format!(
            "final hop does not produce capability {}",
            capability.id
        )));
    }

    for record in chain {
        let public_key_hex = lookup(&record.delegator_id).ok_or_else(|| {
            CryptoError::BrokenDelegationChain(format!(
                "delegator {} is not resolvable",
                record.delegator_id
            ))
        })?;
        let verifying_key = parse_verifying_key(&public_key_hex).map_err(|_| {
            CryptoError::BrokenDelegationChain(format!(
                "delegator {} has unusable key material",
                record.delegator_id
            ))
        })?;
        let signature = parse_signature(&record.delegator_signature).map_err(|_| {
            CryptoError::BrokenDelegationChain(format!(
                "hop for {} carries a malformed signature",
                record.child_capability_id
            ))
        })?;
        let payload = delegation_payload(
            &record.parent_capability_id,
            &record.child_capability_id,
            &record.constraints,
        )?;
        verifying_key.verify(&payload, &signature).map_err(|_| {
            CryptoError::BrokenDelegationChain(format!(
                "signature by {} does not verify",
                record.delegator_id
            ))
        })?;
    }

    Ok(())
}

fn parse_signature(sig_hex: &str) -> Result<Signature, CryptoError> {
    let bytes = hex::decode(sig_hex).map_err(|_| CryptoError::InvalidCapabilitySignature)?;
    let sig_bytes: [u8; 64] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidCapabilitySignature)?;
    Ok(Signature::from_bytes(&sig_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_types::{AgentId, CapabilityId};
    use chrono::Utc;
    use proptest::prelude::*;

    fn capability(principal: &AgentId, issuer: &AgentId) -> Capability {
        let mut constraints = ConstraintMap::new();
        constraints.insert("rate_limit".to_string(), serde_json::json!(10));
        Capability {
            id: CapabilityId::generate(),
            resource_uri: "arbor://fs/read/project/src".to_string(),
            principal_id: principal.clone(),
            issuer_id: issuer.clone(),
            constraints,
            issued_at: Utc::now(),
            expires_at: None,
            delegation_depth: 3,
            delegation_chain: vec![],
            issuer_signature: None,
        }
    }

    #[test]
    fn sign_then_verify_succeeds() {
        let issuer = Keypair::generate();
        let principal = Keypair::generate();
        let cap = capability(&principal.agent_id(), &issuer.agent_id());
        let signed = sign_capability(cap, &issuer).unwrap();
        verify_capability(&signed, &issuer.public_key_hex()).unwrap();
    }

    #[test]
    fn wrong_key_fails_verification() {
        let issuer = Keypair::generate();
        let other = Keypair::generate();
        let signed =
            sign_capability(capability(&other.agent_id(), &issuer.agent_id()), &issuer).unwrap();
        assert!(matches!(
            verify_capability(&signed, &other.public_key_hex()),
            Err(CryptoError::InvalidCapabilitySignature)
        ));
    }

    #[test]
    fn missing_signature_fails_verification() {
        let issuer = Keypair::generate();
        let cap = capability(&Keypair::generate().agent_id(), &issuer.agent_id());
        assert!(matches!(
            verify_capability(&cap, &issuer.public_key_hex()),
            Err(CryptoError::InvalidCapabilitySignature)
        ));
    }

    #[test]
    fn field_mutation_fails_verification() {
        let issuer = Keypair::generate();
        let principal = Keypair::generate();
        let signed =
            sign_capability(capability(&principal.agent_id(), &issuer.agent_id()), &issuer)
                .unwrap();

        let mut widened = signed.clone();
        widened.resource_uri = "arbor://fs/write/project".to_string();
        assert!(verify_capability(&widened, &issuer.public_key_hex()).is_err());

        let mut extended = signed.clone();
        extended.expires_at = Some(Utc::now() + chrono::Duration::days(365));
        assert!(verify_capability(&extended, &issuer.public_key_hex()).is_err());

        let mut loosened = signed;
        loosened.constraints.remove("rate_limit");
        assert!(verify_capability(&loosened, &issuer.public_key_hex()).is_err());
    }

    #[test]
    fn canonical_payload_is_stable_for_equal_content() {
        let issuer = Keypair::generate();
        let cap = capability(&Keypair::generate().agent_id(), &issuer.agent_id());
        let clone = cap.clone();
        assert_eq!(
            canonical_payload(&cap).unwrap(),
            canonical_payload(&clone).unwrap()
        );
    }

    #[test]
    fn signature_field_is_not_part_of_payload() {
        let issuer = Keypair::generate();
        let cap = capability(&Keypair::generate().agent_id(), &issuer.agent_id());
        let unsigned_payload = canonical_payload(&cap).unwrap();
        let signed = sign_capability(cap, &issuer).unwrap();
        assert_eq!(canonical_payload(&signed).unwrap(), unsigned_payload);
    }

    fn delegated_pair(
        issuer: &Keypair,
        delegator: &Keypair,
        delegate_to: &AgentId,
    ) -> (Capability, Capability) {
        let parent = sign_capability(
            capability(&delegator.agent_id(), &issuer.agent_id()),
            issuer,
        )
        .unwrap();
        let mut child = capability(delegate_to, &issuer.agent_id());
        child.delegation_depth = parent.delegation_depth - 1;
        (parent, child)
    }

    #[test]
    fn empty_chain_trivially_passes() {
        let issuer = Keypair::generate();
        let cap = capability(&Keypair::generate().agent_id(), &issuer.agent_id());
        verify_delegation_chain(&cap, |_| None).unwrap();
    }

    #[test]
    fn single_hop_chain_verifies() {
        let issuer = Keypair::generate();
        let delegator = Keypair::generate();
        let grantee = Keypair::generate();
        let (parent, mut child) = delegated_pair(&issuer, &delegator, &grantee.agent_id());

        let record = sign_delegation(&parent, &child, &delegator).unwrap();
        child.delegation_chain.push(record);

        let delegator_key = delegator.public_key_hex();
        let delegator_id = delegator.agent_id();
        verify_delegation_chain(&child, |id| {
            (id == &delegator_id).then(|| delegator_key.clone())
        })
        .unwrap();
    }

    #[test]
    fn unresolvable_delegator_breaks_chain() {
        let issuer = Keypair::generate();
        let delegator = Keypair::generate();
        let grantee = Keypair::generate();
        let (parent, mut child) = delegated_pair(&issuer, &delegator, &grantee.agent_id());
        child.delegation_chain.push(sign_delegation(&parent, &child, &delegator).unwrap());

        assert!(matches!(
            verify_delegation_chain(&child, |_| None),
            Err(CryptoError::BrokenDelegationChain(_))
        ));
    }

    #[test]
    fn forged_hop_breaks_chain() {
        let issuer = Keypair::generate();
        let delegator = Keypair::generate();
        let imposter = Keypair::generate();
        let grantee = Keypair::generate();
        let (parent, mut child) = delegated_pair(&issuer, &delegator, &grantee.agent_id());

        // Signed by the imposter but claiming the delegator's identity.
        let mut record = sign_delegation(&parent, &child, &imposter).unwrap();
        record.delegator_id = delegator.agent_id();
        child.delegation_chain.push(record);

        let delegator_key = delegator.public_key_hex();
        let result = verify_delegation_chain(&child, |_| Some(delegator_key.clone()));
        assert!(matches!(result, Err(CryptoError::BrokenDelegationChain(_))));
    }

    #[test]
    fn chain_must_end_at_the_capability() {
        let issuer = Keypair::generate();
        let delegator = Keypair::generate();
        let grantee = Keypair::generate();
        let (parent, mut child) = delegated_pair(&issuer, &delegator, &grantee.agent_id());
        let mut record = sign_delegation(&parent, &child, &delegator).unwrap();
        record.child_capability_id = CapabilityId::generate();
        child.delegation_chain.push(record);

        let delegator_key = delegator.public_key_hex();
        assert!(verify_delegation_chain(&child, |_| Some(delegator_key.clone())).is_err());
    }

    proptest! {
        #[test]
        fn any_uri_mutation_invalidates_signature(suffix in "[a-z]{1,12}") {
            let issuer = Keypair::generate();
            let principal = Keypair::generate();
            let signed = sign_capability(
                capability(&principal.agent_id(), &issuer.agent_id()),
                &issuer,
            ).unwrap();

            let mut mutated = signed.clone();
            mutated.resource_uri = format!("{}/{}", mutated.resource_uri, suffix);
            prop_assert!(verify_capability(&mutated, &issuer.public_key_hex()).is_err());
        }

        #[test]
        fn depth_mutation_invalidates_signature(depth in 0u32..100) {
            let issuer = Keypair::generate();
            let principal = Keypair::generate();
            let signed = sign_capability(
                capability(&principal.agent_id(), &issuer.agent_id()),
                &issuer,
            ).unwrap();

            prop_assume!(depth != signed.delegation_depth);
            let mut mutated = signed.clone();
            mutated.delegation_depth = depth;
            prop_assert!(verify_capability(&mutated, &issuer.public_key_hex()).is_err());
        }
    }
}
