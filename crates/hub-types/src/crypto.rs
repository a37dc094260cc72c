//! Hash derivations and signature verification (spec §3 invariants, §4.2).
//!
//! Cryptographic primitives are pure functions here: no KV access, no
//! clocks. The validator and engine call into this module but own all
//! policy (which scheme is acceptable for which message family, clock-skew
//! bounds, etc).

use crate::canonical::canonical_bytes;
use crate::error::{HubError, Result};
use crate::types::{Hash20, MessageData};
use ed25519_dalek::{Signature as Ed25519Signature, Verifier, VerifyingKey};
use k256::ecdsa::{RecoveryId, Signature as K256Signature, VerifyingKey as K256VerifyingKey};
use sha3::{Digest, Keccak256};

/// Truncate a BLAKE3 digest to 20 bytes. Used for `MessageHash` and for
/// `SignerKey`/descriptor-style identifiers throughout the engine.
pub fn blake3_20(bytes: &[u8]) -> Hash20 {
    let full = blake3::hash(bytes);
    let mut out = [0u8; 20];
    out.copy_from_slice(&full.as_bytes()[0..20]);
    out
}

/// Recompute `MessageHash = blake3_20(canonical(MessageData))` (spec §3).
pub fn compute_message_hash(data: &MessageData) -> Result<Hash20> {
    let bytes = canonical_bytes(data)?;
    Ok(blake3_20(&bytes))
}

/// Verify an ed25519 signature over an arbitrary byte string (normally the
/// message hash itself, per spec §4.2 check 4).
pub fn verify_ed25519(public_key: &[u8; 32], message: &[u8], signature: &[u8]) -> Result<()> {
    let verifying_key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| HubError::validation_failure(format!("invalid ed25519 key: {e}")))?;
    let sig_bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| HubError::validation_failure("ed25519 signature must be 64 bytes"))?;
    let signature = Ed25519Signature::from_bytes(&sig_bytes);
    verifying_key
        .verify(message, &signature)
        .map_err(|_| HubError::validation_failure("ed25519 signature verification failed"))
}

/// keccak256, used for EIP-712 struct and domain hashing.
pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// The EIP-712 "\x19\x01" prefixed digest over a domain separator and a
/// struct hash. Callers build `domain_separator` and `struct_hash`
/// themselves (the concrete typed-data shapes are owned by the message
/// bodies that need them — `IdRegister`/`Signer` event submission and
/// username-proof claims).
pub fn eip712_digest(domain_separator: &[u8; 32], struct_hash: &[u8; 32]) -> [u8; 32] {
    let mut preimage = Vec::with_capacity(2 + 32 + 32);
    preimage.extend_from_slice(&[0x19, 0x01]);
    preimage.extend_from_slice(domain_separator);
    preimage.extend_from_slice(struct_hash);
    keccak256(&preimage)
}

/// Recover the signing Ethereum address from an EIP-712 digest and a
/// 65-byte `(r, s, v)` signature, then verify it equals `expected`.
pub fn verify_eip712(digest: &[u8; 32], signature: &[u8], expected: &Hash20) -> Result<()> {
    let recovered = recover_eip712_signer(digest, signature)?;
    if &recovered != expected {
        return Err(HubError::validation_failure(
            "eip712 signature recovers to an unexpected address",
        ));
    }
    Ok(())
}

/// Recover the 20-byte Ethereum address that produced an EIP-712 signature
/// over `digest`.
pub fn recover_eip712_signer(digest: &[u8; 32], signature: &[u8]) -> Result<Hash20> {
    if signature.len() != 65 {
        return Err(HubError::validation_failure(
            "eip712 signature must be 65 bytes (r || s || v)",
        ));
    }
    let (rs, v) = signature.split_at(64);
    let recovery_id = RecoveryId::from_byte(normalize_recovery_byte(v[0]))
        .ok_or_else(|| HubError::validation_failure("invalid recovery byte"))?;
    let sig = K256Signature::from_slice(rs)
        .map_err(|e| HubError::validation_failure(format!("invalid ecdsa signature: {e}")))?;

    let verifying_key = K256VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
        .map_err(|e| HubError::validation_failure(format!("signature recovery failed: {e}")))?;

    Ok(eth_address_from_verifying_key(&verifying_key))
}

fn normalize_recovery_byte(v: u8) -> u8 {
    if v >= 27 {
        v - 27
    } else {
        v
    }
}

fn eth_address_from_verifying_key(key: &K256VerifyingKey) -> Hash20 {
    let encoded = key.to_encoded_point(false);
    let hash = keccak256(&encoded.as_bytes()[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..32]);
    out
}

/// Ed25519 keypair, used by the `identity create` CLI command and tests to
/// produce signers without a wallet integration.
pub struct Ed25519KeyPair {
    signing_key: ed25519_dalek::SigningKey,
}

impl Ed25519KeyPair {
    pub fn generate() -> Self {
        use rand::rngs::OsRng;
        Self {
            signing_key: ed25519_dalek::SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: ed25519_dalek::SigningKey::from_bytes(seed),
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        use ed25519_dalek::Signer;
        self.signing_key.sign(message).to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;

    #[test]
    fn message_hash_is_deterministic() {
        let data = MessageData {
            fid: Fid(1),
            network: FarcasterNetwork::Mainnet,
            timestamp: 100,
            body: MessageBody::CastRemove(CastRemoveBody {
                target_hash: [9u8; 20],
            }),
        };
        let h1 = compute_message_hash(&data).unwrap();
        let h2 = compute_message_hash(&data).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn ed25519_roundtrip() {
        let kp = Ed25519KeyPair::generate();
        let msg = b"hello hub";
        let sig = kp.sign(msg);
        assert!(verify_ed25519(&kp.public_key(), msg, &sig).is_ok());
    }

    #[test]
    fn ed25519_rejects_tampered_message() {
        let kp = Ed25519KeyPair::generate();
        let sig = kp.sign(b"hello hub");
        assert!(verify_ed25519(&kp.public_key(), b"goodbye hub", &sig).is_err());
    }

    #[test]
    fn eip712_recovery_roundtrip() {
        // Deterministic secp256k1 key for the test.
        let sk = k256::ecdsa::SigningKey::from_bytes(&[7u8; 32].into()).unwrap();
        let vk = K256VerifyingKey::from(&sk);
        let expected = eth_address_from_verifying_key(&vk);

        let digest = keccak256(b"eip712 test payload");
        let (sig, recid) = sk.sign_prehash_recoverable(&digest).unwrap();
        let mut bytes = sig.to_bytes().to_vec();
        bytes.push(recid.to_byte());

        let recovered = recover_eip712_signer(&digest, &bytes).unwrap();
        assert_eq!(recovered, expected);
        assert!(verify_eip712(&digest, &bytes, &expected).is_ok());
    }
}
