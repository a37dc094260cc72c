//! Pure message validation (spec §4.2).
//!
//! Every check here is a function of the message and the caller-supplied
//! network/clock inputs: no KV access, no locks. This lets the engine
//! offload validation to a worker pool and rejoin results by job id
//! ([`crate::engine`]) without any shared mutable state.

use hub_types::{
    crypto, FarcasterNetwork, HashScheme, HubError, Message, MessageBody, MessageTarget,
    MessageType, Result, SignatureScheme, SignerKey, VerificationProtocol,
};

/// Messages may not be timestamped more than this many seconds in the
/// future relative to the validating Hub's clock.
pub const CLOCK_SKEW_BOUND_SECONDS: u32 = 10 * 60;

const MAX_CAST_TEXT_BYTES: usize = 320;
const MAX_CAST_EMBEDS: usize = 2;
const MAX_URL_BYTES: usize = 256;
const MAX_LINK_TYPE_BYTES: usize = 8;

/// Validate a decoded message against the Hub's configured network and
/// current clock. `now_farcaster_seconds` is seconds since
/// [`hub_types::FARCASTER_EPOCH_UNIX_SECONDS`], supplied by the caller so
/// this function stays a pure check.
pub fn validate_message(
    message: &Message,
    network: FarcasterNetwork,
    now_farcaster_seconds: u32,
) -> Result<()> {
    check_network(message, network)?;
    check_hash(message)?;
    check_signature_scheme(message)?;
    check_signature(message)?;
    check_body(message)?;
    check_timestamp(message, now_farcaster_seconds)?;
    Ok(())
}

fn check_network(message: &Message, network: FarcasterNetwork) -> Result<()> {
    if message.data.network != network {
        return Err(HubError::validation_failure(format!(
            "message network {:?} does not match hub network {:?}",
            message.data.network, network
        )));
    }
    Ok(())
}

fn check_hash(message: &Message) -> Result<()> {
    if message.hash_scheme != HashScheme::Blake3 {
        return Err(HubError::validation_failure("unsupported hash scheme"));
    }
    let recomputed = crypto::compute_message_hash(&message.data)?;
    if recomputed != message.hash {
        return Err(HubError::validation_failure(
            "message hash does not match canonical encoding",
        ));
    }
    Ok(())
}

/// Every message family in this store is Ed25519-signed by a delegated
/// signer key; there is no message-level EIP-712 family left once the
/// signer-as-message design (§9 "cyclic signer graphs") is retired in
/// favor of on-chain Signer events.
fn check_signature_scheme(message: &Message) -> Result<()> {
    match (message.signature_scheme, &message.signer) {
        (SignatureScheme::Ed25519, SignerKey::Ed25519(_)) => Ok(()),
        _ => Err(HubError::validation_failure(
            "message family requires an Ed25519 signature from a delegated signer key",
        )),
    }
}

fn check_signature(message: &Message) -> Result<()> {
    let SignerKey::Ed25519(public_key) = message.signer else {
        return Err(HubError::validation_failure("expected ed25519 signer key"));
    };
    crypto::verify_ed25519(&public_key, &message.hash, &message.signature)
}

fn check_timestamp(message: &Message, now_farcaster_seconds: u32) -> Result<()> {
    if message
        .data
        .timestamp
        .saturating_sub(now_farcaster_seconds)
        > CLOCK_SKEW_BOUND_SECONDS
    {
        return Err(HubError::validation_failure(
            "message timestamp is too far in the future",
        ));
    }
    Ok(())
}

fn check_target(target: &MessageTarget) -> Result<()> {
    match target {
        MessageTarget::Cast { fid, .. } => {
            if fid.0 == 0 {
                return Err(HubError::validation_failure("target fid must be nonzero"));
            }
        }
        MessageTarget::Url(url) => {
            if url.len() > MAX_URL_BYTES {
                return Err(HubError::validation_failure("target url too long"));
            }
        }
    }
    Ok(())
}

fn check_body(message: &Message) -> Result<()> {
    match &message.data.body {
        MessageBody::CastAdd(body) => {
            if body.text.len() > MAX_CAST_TEXT_BYTES {
                return Err(HubError::validation_failure("cast text too long"));
            }
            if body.mentions.len() != body.mentions_positions.len() {
                return Err(HubError::validation_failure(
                    "mentions and mentions_positions length mismatch",
                ));
            }
            if body.embeds.len() > MAX_CAST_EMBEDS {
                return Err(HubError::validation_failure("too many embeds"));
            }
            if let Some(parent) = &body.parent {
                check_target(parent)?;
            }
            Ok(())
        }
        MessageBody::CastRemove(_) => Ok(()),
        MessageBody::ReactionAdd(body) | MessageBody::ReactionRemove(body) => {
            check_target(&body.target)
        }
        MessageBody::LinkAdd(body) | MessageBody::LinkRemove(body) => check_link_type(body),
        MessageBody::LinkCompactState(body) => {
            if body.link_type.len() > MAX_LINK_TYPE_BYTES || !body.link_type.is_ascii() {
                return Err(HubError::validation_failure("link type must be ascii <=8 bytes"));
            }
            if body.target_fids.iter().any(|fid| fid.0 == 0) {
                return Err(HubError::validation_failure("target fid must be nonzero"));
            }
            Ok(())
        }
        MessageBody::VerificationAdd(body) => {
            match body.protocol {
                VerificationProtocol::Ethereum => {
                    if body.claim_signature.len() != 65 {
                        return Err(HubError::validation_failure(
                            "ethereum verification claim signature must be 65 bytes",
                        ));
                    }
                }
                VerificationProtocol::Solana => {
                    if body.claim_signature.len() != 64 {
                        return Err(HubError::validation_failure(
                            "solana verification claim signature must be 64 bytes",
                        ));
                    }
                }
            }
            Ok(())
        }
        MessageBody::VerificationRemove(_) => Ok(()),
        MessageBody::UserDataAdd(body) => {
            let limit = user_data_value_limit(body.data_type);
            if body.value.len() > limit {
                return Err(HubError::validation_failure("user data value too long"));
            }
            Ok(())
        }
        MessageBody::UsernameProof(body) => {
            if body.name.is_empty() || body.name.len() > 20 {
                return Err(HubError::validation_failure(
                    "username proof name must be 1-20 bytes",
                ));
            }
            if body.fid.0 == 0 {
                return Err(HubError::validation_failure("username proof fid must be nonzero"));
            }
            Ok(())
        }
    }
}

fn check_link_type(body: &hub_types::LinkBody) -> Result<()> {
    if body.link_type.is_empty()
        || body.link_type.len() > MAX_LINK_TYPE_BYTES
        || !body.link_type.is_ascii()
    {
        return Err(HubError::validation_failure("link type must be ascii 1-8 bytes"));
    }
    if body.target_fid.0 == 0 {
        return Err(HubError::validation_failure("target fid must be nonzero"));
    }
    Ok(())
}

fn user_data_value_limit(data_type: hub_types::UserDataType) -> usize {
    use hub_types::UserDataType::*;
    match data_type {
        Username => 16,
        Display => 32,
        Location => 32,
        Pfp | Url | Banner => 256,
        Bio => 256,
    }
}

/// Verify the EIP-712 proof embedded in a [`hub_types::UsernameProofBody`]
/// recovers to its declared `owner`. Kept separate from [`validate_message`]
/// because it needs an application-specific domain separator, which is an
/// engine-level configuration concern rather than a pure structural check.
pub fn verify_username_proof_signature(
    proof: &hub_types::UsernameProofBody,
    domain_separator: &[u8; 32],
) -> Result<()> {
    let struct_hash = crypto::keccak256(&hub_types::canonical_bytes(&(
        &proof.name,
        &proof.owner,
        proof.timestamp,
        proof.fid,
    ))?);
    let digest = crypto::eip712_digest(domain_separator, &struct_hash);
    crypto::verify_eip712(&digest, &proof.signature, &proof.owner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_types::*;

    fn sign(data: &MessageData, keypair: &crypto::Ed25519KeyPair) -> Message {
        let hash = crypto::compute_message_hash(data).unwrap();
        let signature = keypair.sign(&hash).to_vec();
        Message {
            data: data.clone(),
            hash,
            hash_scheme: HashScheme::Blake3,
            signer: SignerKey::Ed25519(keypair.public_key()),
            signature,
            signature_scheme: SignatureScheme::Ed25519,
        }
    }

    #[test]
    fn accepts_well_formed_cast_add() {
        let keypair = crypto::Ed25519KeyPair::generate();
        let data = MessageData {
            fid: Fid(1),
            network: FarcasterNetwork::Mainnet,
            timestamp: 100,
            body: MessageBody::CastAdd(CastAddBody {
                text: "gm".into(),
                mentions: vec![],
                mentions_positions: vec![],
                parent: None,
                embeds: vec![],
            }),
        };
        let message = sign(&data, &keypair);
        assert!(validate_message(&message, FarcasterNetwork::Mainnet, 200).is_ok());
    }

    #[test]
    fn rejects_wrong_network() {
        let keypair = crypto::Ed25519KeyPair::generate();
        let data = MessageData {
            fid: Fid(1),
            network: FarcasterNetwork::Testnet,
            timestamp: 100,
            body: MessageBody::CastRemove(CastRemoveBody { target_hash: [0u8; 20] }),
        };
        let message = sign(&data, &keypair);
        assert!(validate_message(&message, FarcasterNetwork::Mainnet, 200).is_err());
    }

    #[test]
    fn rejects_tampered_hash() {
        let keypair = crypto::Ed25519KeyPair::generate();
        let data = MessageData {
            fid: Fid(1),
            network: FarcasterNetwork::Mainnet,
            timestamp: 100,
            body: MessageBody::CastRemove(CastRemoveBody { target_hash: [0u8; 20] }),
        };
        let mut message = sign(&data, &keypair);
        message.hash[0] ^= 0xFF;
        assert!(validate_message(&message, FarcasterNetwork::Mainnet, 200).is_err());
    }

    #[test]
    fn rejects_future_timestamp_beyond_skew() {
        let keypair = crypto::Ed25519KeyPair::generate();
        let data = MessageData {
            fid: Fid(1),
            network: FarcasterNetwork::Mainnet,
            timestamp: 100_000,
            body: MessageBody::CastRemove(CastRemoveBody { target_hash: [0u8; 20] }),
        };
        let message = sign(&data, &keypair);
        assert!(validate_message(&message, FarcasterNetwork::Mainnet, 0).is_err());
    }

    #[test]
    fn rejects_oversized_link_type() {
        let keypair = crypto::Ed25519KeyPair::generate();
        let data = MessageData {
            fid: Fid(1),
            network: FarcasterNetwork::Mainnet,
            timestamp: 100,
            body: MessageBody::LinkAdd(LinkBody {
                link_type: "way-too-long".into(),
                target_fid: Fid(2),
            }),
        };
        let message = sign(&data, &keypair);
        assert!(validate_message(&message, FarcasterNetwork::Mainnet, 200).is_err());
    }
}
