//! UsernameProof store: one proof message per `name`, globally — unlike the
//! other five stores, two proofs for the same name conflict even if they
//! were submitted by different fids (spec §4.3 "only one per name").
//!
//! This can't reuse [`super::common`]'s merge algorithm, which scopes
//! conflict detection to `(fid, body-key)`: here the body-key (the padded
//! name) must be unique across the whole Hub, so the secondary index that
//! tracks "who currently owns this name" lives under a reserved sentinel
//! fid (`fid = 0`, never issued on-chain) rather than the submitting fid's
//! own row range.

use crate::event_log::EventLog;
use crate::key_codec::{self, StoreKind};
use crate::storage::{Storage, WriteBatch};
use crate::storage_cache::StorageCache;
use hub_types::{Fid, HubError, HubEvent, HubEventBody, Message, MessageBody, Result, TsHash};

fn body_key(message: &Message) -> Result<[u8; 20]> {
    match &message.data.body {
        MessageBody::UsernameProof(body) => Ok(key_codec::pad_username(&body.name)),
        _ => Err(HubError::validation_failure("not a username proof message")),
    }
}

/// `[fid(4 BE)] ‖ tsHash(24)` — the pointer value stored at a name's global
/// owner row, letting us load the owning message without knowing its fid
/// up front.
fn encode_owner_pointer(fid: Fid, ts_hash: &TsHash) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + TsHash::LEN);
    out.extend_from_slice(&(fid.0 as u32).to_be_bytes());
    out.extend_from_slice(&ts_hash.to_bytes());
    out
}

fn decode_owner_pointer(bytes: &[u8]) -> Option<(Fid, TsHash)> {
    if bytes.len() != 4 + TsHash::LEN {
        return None;
    }
    let fid = Fid(u32::from_be_bytes(bytes[0..4].try_into().ok()?) as u64);
    let ts_hash = TsHash::from_bytes(&bytes[4..])?;
    Some((fid, ts_hash))
}

fn load_message(storage: &Storage, fid: Fid, ts_hash: &TsHash) -> Result<Option<Message>> {
    let key = key_codec::primary_key(fid, StoreKind::UsernameProof, ts_hash);
    match storage.get(&key).map_err(HubError::storage_failure)? {
        Some(bytes) => Ok(Some(
            postcard::from_bytes(&bytes).map_err(|e| HubError::parse_failure(e.to_string()))?,
        )),
        None => Ok(None),
    }
}

fn order_key(message: &Message) -> (u32, [u8; 20]) {
    (message.data.timestamp, message.hash)
}

fn insert(batch: &mut WriteBatch, fid: Fid, padded_name: &[u8; 20], message: &Message) {
    let ts_hash = message.ts_hash();
    let primary = key_codec::primary_key(fid, StoreKind::UsernameProof, &ts_hash);
    let bytes = hub_types::canonical_bytes(message).expect("message always encodes");
    batch.put(&primary, bytes);

    let signer_bytes = message.signer.to_index_bytes();
    let signer_index =
        key_codec::by_signer_index(fid, StoreKind::UsernameProof, &signer_bytes, &ts_hash);
    batch.put(&signer_index, ts_hash.to_bytes().to_vec());

    let owner_key = key_codec::username_global_owner_key(padded_name);
    batch.put(&owner_key, encode_owner_pointer(fid, &ts_hash));
}

pub struct UsernameProofStore;

impl UsernameProofStore {
    pub fn merge(
        storage: &Storage,
        cache: &StorageCache,
        event_log: &EventLog,
        now: u32,
        message: Message,
    ) -> Result<HubEvent> {
        let fid = message.fid();
        let padded_name = body_key(&message)?;
        let owner_key = key_codec::username_global_owner_key(&padded_name);

        let current = match storage.get(&owner_key).map_err(HubError::storage_failure)? {
            Some(bytes) => decode_owner_pointer(&bytes).and_then(|(owner_fid, ts_hash)| {
                load_message(storage, owner_fid, &ts_hash)
                    .ok()
                    .flatten()
                    .map(|m| (owner_fid, ts_hash, m))
            }),
            None => None,
        };

        if let Some((_, _, existing)) = &current {
            if existing.hash == message.hash {
                return Err(HubError::duplicate());
            }
        }

        let mut batch = WriteBatch::new();

        match current {
            None => {
                if cache.is_full(fid, StoreKind::UsernameProof, now) {
                    if let Some(earliest) = cache.earliest(fid, StoreKind::UsernameProof) {
                        if message.ts_hash() < earliest {
                            return Err(HubError::prunable());
                        }
                    }
                }
                insert(&mut batch, fid, &padded_name, &message);
                let event = event_log.commit(
                    batch,
                    HubEventBody::MergeUsernameProof {
                        message: Box::new(message.clone()),
                        deleted: None,
                    },
                )?;
                cache.record_merge(fid, StoreKind::UsernameProof, message.ts_hash());
                Ok(event)
            }
            Some((owner_fid, owner_ts_hash, existing)) => {
                if order_key(&message) <= order_key(&existing) {
                    return Err(HubError::conflict(
                        "incoming username proof loses LWW resolution against the current owner",
                    ));
                }
                let owner_primary =
                    key_codec::primary_key(owner_fid, StoreKind::UsernameProof, &owner_ts_hash);
                batch.delete(&owner_primary);
                let owner_signer_bytes = existing.signer.to_index_bytes();
                batch.delete(key_codec::by_signer_index(
                    owner_fid,
                    StoreKind::UsernameProof,
                    &owner_signer_bytes,
                    &owner_ts_hash,
                ));
                insert(&mut batch, fid, &padded_name, &message);

                let event = event_log.commit(
                    batch,
                    HubEventBody::MergeUsernameProof {
                        message: Box::new(message.clone()),
                        deleted: Some(Box::new(existing)),
                    },
                )?;
                cache.record_removal(owner_fid, StoreKind::UsernameProof);
                cache.record_merge(fid, StoreKind::UsernameProof, message.ts_hash());
                if owner_fid == fid {
                    cache.refresh_earliest(fid, StoreKind::UsernameProof, storage)?;
                }
                Ok(event)
            }
        }
    }

    /// Idempotent on unmerged messages. Clears the global owner pointer
    /// only if `ts_hash` is still the recorded owner for its name.
    pub fn revoke(
        storage: &Storage,
        cache: &StorageCache,
        event_log: &EventLog,
        fid: Fid,
        ts_hash: &TsHash,
    ) -> Result<Option<HubEvent>> {
        let Some(message) = load_message(storage, fid, ts_hash)? else {
            return Ok(None);
        };
        let padded_name = body_key(&message)?;

        let mut batch = WriteBatch::new();
        batch.delete(key_codec::primary_key(fid, StoreKind::UsernameProof, ts_hash));
        let signer_bytes = message.signer.to_index_bytes();
        batch.delete(key_codec::by_signer_index(
            fid,
            StoreKind::UsernameProof,
            &signer_bytes,
            ts_hash,
        ));

        let owner_key = key_codec::username_global_owner_key(&padded_name);
        if let Some(bytes) = storage.get(&owner_key).map_err(HubError::storage_failure)? {
            if decode_owner_pointer(&bytes) == Some((fid, *ts_hash)) {
                batch.delete(&owner_key);
            }
        }

        let event = event_log.commit(
            batch,
            HubEventBody::RevokeMessage {
                message: Box::new(message),
            },
        )?;
        cache.record_removal(fid, StoreKind::UsernameProof);
        cache.refresh_earliest(fid, StoreKind::UsernameProof, storage)?;
        Ok(Some(event))
    }

    pub fn prune_messages(
        storage: &Storage,
        cache: &StorageCache,
        event_log: &EventLog,
        fid: Fid,
        now: u32,
    ) -> Result<Vec<HubEvent>> {
        let mut events = Vec::new();
        let limit = cache.limit(fid, StoreKind::UsernameProof, now);

        loop {
            if cache.count(fid, StoreKind::UsernameProof) <= limit {
                break;
            }
            let prefix = key_codec::primary_prefix(fid, StoreKind::UsernameProof);
            let Some(row) = storage
                .scan_prefix(&prefix)
                .next()
                .transpose()
                .map_err(HubError::storage_failure)?
            else {
                break;
            };
            let (key, _) = row;
            let Some(ts_hash) = TsHash::from_bytes(&key[prefix.len()..]) else {
                break;
            };
            let Some(event) = Self::revoke_as_prune(storage, cache, event_log, fid, &ts_hash)?
            else {
                break;
            };
            events.push(event);
        }
        Ok(events)
    }

    fn revoke_as_prune(
        storage: &Storage,
        cache: &StorageCache,
        event_log: &EventLog,
        fid: Fid,
        ts_hash: &TsHash,
    ) -> Result<Option<HubEvent>> {
        let Some(message) = load_message(storage, fid, ts_hash)? else {
            return Ok(None);
        };
        let padded_name = body_key(&message)?;

        let mut batch = WriteBatch::new();
        batch.delete(key_codec::primary_key(fid, StoreKind::UsernameProof, ts_hash));
        let signer_bytes = message.signer.to_index_bytes();
        batch.delete(key_codec::by_signer_index(
            fid,
            StoreKind::UsernameProof,
            &signer_bytes,
            ts_hash,
        ));
        let owner_key = key_codec::username_global_owner_key(&padded_name);
        if let Some(bytes) = storage.get(&owner_key).map_err(HubError::storage_failure)? {
            if decode_owner_pointer(&bytes) == Some((fid, *ts_hash)) {
                batch.delete(&owner_key);
            }
        }

        let event = event_log.commit(
            batch,
            HubEventBody::PruneMessage {
                message: Box::new(message),
            },
        )?;
        cache.record_removal(fid, StoreKind::UsernameProof);
        cache.refresh_earliest(fid, StoreKind::UsernameProof, storage)?;
        Ok(Some(event))
    }

    pub fn get_all_messages_by_fid(storage: &Storage, fid: Fid) -> Result<Vec<Message>> {
        let prefix = key_codec::primary_prefix(fid, StoreKind::UsernameProof);
        let mut out = Vec::new();
        for row in storage.scan_prefix(&prefix) {
            let (_, value) = row.map_err(HubError::storage_failure)?;
            let message: Message =
                postcard::from_bytes(&value).map_err(|e| HubError::parse_failure(e.to_string()))?;
            out.push(message);
        }
        Ok(out)
    }

    /// The fid that currently owns `name`, if any.
    pub fn get_owner(storage: &Storage, name: &str) -> Result<Option<Message>> {
        let padded_name = key_codec::pad_username(name);
        let owner_key = key_codec::username_global_owner_key(&padded_name);
        let Some(bytes) = storage.get(&owner_key).map_err(HubError::storage_failure)? else {
            return Ok(None);
        };
        let Some((fid, ts_hash)) = decode_owner_pointer(&bytes) else {
            return Ok(None);
        };
        load_message(storage, fid, &ts_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_types::{crypto, FarcasterNetwork, HashScheme, MessageData, SignatureScheme, SignerKey, UsernameProofBody};
    use tempfile::tempdir;

    fn proof(fid: Fid, name: &str, timestamp: u32, keypair: &crypto::Ed25519KeyPair) -> Message {
        let data = MessageData {
            fid,
            network: FarcasterNetwork::Mainnet,
            timestamp,
            body: MessageBody::UsernameProof(UsernameProofBody {
                name: name.to_string(),
                owner: [1u8; 20],
                timestamp: timestamp as u64,
                signature: vec![],
                fid,
            }),
        };
        let hash = crypto::compute_message_hash(&data).unwrap();
        let signature = keypair.sign(&hash).to_vec();
        Message {
            data,
            hash,
            hash_scheme: HashScheme::Blake3,
            signer: SignerKey::Ed25519(keypair.public_key()),
            signature,
            signature_scheme: SignatureScheme::Ed25519,
        }
    }

    #[test]
    fn second_fid_claiming_same_name_displaces_the_first() {
        let dir = tempdir().unwrap();
        let storage = std::sync::Arc::new(Storage::open(dir.path()).unwrap());
        let cache = StorageCache::rebuild(&storage).unwrap();
        let event_log = EventLog::open(storage.clone()).unwrap();

        let kp = crypto::Ed25519KeyPair::generate();
        let m1 = proof(Fid(1), "alice", 10, &kp);
        let m2 = proof(Fid(2), "alice", 20, &kp);

        UsernameProofStore::merge(&storage, &cache, &event_log, 100, m1.clone()).unwrap();
        assert_eq!(
            UsernameProofStore::get_owner(&storage, "alice").unwrap().unwrap().fid(),
            Fid(1)
        );

        UsernameProofStore::merge(&storage, &cache, &event_log, 100, m2.clone()).unwrap();
        assert_eq!(
            UsernameProofStore::get_owner(&storage, "alice").unwrap().unwrap().fid(),
            Fid(2)
        );
        assert!(UsernameProofStore::get_all_messages_by_fid(&storage, Fid(1))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn earlier_claim_after_the_fact_loses() {
        let dir = tempdir().unwrap();
        let storage = std::sync::Arc::new(Storage::open(dir.path()).unwrap());
        let cache = StorageCache::rebuild(&storage).unwrap();
        let event_log = EventLog::open(storage.clone()).unwrap();

        let kp = crypto::Ed25519KeyPair::generate();
        let m1 = proof(Fid(1), "bob", 20, &kp);
        let m2 = proof(Fid(2), "bob", 10, &kp);

        UsernameProofStore::merge(&storage, &cache, &event_log, 100, m1).unwrap();
        let err = UsernameProofStore::merge(&storage, &cache, &event_log, 100, m2).unwrap_err();
        assert_eq!(err.kind(), hub_types::ErrorKind::BadRequestConflict);
    }
}
