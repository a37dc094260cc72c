//! Append-only on-chain event log and its derived views (spec §4.6).
//!
//! Custody address, active-signer set, and storage units are never stored
//! directly — they are recomputed from the event stream each time they are
//! asked for (the stream itself is small and ordered, so this stays cheap).
//! `StorageRent` is the exception: its contribution to quota is cached in
//! [`crate::storage_cache::StorageCache`] as events are merged, since that
//! cache must be consultable without a chain-watcher round trip.

use crate::key_codec::{self};
use crate::storage::{Storage, WriteBatch};
use crate::storage_cache::StorageCache;
use hub_types::{
    Fid, Hash20, HubError, IdRegisterEventBody, IdRegisterEventType, OnChainEvent,
    OnChainEventBody, OnChainEventType, Result, SignerEventBody, SignerEventType,
};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    Duplicate,
}

pub struct OnChainEventStore;

impl OnChainEventStore {
    /// Merge one chain-watcher-delivered event. Idempotent on
    /// `(transactionHash, logIndex)`.
    pub fn merge(
        storage: &Storage,
        cache: &StorageCache,
        event: &OnChainEvent,
    ) -> Result<MergeOutcome> {
        let tx_index_key =
            key_codec::onchain_event_tx_index(&event.transaction_hash, event.log_index);
        if storage
            .contains_key(&tx_index_key)
            .map_err(HubError::storage_failure)?
        {
            return Ok(MergeOutcome::Duplicate);
        }

        let primary_key = key_codec::onchain_event_key(
            event.fid,
            event.event_type(),
            event.block_number,
            event.log_index,
        );
        let bytes = hub_types::canonical_bytes(event)?;

        let mut batch = WriteBatch::new();
        batch.put(&primary_key, bytes);
        batch.put(&tx_index_key, primary_key.clone());

        match &event.body {
            OnChainEventBody::Signer(body) => {
                let mut key = key_codec::onchain_signer_index_prefix(&body.key);
                key.extend_from_slice(&event.block_number.to_be_bytes());
                key.extend_from_slice(&event.log_index.to_be_bytes());
                batch.put(key, primary_key.clone());
            }
            OnChainEventBody::IdRegister(body) => {
                let mut key = key_codec::onchain_to_address_index_prefix(&body.to);
                key.extend_from_slice(&event.block_number.to_be_bytes());
                key.extend_from_slice(&event.log_index.to_be_bytes());
                batch.put(key, primary_key.clone());
            }
            OnChainEventBody::StorageRent(_) => {}
        }

        storage.commit(batch).map_err(HubError::storage_failure)?;

        if let OnChainEventBody::StorageRent(body) = &event.body {
            cache.add_rent(event.fid, body.units, body.expiry);
        }

        Ok(MergeOutcome::Merged)
    }

    /// All events of one type for `fid`, ordered by `(blockNumber, logIndex)`.
    pub fn events_by_type(
        storage: &Storage,
        fid: Fid,
        event_type: OnChainEventType,
    ) -> Result<Vec<OnChainEvent>> {
        let prefix = key_codec::onchain_event_prefix(fid, event_type);
        let mut events = Vec::new();
        for row in storage.scan_prefix(&prefix) {
            let (_, value) = row.map_err(HubError::storage_failure)?;
            let event: OnChainEvent =
                postcard::from_bytes(&value).map_err(|e| HubError::parse_failure(e.to_string()))?;
            events.push(event);
        }
        Ok(events)
    }

    /// Coordinates (and `to` address) of the latest `Register`/`Transfer`
    /// event, if the fid has been registered at all. `ChangeRecovery` never
    /// moves custody and is not a candidate here.
    fn latest_custody_event(storage: &Storage, fid: Fid) -> Result<Option<(u64, u32, Hash20)>> {
        let events = Self::events_by_type(storage, fid, OnChainEventType::IdRegister)?;
        let mut latest: Option<(u64, u32, Hash20)> = None;
        for event in events {
            if let OnChainEventBody::IdRegister(IdRegisterEventBody {
                event_type: IdRegisterEventType::Register | IdRegisterEventType::Transfer,
                to,
                ..
            }) = event.body
            {
                let key = (event.block_number, event.log_index);
                if latest.map(|(b, l, _)| (b, l) < key).unwrap_or(true) {
                    latest = Some((key.0, key.1, to));
                }
            }
        }
        Ok(latest)
    }

    /// The fid's current custody address: the `to` of the latest
    /// `Register`/`Transfer` event.
    pub fn custody_address(storage: &Storage, fid: Fid) -> Result<Option<Hash20>> {
        Ok(Self::latest_custody_event(storage, fid)?.map(|(_, _, to)| to))
    }

    /// The flat set of ed25519 keys currently authorized to sign for `fid`:
    /// every key whose most recent `Signer` event is `Add` (spec §9, the
    /// collapsed flat model that replaces the retired delegation-graph
    /// design) *and* was emitted after the fid's latest custody
    /// register/transfer. A custody transfer invalidates every signer added
    /// under the outgoing custodian (spec §8 S4) — only `Signer` events
    /// coordinates strictly after the latest `IdRegister` event count.
    pub fn active_signers(storage: &Storage, fid: Fid) -> Result<Vec<[u8; 32]>> {
        let custody_cutoff = Self::latest_custody_event(storage, fid)?.map(|(b, l, _)| (b, l));
        let events = Self::events_by_type(storage, fid, OnChainEventType::Signer)?;
        let mut latest_by_key: HashMap<[u8; 32], (u64, u32, SignerEventType)> = HashMap::new();
        for event in events {
            if let OnChainEventBody::Signer(SignerEventBody { event_type, key, .. }) = event.body {
                let coords = (event.block_number, event.log_index);
                if custody_cutoff.map(|cutoff| coords <= cutoff).unwrap_or(false) {
                    continue;
                }
                let entry = latest_by_key.entry(key).or_insert((0, 0, event_type));
                if coords >= (entry.0, entry.1) {
                    *entry = (coords.0, coords.1, event_type);
                }
            }
        }
        Ok(latest_by_key
            .into_iter()
            .filter(|(_, (_, _, t))| *t == SignerEventType::Add)
            .map(|(key, _)| key)
            .collect())
    }

    pub fn is_active_signer(storage: &Storage, fid: Fid, key: &[u8; 32]) -> Result<bool> {
        Ok(Self::active_signers(storage, fid)?.contains(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_types::Bytes32;
    use tempfile::tempdir;

    fn event(
        fid: Fid,
        block_number: u64,
        log_index: u32,
        body: OnChainEventBody,
    ) -> OnChainEvent {
        OnChainEvent {
            fid,
            block_number,
            block_hash: [0u8; 32],
            transaction_hash: {
                let mut h = [0u8; 32];
                h[0..8].copy_from_slice(&block_number.to_be_bytes());
                h[8..12].copy_from_slice(&log_index.to_be_bytes());
                h
            },
            log_index,
            body,
        }
    }

    #[test]
    fn duplicate_replay_is_a_no_op() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let cache = StorageCache::rebuild(&storage).unwrap();

        let e = event(
            Fid(1),
            1,
            0,
            OnChainEventBody::IdRegister(IdRegisterEventBody {
                event_type: IdRegisterEventType::Register,
                to: [1u8; 20],
                from: None,
                recovery_address: [2u8; 20],
            }),
        );

        assert_eq!(
            OnChainEventStore::merge(&storage, &cache, &e).unwrap(),
            MergeOutcome::Merged
        );
        assert_eq!(
            OnChainEventStore::merge(&storage, &cache, &e).unwrap(),
            MergeOutcome::Duplicate
        );
    }

    #[test]
    fn custody_follows_latest_transfer() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let cache = StorageCache::rebuild(&storage).unwrap();

        let register = event(
            Fid(1),
            1,
            0,
            OnChainEventBody::IdRegister(IdRegisterEventBody {
                event_type: IdRegisterEventType::Register,
                to: [1u8; 20],
                from: None,
                recovery_address: [0u8; 20],
            }),
        );
        let transfer = event(
            Fid(1),
            2,
            0,
            OnChainEventBody::IdRegister(IdRegisterEventBody {
                event_type: IdRegisterEventType::Transfer,
                to: [2u8; 20],
                from: Some([1u8; 20]),
                recovery_address: [0u8; 20],
            }),
        );

        OnChainEventStore::merge(&storage, &cache, &register).unwrap();
        OnChainEventStore::merge(&storage, &cache, &transfer).unwrap();

        assert_eq!(
            OnChainEventStore::custody_address(&storage, Fid(1)).unwrap(),
            Some([2u8; 20])
        );
    }

    #[test]
    fn signer_add_then_remove_clears_active_set() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let cache = StorageCache::rebuild(&storage).unwrap();

        let key: Bytes32 = [9u8; 32];
        let add = event(
            Fid(1),
            1,
            0,
            OnChainEventBody::Signer(SignerEventBody {
                event_type: SignerEventType::Add,
                key,
                key_type: 1,
                metadata: vec![],
            }),
        );
        let remove = event(
            Fid(1),
            2,
            0,
            OnChainEventBody::Signer(SignerEventBody {
                event_type: SignerEventType::Remove,
                key,
                key_type: 1,
                metadata: vec![],
            }),
        );

        OnChainEventStore::merge(&storage, &cache, &add).unwrap();
        assert!(OnChainEventStore::is_active_signer(&storage, Fid(1), &key).unwrap());

        OnChainEventStore::merge(&storage, &cache, &remove).unwrap();
        assert!(!OnChainEventStore::is_active_signer(&storage, Fid(1), &key).unwrap());
    }

    #[test]
    fn custody_transfer_invalidates_signers_added_under_prior_custodian() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let cache = StorageCache::rebuild(&storage).unwrap();

        let register = event(
            Fid(9),
            1,
            0,
            OnChainEventBody::IdRegister(IdRegisterEventBody {
                event_type: IdRegisterEventType::Register,
                to: [1u8; 20],
                from: None,
                recovery_address: [0u8; 20],
            }),
        );
        let key_under_a: Bytes32 = [9u8; 32];
        let add_under_a = event(
            Fid(9),
            2,
            0,
            OnChainEventBody::Signer(SignerEventBody {
                event_type: SignerEventType::Add,
                key: key_under_a,
                key_type: 1,
                metadata: vec![],
            }),
        );
        let transfer = event(
            Fid(9),
            3,
            0,
            OnChainEventBody::IdRegister(IdRegisterEventBody {
                event_type: IdRegisterEventType::Transfer,
                to: [2u8; 20],
                from: Some([1u8; 20]),
                recovery_address: [0u8; 20],
            }),
        );
        let key_under_b: Bytes32 = [8u8; 32];
        let add_under_b = event(
            Fid(9),
            4,
            0,
            OnChainEventBody::Signer(SignerEventBody {
                event_type: SignerEventType::Add,
                key: key_under_b,
                key_type: 1,
                metadata: vec![],
            }),
        );

        OnChainEventStore::merge(&storage, &cache, &register).unwrap();
        OnChainEventStore::merge(&storage, &cache, &add_under_a).unwrap();
        assert!(OnChainEventStore::is_active_signer(&storage, Fid(9), &key_under_a).unwrap());

        OnChainEventStore::merge(&storage, &cache, &transfer).unwrap();
        assert!(!OnChainEventStore::is_active_signer(&storage, Fid(9), &key_under_a).unwrap());

        OnChainEventStore::merge(&storage, &cache, &add_under_b).unwrap();
        assert!(OnChainEventStore::is_active_signer(&storage, Fid(9), &key_under_b).unwrap());
        assert!(!OnChainEventStore::is_active_signer(&storage, Fid(9), &key_under_a).unwrap());
    }
}
