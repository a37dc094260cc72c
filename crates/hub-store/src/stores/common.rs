//! Shared LWW merge/revoke/prune algorithm (spec §4.3).
//!
//! The six message families are "duck-typed": each only differs in how it
//! computes a body-key and whether it carries a legacy (unpadded) index key
//! to migrate away from (§9). [`StoreSpec`] captures exactly that
//! difference; everything else — conflict detection, the
//! `(timestamp, ADD>REMOVE, hash)` tie-break, quota, and event emission —
//! lives here once.

use crate::event_log::EventLog;
use crate::key_codec::{self, StoreKind};
use crate::storage::{Storage, WriteBatch};
use crate::storage_cache::StorageCache;
use hub_types::{Fid, HubError, HubEvent, HubEventBody, Message, Result, TsHash};

pub trait StoreSpec {
    const KIND: StoreKind;

    /// Fixed-width key identifying the conflict slot this message occupies
    /// within `(fid, store)`. Two messages conflict iff they produce the
    /// same body-key.
    fn body_key(message: &Message) -> Result<Vec<u8>>;

    /// Legacy (pre-fix) body-key index prefix, if this message type has one
    /// still on disk from before the §9 padding fix. Only `Link` does.
    fn legacy_body_key_prefix(_message: &Message) -> Option<Vec<u8>> {
        None
    }

    /// Whether `message` is eligible to be dropped by [`prune_messages`].
    /// `LinkCompactState` rows opt out: they describe a whole link-type's
    /// target set, so pruning one would truncate a fid's entire follow-graph
    /// snapshot rather than dropping a single relationship.
    fn is_prunable(_message: &Message) -> bool {
        true
    }
}

fn order_key(message: &Message) -> (u32, u8, [u8; 20]) {
    let priority = if message.message_type().is_add() { 1 } else { 0 };
    (message.data.timestamp, priority, message.hash)
}

/// `true` if `incoming` strictly outranks `current` under the spec's
/// `(timestamp, ADD>REMOVE, hash)` total order.
fn outranks(incoming: &Message, current: &Message) -> bool {
    order_key(incoming) > order_key(current)
}

struct Candidate {
    ts_hash: TsHash,
    message: Message,
    /// The secondary-index key this candidate was found at, so it can be
    /// deleted (and, if legacy, migrated) regardless of merge outcome.
    index_key: Vec<u8>,
    is_legacy: bool,
}

fn find_candidates<S: StoreSpec>(
    storage: &Storage,
    fid: Fid,
    body_key: &[u8],
    message: &Message,
) -> Result<Vec<Candidate>> {
    let mut out = Vec::new();
    let prefix = key_codec::body_key_index_prefix(fid, S::KIND, body_key);
    for row in storage.scan_prefix(&prefix) {
        let (key, value) = row.map_err(HubError::storage_failure)?;
        if let Some(ts_hash) = TsHash::from_bytes(&value) {
            if let Some(existing) = load_message(storage, fid, S::KIND, &ts_hash)? {
                out.push(Candidate {
                    ts_hash,
                    message: existing,
                    index_key: key.to_vec(),
                    is_legacy: false,
                });
            }
        }
    }

    if let Some(legacy_prefix) = S::legacy_body_key_prefix(message) {
        for row in storage.scan_prefix(&legacy_prefix) {
            let (key, value) = row.map_err(HubError::storage_failure)?;
            if let Some(ts_hash) = TsHash::from_bytes(&value) {
                if let Some(existing) = load_message(storage, fid, S::KIND, &ts_hash)? {
                    out.push(Candidate {
                        ts_hash,
                        message: existing,
                        index_key: key.to_vec(),
                        is_legacy: true,
                    });
                }
            }
        }
    }

    Ok(out)
}

fn load_message(
    storage: &Storage,
    fid: Fid,
    store: StoreKind,
    ts_hash: &TsHash,
) -> Result<Option<Message>> {
    let key = key_codec::primary_key(fid, store, ts_hash);
    match storage.get(&key).map_err(HubError::storage_failure)? {
        Some(bytes) => {
            let message: Message = postcard::from_bytes(&bytes)
                .map_err(|e| HubError::parse_failure(e.to_string()))?;
            Ok(Some(message))
        }
        None => Ok(None),
    }
}

fn insert_message<S: StoreSpec>(batch: &mut WriteBatch, fid: Fid, body_key: &[u8], message: &Message) {
    let ts_hash = message.ts_hash();
    let primary = key_codec::primary_key(fid, S::KIND, &ts_hash);
    let bytes = hub_types::canonical_bytes(message).expect("message always encodes");
    batch.put(&primary, bytes);

    let index = key_codec::body_key_index(fid, S::KIND, body_key, &ts_hash);
    batch.put(&index, ts_hash.to_bytes().to_vec());

    let signer_bytes = message.signer.to_index_bytes();
    let signer_index = key_codec::by_signer_index(fid, S::KIND, &signer_bytes, &ts_hash);
    batch.put(&signer_index, ts_hash.to_bytes().to_vec());
}

/// Merge `message` into its store, applying the spec's duplicate/conflict/
/// prunable rules, and commit the result through `event_log`.
pub fn merge<S: StoreSpec>(
    storage: &Storage,
    cache: &StorageCache,
    event_log: &EventLog,
    now: u32,
    message: Message,
) -> Result<HubEvent> {
    let fid = message.fid();
    let body_key = S::body_key(&message)?;
    let candidates = find_candidates::<S>(storage, fid, &body_key, &message)?;

    if candidates.iter().any(|c| c.message.hash == message.hash) {
        return Err(HubError::duplicate());
    }

    let mut batch = WriteBatch::new();
    // Any legacy row is removed unconditionally; its message is re-inserted
    // in canonical form alongside whatever the tie-break decides.
    for candidate in &candidates {
        let primary = key_codec::primary_key(fid, S::KIND, &candidate.ts_hash);
        batch.delete(&primary);
        batch.delete(&candidate.index_key);
        let signer_bytes = candidate.message.signer.to_index_bytes();
        let signer_index =
            key_codec::by_signer_index(fid, S::KIND, &signer_bytes, &candidate.ts_hash);
        batch.delete(signer_index);
    }

    if candidates.is_empty() {
        if cache.is_full(fid, S::KIND, now) {
            if let Some(earliest) = cache.earliest(fid, S::KIND) {
                if message.ts_hash() < earliest {
                    return Err(HubError::prunable());
                }
            }
        }
        insert_message::<S>(&mut batch, fid, &body_key, &message);
        let event = event_log.commit(
            batch,
            HubEventBody::MergeMessage {
                message: Box::new(message.clone()),
                deleted: vec![],
            },
        )?;
        cache.record_merge(fid, S::KIND, message.ts_hash());
        return Ok(event);
    }

    let current_winner = candidates
        .iter()
        .max_by_key(|c| order_key(&c.message))
        .expect("candidates is non-empty");

    if !outranks(&message, &current_winner.message) {
        // Incoming loses LWW resolution. Any legacy row among the
        // candidates is still migrated to its canonical key as a plain
        // storage commit — no HubEvent, since nothing actually merged.
        if candidates.iter().any(|c| c.is_legacy) {
            for candidate in &candidates {
                insert_message::<S>(&mut batch, fid, &body_key, &candidate.message);
            }
            storage.commit(batch).map_err(HubError::storage_failure)?;
        }
        return Err(HubError::conflict(
            "incoming message loses LWW resolution against stored message",
        ));
    }

    insert_message::<S>(&mut batch, fid, &body_key, &message);
    let deleted: Vec<Message> = candidates.into_iter().map(|c| c.message).collect();
    for _ in &deleted {
        cache.record_removal(fid, S::KIND);
    }
    let event = event_log.commit(
        batch,
        HubEventBody::MergeMessage {
            message: Box::new(message.clone()),
            deleted,
        },
    )?;
    cache.record_merge(fid, S::KIND, message.ts_hash());
    cache.refresh_earliest(fid, S::KIND, storage)?;
    Ok(event)
}

/// Remove a message outright (signer/custody revocation). Idempotent: a
/// missing row is not an error.
pub fn revoke<S: StoreSpec>(
    storage: &Storage,
    cache: &StorageCache,
    event_log: &EventLog,
    fid: Fid,
    ts_hash: &TsHash,
) -> Result<Option<HubEvent>> {
    let Some(message) = load_message(storage, fid, S::KIND, ts_hash)? else {
        return Ok(None);
    };
    let body_key = S::body_key(&message)?;

    let mut batch = WriteBatch::new();
    batch.delete(key_codec::primary_key(fid, S::KIND, ts_hash));
    batch.delete(key_codec::body_key_index(fid, S::KIND, &body_key, ts_hash));
    let signer_bytes = message.signer.to_index_bytes();
    batch.delete(key_codec::by_signer_index(fid, S::KIND, &signer_bytes, ts_hash));

    let event = event_log.commit(
        batch,
        HubEventBody::RevokeMessage {
            message: Box::new(message),
        },
    )?;
    cache.record_removal(fid, S::KIND);
    cache.refresh_earliest(fid, S::KIND, storage)?;
    Ok(Some(event))
}

/// Remove the earliest-by-`TsHash` messages until `active-count <= limit`
/// (spec §4.3 "Prune (quota)").
pub fn prune_messages<S: StoreSpec>(
    storage: &Storage,
    cache: &StorageCache,
    event_log: &EventLog,
    fid: Fid,
    now: u32,
) -> Result<Vec<HubEvent>> {
    let mut events = Vec::new();
    let limit = cache.limit(fid, S::KIND, now);

    loop {
        if cache.count(fid, S::KIND) <= limit {
            break;
        }
        let prefix = key_codec::primary_prefix(fid, S::KIND);
        // Walk forward from the earliest row until a prunable one is found;
        // non-prunable rows (e.g. LinkCompactState) are left in place.
        let mut found = None;
        for row in storage.scan_prefix(&prefix) {
            let (key, value) = row.map_err(HubError::storage_failure)?;
            let message: Message = postcard::from_bytes(&value)
                .map_err(|e| HubError::parse_failure(e.to_string()))?;
            if S::is_prunable(&message) {
                found = Some((key.to_vec(), message));
                break;
            }
        }
        let Some((key, message)) = found else { break };
        let Some(ts_hash) = TsHash::from_bytes(&key[prefix.len()..]) else {
            break;
        };
        let body_key = S::body_key(&message)?;

        let mut batch = WriteBatch::new();
        batch.delete(&key);
        batch.delete(key_codec::body_key_index(fid, S::KIND, &body_key, &ts_hash));
        let signer_bytes = message.signer.to_index_bytes();
        batch.delete(key_codec::by_signer_index(fid, S::KIND, &signer_bytes, &ts_hash));

        let event = event_log.commit(
            batch,
            HubEventBody::PruneMessage {
                message: Box::new(message),
            },
        )?;
        cache.record_removal(fid, S::KIND);
        events.push(event);
    }
    if !events.is_empty() {
        cache.refresh_earliest(fid, S::KIND, storage)?;
    }
    Ok(events)
}

/// All messages currently stored for `(fid, store)`, in `TsHash` order.
pub fn get_all_messages_by_fid<S: StoreSpec>(storage: &Storage, fid: Fid) -> Result<Vec<Message>> {
    let prefix = key_codec::primary_prefix(fid, S::KIND);
    let mut out = Vec::new();
    for row in storage.scan_prefix(&prefix) {
        let (_, value) = row.map_err(HubError::storage_failure)?;
        let message: Message =
            postcard::from_bytes(&value).map_err(|e| HubError::parse_failure(e.to_string()))?;
        out.push(message);
    }
    Ok(out)
}
