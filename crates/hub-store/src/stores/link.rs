//! Link store: `LinkAdd`/`LinkRemove`/`LinkCompactState`, body-keyed by
//! `paddedLinkType(8) ‖ targetFid(4 BE)`.
//!
//! `LinkCompactState` rows describe an entire link-type's target set in one
//! message rather than one target each, so they are given a reserved
//! sentinel target-fid (`u32::MAX`) that no real fid can ever collide with,
//! keeping them in their own conflict slot per link type.

use super::common::{self, StoreSpec};
use crate::event_log::EventLog;
use crate::key_codec::{self, StoreKind};
use crate::storage::Storage;
use crate::storage_cache::StorageCache;
use hub_types::{Fid, HubError, HubEvent, Message, MessageBody, Result, TsHash};

const COMPACT_STATE_SENTINEL_FID: u32 = u32::MAX;

pub struct LinkStoreSpec;

impl StoreSpec for LinkStoreSpec {
    const KIND: StoreKind = StoreKind::Link;

    fn body_key(message: &Message) -> Result<Vec<u8>> {
        let (link_type, target_fid) = match &message.data.body {
            MessageBody::LinkAdd(body) | MessageBody::LinkRemove(body) => {
                (body.link_type.as_str(), body.target_fid.0 as u32)
            }
            MessageBody::LinkCompactState(body) => {
                (body.link_type.as_str(), COMPACT_STATE_SENTINEL_FID)
            }
            _ => return Err(HubError::validation_failure("not a link message")),
        };
        let mut out = Vec::with_capacity(key_codec::body_key_width::LINK);
        out.extend_from_slice(&key_codec::pad_link_type(link_type));
        out.extend_from_slice(&target_fid.to_be_bytes());
        Ok(out)
    }

    fn legacy_body_key_prefix(message: &Message) -> Option<Vec<u8>> {
        match &message.data.body {
            MessageBody::LinkAdd(body) | MessageBody::LinkRemove(body) => {
                Some(key_codec::legacy_link_body_key_index_prefix(
                    message.fid(),
                    &body.link_type,
                    body.target_fid,
                ))
            }
            _ => None,
        }
    }

    fn is_prunable(message: &Message) -> bool {
        !matches!(message.data.body, MessageBody::LinkCompactState(_))
    }
}

pub struct LinkStore;

impl LinkStore {
    pub fn merge(
        storage: &Storage,
        cache: &StorageCache,
        event_log: &EventLog,
        now: u32,
        message: Message,
    ) -> Result<HubEvent> {
        common::merge::<LinkStoreSpec>(storage, cache, event_log, now, message)
    }

    pub fn revoke(
        storage: &Storage,
        cache: &StorageCache,
        event_log: &EventLog,
        fid: Fid,
        ts_hash: &TsHash,
    ) -> Result<Option<HubEvent>> {
        common::revoke::<LinkStoreSpec>(storage, cache, event_log, fid, ts_hash)
    }

    /// Prunes the oldest individual link rows once `(fid, Link)` is over
    /// quota. `LinkCompactState` rows are exempt: they describe an entire
    /// link-type's state rather than one relationship, so pruning one would
    /// silently truncate a fid's whole follow-graph snapshot instead of
    /// dropping one edge.
    pub fn prune_messages(
        storage: &Storage,
        cache: &StorageCache,
        event_log: &EventLog,
        fid: Fid,
        now: u32,
    ) -> Result<Vec<HubEvent>> {
        common::prune_messages::<LinkStoreSpec>(storage, cache, event_log, fid, now)
    }

    pub fn get_all_messages_by_fid(storage: &Storage, fid: Fid) -> Result<Vec<Message>> {
        common::get_all_messages_by_fid::<LinkStoreSpec>(storage, fid)
    }
}
