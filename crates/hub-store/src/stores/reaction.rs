//! Reaction store: `ReactionAdd`/`ReactionRemove`, body-keyed by
//! `[reactionType] ‖ targetKey(20)` so a like and a recast on the same
//! target occupy distinct conflict slots.

use super::common::{self, StoreSpec};
use crate::event_log::EventLog;
use crate::key_codec::StoreKind;
use crate::storage::Storage;
use crate::storage_cache::StorageCache;
use hub_types::{Fid, HubError, HubEvent, Message, MessageBody, MessageTarget, Result, TsHash};

fn target_key(target: &MessageTarget) -> Hash20Buf {
    match target {
        MessageTarget::Cast { hash, .. } => *hash,
        MessageTarget::Url(url) => hub_types::crypto::blake3_20(url.as_bytes()),
    }
}

type Hash20Buf = hub_types::Hash20;

pub struct ReactionStoreSpec;

impl StoreSpec for ReactionStoreSpec {
    const KIND: StoreKind = StoreKind::Reaction;

    fn body_key(message: &Message) -> Result<Vec<u8>> {
        let body = match &message.data.body {
            MessageBody::ReactionAdd(body) | MessageBody::ReactionRemove(body) => body,
            _ => return Err(HubError::validation_failure("not a reaction message")),
        };
        let mut out = Vec::with_capacity(crate::key_codec::body_key_width::REACTION);
        out.push(body.reaction_type as u8);
        out.extend_from_slice(&target_key(&body.target));
        Ok(out)
    }
}

pub struct ReactionStore;

impl ReactionStore {
    pub fn merge(
        storage: &Storage,
        cache: &StorageCache,
        event_log: &EventLog,
        now: u32,
        message: Message,
    ) -> Result<HubEvent> {
        common::merge::<ReactionStoreSpec>(storage, cache, event_log, now, message)
    }

    pub fn revoke(
        storage: &Storage,
        cache: &StorageCache,
        event_log: &EventLog,
        fid: Fid,
        ts_hash: &TsHash,
    ) -> Result<Option<HubEvent>> {
        common::revoke::<ReactionStoreSpec>(storage, cache, event_log, fid, ts_hash)
    }

    pub fn prune_messages(
        storage: &Storage,
        cache: &StorageCache,
        event_log: &EventLog,
        fid: Fid,
        now: u32,
    ) -> Result<Vec<HubEvent>> {
        common::prune_messages::<ReactionStoreSpec>(storage, cache, event_log, fid, now)
    }

    pub fn get_all_messages_by_fid(storage: &Storage, fid: Fid) -> Result<Vec<Message>> {
        common::get_all_messages_by_fid::<ReactionStoreSpec>(storage, fid)
    }
}
