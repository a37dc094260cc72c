//! Cast store: `CastAdd`/`CastRemove`, body-keyed by the target cast hash.

use super::common::{self, StoreSpec};
use crate::event_log::EventLog;
use crate::key_codec::StoreKind;
use crate::storage::Storage;
use crate::storage_cache::StorageCache;
use hub_types::{Fid, HubError, HubEvent, Message, MessageBody, Result, TsHash};

pub struct CastStoreSpec;

impl StoreSpec for CastStoreSpec {
    const KIND: StoreKind = StoreKind::Cast;

    fn body_key(message: &Message) -> Result<Vec<u8>> {
        match &message.data.body {
            MessageBody::CastAdd(_) => Ok(message.hash.to_vec()),
            MessageBody::CastRemove(body) => Ok(body.target_hash.to_vec()),
            _ => Err(HubError::validation_failure("not a cast message")),
        }
    }
}

pub struct CastStore;

impl CastStore {
    pub fn merge(
        storage: &Storage,
        cache: &StorageCache,
        event_log: &EventLog,
        now: u32,
        message: Message,
    ) -> Result<HubEvent> {
        common::merge::<CastStoreSpec>(storage, cache, event_log, now, message)
    }

    pub fn revoke(
        storage: &Storage,
        cache: &StorageCache,
        event_log: &EventLog,
        fid: Fid,
        ts_hash: &TsHash,
    ) -> Result<Option<HubEvent>> {
        common::revoke::<CastStoreSpec>(storage, cache, event_log, fid, ts_hash)
    }

    pub fn prune_messages(
        storage: &Storage,
        cache: &StorageCache,
        event_log: &EventLog,
        fid: Fid,
        now: u32,
    ) -> Result<Vec<HubEvent>> {
        common::prune_messages::<CastStoreSpec>(storage, cache, event_log, fid, now)
    }

    pub fn get_all_messages_by_fid(storage: &Storage, fid: Fid) -> Result<Vec<Message>> {
        common::get_all_messages_by_fid::<CastStoreSpec>(storage, fid)
    }
}
