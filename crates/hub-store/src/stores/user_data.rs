//! User-data store: `UserDataAdd`, body-keyed by `[dataType]` — one active
//! value per `UserDataType` per fid.

use super::common::{self, StoreSpec};
use crate::event_log::EventLog;
use crate::key_codec::StoreKind;
use crate::storage::Storage;
use crate::storage_cache::StorageCache;
use hub_types::{Fid, HubError, HubEvent, Message, MessageBody, Result, TsHash};

pub struct UserDataStoreSpec;

impl StoreSpec for UserDataStoreSpec {
    const KIND: StoreKind = StoreKind::UserData;

    fn body_key(message: &Message) -> Result<Vec<u8>> {
        match &message.data.body {
            MessageBody::UserDataAdd(body) => Ok(vec![body.data_type as u8]),
            _ => Err(HubError::validation_failure("not a user-data message")),
        }
    }
}

pub struct UserDataStore;

impl UserDataStore {
    pub fn merge(
        storage: &Storage,
        cache: &StorageCache,
        event_log: &EventLog,
        now: u32,
        message: Message,
    ) -> Result<HubEvent> {
        common::merge::<UserDataStoreSpec>(storage, cache, event_log, now, message)
    }

    pub fn revoke(
        storage: &Storage,
        cache: &StorageCache,
        event_log: &EventLog,
        fid: Fid,
        ts_hash: &TsHash,
    ) -> Result<Option<HubEvent>> {
        common::revoke::<UserDataStoreSpec>(storage, cache, event_log, fid, ts_hash)
    }

    pub fn prune_messages(
        storage: &Storage,
        cache: &StorageCache,
        event_log: &EventLog,
        fid: Fid,
        now: u32,
    ) -> Result<Vec<HubEvent>> {
        common::prune_messages::<UserDataStoreSpec>(storage, cache, event_log, fid, now)
    }

    pub fn get_all_messages_by_fid(storage: &Storage, fid: Fid) -> Result<Vec<Message>> {
        common::get_all_messages_by_fid::<UserDataStoreSpec>(storage, fid)
    }
}
