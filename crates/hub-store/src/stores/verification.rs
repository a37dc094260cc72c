//! Verification store: `VerificationAdd`/`VerificationRemove`, body-keyed by
//! the claimed address.

use super::common::{self, StoreSpec};
use crate::event_log::EventLog;
use crate::key_codec::StoreKind;
use crate::storage::Storage;
use crate::storage_cache::StorageCache;
use hub_types::{Fid, HubError, HubEvent, Message, MessageBody, Result, TsHash};

pub struct VerificationStoreSpec;

impl StoreSpec for VerificationStoreSpec {
    const KIND: StoreKind = StoreKind::Verification;

    fn body_key(message: &Message) -> Result<Vec<u8>> {
        match &message.data.body {
            MessageBody::VerificationAdd(body) => Ok(body.address.to_vec()),
            MessageBody::VerificationRemove(body) => Ok(body.address.to_vec()),
            _ => Err(HubError::validation_failure("not a verification message")),
        }
    }
}

pub struct VerificationStore;

impl VerificationStore {
    pub fn merge(
        storage: &Storage,
        cache: &StorageCache,
        event_log: &EventLog,
        now: u32,
        message: Message,
    ) -> Result<HubEvent> {
        common::merge::<VerificationStoreSpec>(storage, cache, event_log, now, message)
    }

    pub fn revoke(
        storage: &Storage,
        cache: &StorageCache,
        event_log: &EventLog,
        fid: Fid,
        ts_hash: &TsHash,
    ) -> Result<Option<HubEvent>> {
        common::revoke::<VerificationStoreSpec>(storage, cache, event_log, fid, ts_hash)
    }

    pub fn prune_messages(
        storage: &Storage,
        cache: &StorageCache,
        event_log: &EventLog,
        fid: Fid,
        now: u32,
    ) -> Result<Vec<HubEvent>> {
        common::prune_messages::<VerificationStoreSpec>(storage, cache, event_log, fid, now)
    }

    pub fn get_all_messages_by_fid(storage: &Storage, fid: Fid) -> Result<Vec<Message>> {
        common::get_all_messages_by_fid::<VerificationStoreSpec>(storage, fid)
    }
}
