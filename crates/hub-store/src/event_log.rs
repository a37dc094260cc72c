//! Append-only Hub event stream (spec §4.4, §5 ordering guarantees).
//!
//! `EventLog` is the engine's single commit point: every store that wants
//! to mutate the KV store builds a [`WriteBatch`] and hands it, plus the
//! [`HubEventBody`] describing the mutation, to [`EventLog::commit`]. The
//! log assigns the next monotonic event id, appends the event row to the
//! same batch, commits it to storage, and only then publishes to
//! subscribers — guaranteeing subscribers never observe an event ahead of
//! its underlying KV commit, and that the global commit order matches
//! ascending event ids.

use crate::key_codec;
use crate::storage::{Storage, WriteBatch};
use hub_types::{HubEvent, HubEventBody, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 1024;

pub struct EventLog {
    storage: Arc<Storage>,
    next_id: AtomicU64,
    /// Serializes the assign-id / append-row / commit / publish sequence so
    /// the engine behaves as a single KV writer (spec §5), regardless of
    /// how many stores call in concurrently.
    write_lock: Mutex<()>,
    subscribers: broadcast::Sender<HubEvent>,
}

impl EventLog {
    pub fn open(storage: Arc<Storage>) -> Result<Self> {
        let next_id = Self::recover_next_id(&storage)?;
        let (subscribers, _) = broadcast::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        Ok(Self {
            storage,
            next_id: AtomicU64::new(next_id),
            write_lock: Mutex::new(()),
            subscribers,
        })
    }

    fn recover_next_id(storage: &Storage) -> Result<u64> {
        let prefix = key_codec::hub_event_prefix();
        let last = storage
            .scan_prefix_rev(&prefix)
            .next()
            .transpose()
            .map_err(hub_types::HubError::storage_failure)?;
        Ok(match last {
            Some((key, _)) => u64::from_be_bytes(key[1..9].try_into().unwrap()) + 1,
            None => 0,
        })
    }

    /// Finalize `batch` with the next event row, commit it, and publish the
    /// resulting event to subscribers. Returns the committed event.
    pub fn commit(&self, mut batch: WriteBatch, body: HubEventBody) -> Result<HubEvent> {
        let _guard = self.write_lock.lock();
        let id = self.next_id.load(Ordering::SeqCst);
        let event = HubEvent { id, body };
        let bytes = hub_types::canonical_bytes(&event)?;
        batch.put(key_codec::hub_event_key(id), bytes);

        self.storage
            .commit(batch)
            .map_err(hub_types::HubError::storage_failure)?;
        self.next_id.store(id + 1, Ordering::SeqCst);

        let _ = self.subscribers.send(event.clone());
        Ok(event)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.subscribers.subscribe()
    }

    /// Read events with id in `[from, from + limit)`, ascending.
    pub fn read_from(&self, from: u64, limit: usize) -> Result<Vec<HubEvent>> {
        let prefix = key_codec::hub_event_prefix();
        let mut events = Vec::new();
        for row in self.storage.scan_prefix(&prefix) {
            let (key, value) = row.map_err(hub_types::HubError::storage_failure)?;
            let id = u64::from_be_bytes(key[1..9].try_into().unwrap());
            if id < from {
                continue;
            }
            let event: HubEvent = postcard::from_bytes(&value)
                .map_err(|e| hub_types::HubError::parse_failure(e.to_string()))?;
            events.push(event);
            if events.len() >= limit {
                break;
            }
        }
        Ok(events)
    }

    pub fn next_event_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_types::{CastRemoveBody, Fid, Message, MessageBody};
    use tempfile::tempdir;

    fn dummy_message() -> Message {
        Message {
            data: hub_types::MessageData {
                fid: Fid(1),
                network: hub_types::FarcasterNetwork::Mainnet,
                timestamp: 1,
                body: MessageBody::CastRemove(CastRemoveBody { target_hash: [0u8; 20] }),
            },
            hash: [0u8; 20],
            hash_scheme: hub_types::HashScheme::Blake3,
            signer: hub_types::SignerKey::Ed25519([0u8; 32]),
            signature: vec![],
            signature_scheme: hub_types::SignatureScheme::Ed25519,
        }
    }

    #[test]
    fn event_ids_are_monotonic_and_survive_reopen() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let log = EventLog::open(storage.clone()).unwrap();

        for _ in 0..3 {
            let batch = WriteBatch::new();
            log.commit(
                batch,
                HubEventBody::RevokeMessage {
                    message: Box::new(dummy_message()),
                },
            )
            .unwrap();
        }
        assert_eq!(log.next_event_id(), 3);

        let reopened = EventLog::open(storage).unwrap();
        assert_eq!(reopened.next_event_id(), 3);
    }

    #[test]
    fn subscribers_receive_committed_events_in_order() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let log = EventLog::open(storage).unwrap();
        let mut rx = log.subscribe();

        let batch = WriteBatch::new();
        log.commit(
            batch,
            HubEventBody::RevokeMessage {
                message: Box::new(dummy_message()),
            },
        )
        .unwrap();

        let received = rx.try_recv().unwrap();
        assert_eq!(received.id, 0);
    }
}
