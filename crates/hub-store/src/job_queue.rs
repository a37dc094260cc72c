//! Durable background-job queue (spec §4.4, §5 "cancellable at each item
//! boundary", §6 `JobQueue` KV prefix).
//!
//! Only one job kind exists today: `RevokeBySigner`, enqueued whenever an
//! on-chain event invalidates a signer (a `Signer(Remove)` event, or —
//! forward-compatibly — a custody transfer). A job is popped by reading the
//! earliest row under its kind without deleting it, so a crash mid-run
//! leaves it to be retried on restart rather than silently dropped; the
//! caller only deletes the row once the revocation has actually completed.

use crate::key_codec;
use crate::storage::Storage;
use hub_types::{Fid, HubError, Result, SignerKey};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

const KIND_REVOKE_BY_SIGNER: u8 = 1;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevokeBySignerJob {
    pub fid: Fid,
    pub signer: SignerKey,
}

/// One durable queue entry: its id (for completion) plus the job payload.
pub struct QueuedJob {
    pub job_id: u64,
    pub job: RevokeBySignerJob,
}

pub struct JobQueue {
    storage: std::sync::Arc<Storage>,
    next_id: AtomicU64,
}

impl JobQueue {
    pub fn open(storage: std::sync::Arc<Storage>) -> Result<Self> {
        let next_id = Self::recover_next_id(&storage)?;
        Ok(Self {
            storage,
            next_id: AtomicU64::new(next_id),
        })
    }

    fn recover_next_id(storage: &Storage) -> Result<u64> {
        let prefix = key_codec::job_queue_prefix(KIND_REVOKE_BY_SIGNER);
        let last = storage
            .scan_prefix_rev(&prefix)
            .next()
            .transpose()
            .map_err(HubError::storage_failure)?;
        Ok(match last {
            Some((key, _)) => u64::from_be_bytes(key[2..10].try_into().unwrap()) + 1,
            None => 0,
        })
    }

    pub fn enqueue_revoke_by_signer(&self, fid: Fid, signer: SignerKey) -> Result<u64> {
        let job_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let job = RevokeBySignerJob { fid, signer };
        let bytes = hub_types::canonical_bytes(&job)?;
        self.storage
            .put(key_codec::job_queue_key(KIND_REVOKE_BY_SIGNER, job_id), bytes)
            .map_err(HubError::storage_failure)?;
        Ok(job_id)
    }

    /// The oldest still-pending job, without removing it.
    pub fn peek(&self) -> Result<Option<QueuedJob>> {
        let prefix = key_codec::job_queue_prefix(KIND_REVOKE_BY_SIGNER);
        let Some(row) = self.storage.scan_prefix(&prefix).next() else {
            return Ok(None);
        };
        let (key, value) = row.map_err(HubError::storage_failure)?;
        let job_id = u64::from_be_bytes(key[2..10].try_into().unwrap());
        let job: RevokeBySignerJob =
            postcard::from_bytes(&value).map_err(|e| HubError::parse_failure(e.to_string()))?;
        Ok(Some(QueuedJob { job_id, job }))
    }

    /// Mark `job_id` done. Idempotent: completing an already-absent job is
    /// not an error, since a crash-retry may race a concurrent completion.
    pub fn complete(&self, job_id: u64) -> Result<()> {
        self.storage
            .delete(key_codec::job_queue_key(KIND_REVOKE_BY_SIGNER, job_id))
            .map_err(HubError::storage_failure)
    }

    pub fn len(&self) -> Result<usize> {
        let prefix = key_codec::job_queue_prefix(KIND_REVOKE_BY_SIGNER);
        let mut count = 0;
        for row in self.storage.scan_prefix(&prefix) {
            row.map_err(HubError::storage_failure)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn enqueue_peek_complete_round_trips() {
        let dir = tempdir().unwrap();
        let storage = std::sync::Arc::new(Storage::open(dir.path()).unwrap());
        let queue = JobQueue::open(storage).unwrap();

        assert!(queue.peek().unwrap().is_none());
        let id = queue
            .enqueue_revoke_by_signer(Fid(7), SignerKey::Ed25519([9u8; 32]))
            .unwrap();

        let queued = queue.peek().unwrap().unwrap();
        assert_eq!(queued.job_id, id);
        assert_eq!(queued.job.fid, Fid(7));

        // peek does not consume.
        assert!(queue.peek().unwrap().is_some());

        queue.complete(id).unwrap();
        assert!(queue.peek().unwrap().is_none());
    }

    #[test]
    fn jobs_are_served_oldest_first() {
        let dir = tempdir().unwrap();
        let storage = std::sync::Arc::new(Storage::open(dir.path()).unwrap());
        let queue = JobQueue::open(storage).unwrap();

        let first = queue
            .enqueue_revoke_by_signer(Fid(1), SignerKey::Ed25519([1u8; 32]))
            .unwrap();
        queue
            .enqueue_revoke_by_signer(Fid(2), SignerKey::Ed25519([2u8; 32]))
            .unwrap();

        let queued = queue.peek().unwrap().unwrap();
        assert_eq!(queued.job_id, first);
    }

    #[test]
    fn next_id_recovers_across_reopen() {
        let dir = tempdir().unwrap();
        let storage = std::sync::Arc::new(Storage::open(dir.path()).unwrap());
        {
            let queue = JobQueue::open(storage.clone()).unwrap();
            queue
                .enqueue_revoke_by_signer(Fid(1), SignerKey::Ed25519([1u8; 32]))
                .unwrap();
        }
        let reopened = JobQueue::open(storage).unwrap();
        let id = reopened
            .enqueue_revoke_by_signer(Fid(2), SignerKey::Ed25519([2u8; 32]))
            .unwrap();
        assert_eq!(id, 1);
    }
}
