//! Engine facade (spec §4.4) — the one entry point every external caller
//! (RPC surface, sync client, chain watcher, CLI) goes through. It owns
//! cross-store rules the typed stores can't enforce on their own: signer
//! authorization, the username-proof embedded signature, on-chain-event
//! cascades, and keeping the sync trie in step with every commit.

use crate::event_log::EventLog;
use crate::job_queue::{JobQueue, RevokeBySignerJob};
use crate::key_codec::{self, StoreKind};
use crate::metrics::Metrics;
use crate::onchain_store::{MergeOutcome, OnChainEventStore};
use crate::storage::{Storage, WriteBatch};
use crate::storage_cache::StorageCache;
use crate::stores::{
    CastStore, LinkStore, ReactionStore, UserDataStore, UsernameProofStore, VerificationStore,
};
use crate::sync_trie::SyncTrie;
use crate::validator;
use hub_types::{
    crypto, Fid, FarcasterNetwork, HubError, HubEvent, HubEventBody, IdRegisterEventType,
    Message, MessageBody, MessageType, OnChainEvent, OnChainEventBody, Result, SignerEventType,
    SignerKey, SyncId, SyncIdType, TsHash, UserDataType,
};
use std::path::Path;
use std::sync::Arc;

/// Store-kind label used in metric names; lowercase, stable across releases.
fn store_label(store: StoreKind) -> &'static str {
    match store {
        StoreKind::Cast => "cast",
        StoreKind::Reaction => "reaction",
        StoreKind::Link => "link",
        StoreKind::Verification => "verification",
        StoreKind::UserData => "user_data",
        StoreKind::UsernameProof => "username_proof",
    }
}

pub struct Engine {
    storage: Arc<Storage>,
    cache: StorageCache,
    event_log: EventLog,
    job_queue: JobQueue,
    metrics: Metrics,
    network: FarcasterNetwork,
    username_proof_domain_separator: [u8; 32],
}

impl Engine {
    pub fn open(
        path: impl AsRef<Path>,
        network: FarcasterNetwork,
        username_proof_domain_separator: [u8; 32],
        statsd_server: Option<&str>,
    ) -> Result<Self> {
        let storage = Arc::new(Storage::open(path).map_err(HubError::storage_failure)?);
        let cache = StorageCache::rebuild(&storage)?;
        let event_log = EventLog::open(storage.clone())?;
        let job_queue = JobQueue::open(storage.clone())?;
        let metrics = Metrics::new(statsd_server);
        Ok(Self {
            storage,
            cache,
            event_log,
            job_queue,
            metrics,
            network,
            username_proof_domain_separator,
        })
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<HubEvent> {
        self.event_log.subscribe()
    }

    pub fn read_events_from(&self, from: u64, limit: usize) -> Result<Vec<HubEvent>> {
        self.event_log.read_from(from, limit)
    }

    // -------------------------------------------------------------------
    // Message submission
    // -------------------------------------------------------------------

    /// Validate, authorize, merge, prune, and sync-trie-index one message.
    pub fn submit_message(&self, message: Message, now_farcaster_seconds: u32) -> Result<HubEvent> {
        validator::validate_message(&message, self.network, now_farcaster_seconds)?;

        let SignerKey::Ed25519(signer_key) = message.signer else {
            return Err(HubError::validation_failure("expected ed25519 signer key"));
        };
        if !OnChainEventStore::is_active_signer(&self.storage, message.fid(), &signer_key)? {
            return Err(HubError::unauthorized(
                "signer is not an active signer for this fid",
            ));
        }
        if let MessageBody::UsernameProof(proof) = &message.data.body {
            validator::verify_username_proof_signature(
                proof,
                &self.username_proof_domain_separator,
            )?;
        }

        let fid = message.fid();
        let store = StoreKind::from_message_type(message.message_type());
        let event = match self.dispatch_merge(now_farcaster_seconds, message) {
            Ok(event) => event,
            Err(error) if error.kind() == hub_types::ErrorKind::BadRequestDuplicate => {
                self.metrics.message_duplicate(store_label(store));
                return Err(error);
            }
            Err(error) if error.kind() == hub_types::ErrorKind::BadRequestConflict => {
                self.metrics.message_conflict(store_label(store));
                return Err(error);
            }
            Err(error) if error.kind() == hub_types::ErrorKind::BadRequestPrunable => {
                self.metrics.message_prunable(store_label(store));
                return Err(error);
            }
            Err(error) => return Err(error),
        };
        self.metrics.message_merged(store_label(store));
        tracing::info!(%fid, store = ?store, event_id = event.id, "merged message");
        self.apply_sync_trie_delta(&event)?;

        let prune_events = self.prune_store(store, fid, now_farcaster_seconds)?;
        for prune_event in prune_events {
            self.metrics.message_pruned(store_label(store));
            tracing::info!(%fid, store = ?store, event_id = prune_event.id, "pruned message over quota");
            self.apply_sync_trie_delta(&prune_event)?;
        }

        Ok(event)
    }

    fn dispatch_merge(&self, now: u32, message: Message) -> Result<HubEvent> {
        match message.message_type() {
            MessageType::CastAdd | MessageType::CastRemove => {
                CastStore::merge(&self.storage, &self.cache, &self.event_log, now, message)
            }
            MessageType::ReactionAdd | MessageType::ReactionRemove => {
                ReactionStore::merge(&self.storage, &self.cache, &self.event_log, now, message)
            }
            MessageType::LinkAdd | MessageType::LinkRemove | MessageType::LinkCompactState => {
                LinkStore::merge(&self.storage, &self.cache, &self.event_log, now, message)
            }
            MessageType::VerificationAdd | MessageType::VerificationRemove => {
                VerificationStore::merge(&self.storage, &self.cache, &self.event_log, now, message)
            }
            MessageType::UserDataAdd => {
                UserDataStore::merge(&self.storage, &self.cache, &self.event_log, now, message)
            }
            MessageType::UsernameProof => {
                UsernameProofStore::merge(&self.storage, &self.cache, &self.event_log, now, message)
            }
        }
    }

    fn prune_store(&self, store: StoreKind, fid: Fid, now: u32) -> Result<Vec<HubEvent>> {
        match store {
            StoreKind::Cast => CastStore::prune_messages(&self.storage, &self.cache, &self.event_log, fid, now),
            StoreKind::Reaction => {
                ReactionStore::prune_messages(&self.storage, &self.cache, &self.event_log, fid, now)
            }
            StoreKind::Link => LinkStore::prune_messages(&self.storage, &self.cache, &self.event_log, fid, now),
            StoreKind::Verification => {
                VerificationStore::prune_messages(&self.storage, &self.cache, &self.event_log, fid, now)
            }
            StoreKind::UserData => {
                UserDataStore::prune_messages(&self.storage, &self.cache, &self.event_log, fid, now)
            }
            StoreKind::UsernameProof => {
                UsernameProofStore::prune_messages(&self.storage, &self.cache, &self.event_log, fid, now)
            }
        }
    }

    fn revoke_in_store(&self, store: StoreKind, fid: Fid, ts_hash: &TsHash) -> Result<Option<HubEvent>> {
        match store {
            StoreKind::Cast => CastStore::revoke(&self.storage, &self.cache, &self.event_log, fid, ts_hash),
            StoreKind::Reaction => {
                ReactionStore::revoke(&self.storage, &self.cache, &self.event_log, fid, ts_hash)
            }
            StoreKind::Link => LinkStore::revoke(&self.storage, &self.cache, &self.event_log, fid, ts_hash),
            StoreKind::Verification => {
                VerificationStore::revoke(&self.storage, &self.cache, &self.event_log, fid, ts_hash)
            }
            StoreKind::UserData => {
                UserDataStore::revoke(&self.storage, &self.cache, &self.event_log, fid, ts_hash)
            }
            StoreKind::UsernameProof => {
                UsernameProofStore::revoke(&self.storage, &self.cache, &self.event_log, fid, ts_hash)
            }
        }
    }

    pub fn get_all_messages_by_fid(&self, store: StoreKind, fid: Fid) -> Result<Vec<Message>> {
        match store {
            StoreKind::Cast => CastStore::get_all_messages_by_fid(&self.storage, fid),
            StoreKind::Reaction => ReactionStore::get_all_messages_by_fid(&self.storage, fid),
            StoreKind::Link => LinkStore::get_all_messages_by_fid(&self.storage, fid),
            StoreKind::Verification => VerificationStore::get_all_messages_by_fid(&self.storage, fid),
            StoreKind::UserData => UserDataStore::get_all_messages_by_fid(&self.storage, fid),
            StoreKind::UsernameProof => UsernameProofStore::get_all_messages_by_fid(&self.storage, fid),
        }
    }

    /// Look up a message by its sync-trie coordinates without knowing which
    /// of the six stores it belongs to: try each in turn. Not the cheapest
    /// possible lookup, but correct, and reconciliation fetches are rare
    /// relative to merges.
    pub fn get_message_by_ts_hash(&self, fid: Fid, ts_hash: &TsHash) -> Result<Option<Message>> {
        for store in StoreKind::all() {
            let key = key_codec::primary_key(fid, store, ts_hash);
            if let Some(bytes) = self.storage.get(&key).map_err(HubError::storage_failure)? {
                let message: Message = postcard::from_bytes(&bytes)
                    .map_err(|e| HubError::parse_failure(e.to_string()))?;
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    pub fn get_username_owner(&self, name: &str) -> Result<Option<Message>> {
        UsernameProofStore::get_owner(&self.storage, name)
    }

    // -------------------------------------------------------------------
    // On-chain events
    // -------------------------------------------------------------------

    /// Merge a chain-watcher-delivered event, publish it, and run whatever
    /// cascade it triggers (spec §4.4 on-chain cascades).
    pub fn submit_onchain_event(&self, event: OnChainEvent) -> Result<Option<HubEvent>> {
        let fid = event.fid;
        if OnChainEventStore::merge(&self.storage, &self.cache, &event)? == MergeOutcome::Duplicate
        {
            return Ok(None);
        }

        let hub_event = self.event_log.commit(
            WriteBatch::new(),
            HubEventBody::MergeOnChainEvent {
                event: Box::new(event.clone()),
            },
        )?;
        tracing::info!(%fid, event_id = hub_event.id, "merged on-chain event");
        self.apply_sync_trie_delta(&hub_event)?;

        match &event.body {
            OnChainEventBody::Signer(body) if body.event_type == SignerEventType::Remove => {
                let job_id = self
                    .job_queue
                    .enqueue_revoke_by_signer(fid, SignerKey::Ed25519(body.key))?;
                tracing::info!(%fid, job_id, "enqueued revoke-by-signer job for removed signer");
            }
            OnChainEventBody::IdRegister(body) if body.event_type == IdRegisterEventType::Transfer => {
                self.revoke_current_username(fid)?;
                if let Some(from) = body.from {
                    let job_id = self
                        .job_queue
                        .enqueue_revoke_by_signer(fid, SignerKey::EthAddress(from))?;
                    tracing::info!(%fid, job_id, "enqueued revoke-by-signer job for outgoing custody");
                }
            }
            _ => {}
        }

        Ok(Some(hub_event))
    }

    /// Revoke the fid's currently-held `UserDataAdd(Username)` message, if
    /// any, when its custody transfers (spec §4.4, scenario S4).
    fn revoke_current_username(&self, fid: Fid) -> Result<()> {
        let prefix = key_codec::body_key_index_prefix(
            fid,
            StoreKind::UserData,
            &[UserDataType::Username as u8],
        );
        let Some(row) = self
            .storage
            .scan_prefix(&prefix)
            .next()
            .transpose()
            .map_err(HubError::storage_failure)?
        else {
            return Ok(());
        };
        let (_, value) = row;
        let Some(ts_hash) = TsHash::from_bytes(&value) else {
            return Ok(());
        };
        if let Some(event) = UserDataStore::revoke(&self.storage, &self.cache, &self.event_log, fid, &ts_hash)? {
            tracing::info!(%fid, event_id = event.id, "revoked username on custody transfer");
            self.apply_sync_trie_delta(&event)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Signer-revocation background jobs
    // -------------------------------------------------------------------

    /// Process one `RevokeBySigner` job: delete every message across every
    /// store signed by `job.signer` under `job.fid` (spec §4.4 closing
    /// bullet).
    fn process_revoke_by_signer_job(&self, job: &RevokeBySignerJob) -> Result<()> {
        let signer_bytes = job.signer.to_index_bytes();
        for store in StoreKind::all() {
            let prefix = key_codec::by_signer_index_prefix(job.fid, store, &signer_bytes);
            let rows: Vec<(sled::IVec, sled::IVec)> = self
                .storage
                .scan_prefix(&prefix)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(HubError::storage_failure)?;
            for (_, value) in rows {
                let Some(ts_hash) = TsHash::from_bytes(&value) else {
                    continue;
                };
                if let Some(event) = self.revoke_in_store(store, job.fid, &ts_hash)? {
                    self.apply_sync_trie_delta(&event)?;
                }
            }
        }
        Ok(())
    }

    /// Drain pending `RevokeBySigner` jobs, one at a time, until the queue
    /// is empty or `should_continue` returns `false` (spec §5: background
    /// jobs are cancellable at each item boundary). A failing job is left
    /// on the queue for the next call to retry rather than discarded.
    pub fn run_revoke_jobs(&self, should_continue: impl Fn() -> bool) -> Result<usize> {
        let mut processed = 0;
        while should_continue() {
            let Some(queued) = self.job_queue.peek()? else {
                break;
            };
            match self.process_revoke_by_signer_job(&queued.job) {
                Ok(()) => {
                    self.job_queue.complete(queued.job_id)?;
                    processed += 1;
                    self.metrics.revoke_job_completed();
                    tracing::info!(job_id = queued.job_id, "completed revoke-by-signer job");
                }
                Err(error) => {
                    self.metrics.revoke_job_failed();
                    tracing::warn!(job_id = queued.job_id, %error, "revoke-by-signer job failed, will retry");
                    break;
                }
            }
        }
        Ok(processed)
    }

    pub fn pending_job_count(&self) -> Result<usize> {
        self.job_queue.len()
    }

    // -------------------------------------------------------------------
    // Sync trie
    // -------------------------------------------------------------------

    fn apply_sync_trie_delta(&self, event: &HubEvent) -> Result<()> {
        match &event.body {
            HubEventBody::MergeMessage { message, deleted } => {
                SyncTrie::insert(&self.storage, message_sync_id(message))?;
                for deleted_message in deleted {
                    SyncTrie::remove(&self.storage, message_sync_id(deleted_message))?;
                }
            }
            HubEventBody::PruneMessage { message } | HubEventBody::RevokeMessage { message } => {
                SyncTrie::remove(&self.storage, message_sync_id(message))?;
            }
            HubEventBody::MergeOnChainEvent { event } => {
                SyncTrie::insert(&self.storage, onchain_event_sync_id(event))?;
            }
            HubEventBody::MergeUsernameProof { message, deleted } => {
                SyncTrie::insert(&self.storage, message_sync_id(message))?;
                if let Some(deleted_message) = deleted {
                    SyncTrie::remove(&self.storage, message_sync_id(deleted_message))?;
                }
            }
        }
        Ok(())
    }

    pub fn sync_trie_root_hash(&self) -> Result<crate::sync_trie::NodeHash> {
        SyncTrie::root_hash(&self.storage)
    }

    pub fn sync_trie_children_hashes(
        &self,
        prefix: &[u8],
    ) -> Result<std::collections::HashMap<u8, crate::sync_trie::NodeHash>> {
        SyncTrie::children_hashes(&self.storage, prefix)
    }

    pub fn sync_trie_enumerate(&self, prefix: &[u8]) -> Result<Vec<SyncId>> {
        SyncTrie::enumerate(&self.storage, prefix)
    }

    /// Rebuild the sync trie from the message set and on-chain event log,
    /// discarding whatever is currently persisted (spec §3: the trie is a
    /// cache, always recoverable from the rows it indexes).
    pub fn rebuild_sync_trie(&self) -> Result<()> {
        let sync_ids = self.all_sync_ids()?;
        SyncTrie::rebuild(&self.storage, sync_ids)?;
        self.metrics.sync_trie_root_recomputed();
        Ok(())
    }

    fn all_sync_ids(&self) -> Result<Vec<SyncId>> {
        let mut out = Vec::new();

        let user_prefix = [key_codec::RootPrefix::User as u8];
        for row in self.storage.scan_prefix(user_prefix) {
            let (key, _) = row.map_err(HubError::storage_failure)?;
            if key.len() < 6 {
                continue;
            }
            let postfix = key[5];
            if postfix > 6 {
                continue; // secondary index row (body-key or by-signer tagged)
            }
            let fid = Fid(u32::from_be_bytes(key[1..5].try_into().unwrap()) as u64);
            if let Some(ts_hash) = TsHash::from_bytes(&key[6..]) {
                out.push(SyncId::new(&ts_hash, SyncIdType::Message, fid));
            }
        }

        let onchain_prefix = [key_codec::RootPrefix::OnChainEvent as u8];
        for row in self.storage.scan_prefix(onchain_prefix) {
            let (key, value) = row.map_err(HubError::storage_failure)?;
            // Primary event rows only; secondary indices are longer or carry
            // a 0xFD-0xFF marker byte immediately after the fid (see
            // storage_cache::rebuild_rent for the same discriminant).
            if key.len() != 18 {
                continue;
            }
            let event: OnChainEvent = postcard::from_bytes(&value)
                .map_err(|e| HubError::parse_failure(e.to_string()))?;
            out.push(onchain_event_sync_id(&event));
        }

        Ok(out)
    }
}

fn message_sync_id(message: &Message) -> SyncId {
    SyncId::new(&message.ts_hash(), SyncIdType::Message, message.fid())
}

/// Synthesizes a `SyncId` for an on-chain event, which carries neither a
/// `MessageHash` nor a Farcaster-epoch timestamp: the event's canonical
/// encoding stands in for the hash, and its block number (truncated to 32
/// bits) stands in for the timestamp, which is sufficient for the trie's
/// job of detecting whether two hubs hold the same event set.
fn onchain_event_sync_id(event: &OnChainEvent) -> SyncId {
    let hash = crypto::blake3_20(&hub_types::canonical_bytes(event).expect("event always encodes"));
    let ts_hash = TsHash::new(event.block_number as u32, hash);
    SyncId::new(&ts_hash, SyncIdType::OnChainEvent, event.fid)
}
