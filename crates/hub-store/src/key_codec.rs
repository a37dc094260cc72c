//! Canonical KV key layout (spec §4.1).
//!
//! Every key the engine writes begins with a one-byte [`RootPrefix`]. Primary
//! message rows live under `User`; each typed store additionally maintains a
//! body-key secondary index and a by-signer secondary index under the same
//! prefix, distinguished by a postfix byte. Nothing here touches sled
//! directly — this module only knows how to turn logical coordinates into
//! byte strings and back.

use hub_types::{Fid, Hash20, MessageType, TsHash};

/// Top-level discriminator for every row the engine owns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RootPrefix {
    User = 1,
    OnChainEvent = 2,
    SyncTrieNode = 3,
    HubEvent = 4,
    JobQueue = 5,
}

/// One of the six CRDT-managed message families. Distinct from
/// [`MessageType`] because Add/Remove pairs share a store and a postfix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StoreKind {
    Cast = 1,
    Reaction = 2,
    Link = 3,
    Verification = 4,
    UserData = 5,
    UsernameProof = 6,
}

impl StoreKind {
    pub fn from_message_type(message_type: MessageType) -> Self {
        match message_type {
            MessageType::CastAdd | MessageType::CastRemove => StoreKind::Cast,
            MessageType::ReactionAdd | MessageType::ReactionRemove => StoreKind::Reaction,
            MessageType::LinkAdd | MessageType::LinkRemove | MessageType::LinkCompactState => {
                StoreKind::Link
            }
            MessageType::VerificationAdd | MessageType::VerificationRemove => {
                StoreKind::Verification
            }
            MessageType::UserDataAdd => StoreKind::UserData,
            MessageType::UsernameProof => StoreKind::UsernameProof,
        }
    }

    pub fn all() -> [StoreKind; 6] {
        [
            StoreKind::Cast,
            StoreKind::Reaction,
            StoreKind::Link,
            StoreKind::Verification,
            StoreKind::UserData,
            StoreKind::UsernameProof,
        ]
    }

    /// Primary-row postfix. Secondary indices reuse this value with a tag
    /// bit set so the three key families never collide.
    fn primary_postfix(self) -> u8 {
        self as u8
    }

    fn body_key_postfix(self) -> u8 {
        self.primary_postfix() | 0x80
    }

    fn by_signer_postfix(self) -> u8 {
        self.primary_postfix() | 0x40
    }
}

/// Fixed declared width of each store's body-key, per spec §4.1.
pub mod body_key_width {
    pub const CAST: usize = 20;
    pub const REACTION: usize = 21; // 1-byte type ‖ 20-byte target key
    pub const LINK: usize = 12; // 8-byte padded type ‖ 4-byte BE target fid
    pub const VERIFICATION: usize = 20;
    pub const USER_DATA: usize = 1;
    pub const USERNAME_PROOF: usize = 20;
}

fn key_prefix(fid: Fid, postfix: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 4 + 1);
    out.push(RootPrefix::User as u8);
    out.extend_from_slice(&(fid.0 as u32).to_be_bytes());
    out.push(postfix);
    out
}

/// `[User] ‖ fid(4 BE) ‖ postfix(1) ‖ tsHash(24)` — the canonical message row.
pub fn primary_key(fid: Fid, store: StoreKind, ts_hash: &TsHash) -> Vec<u8> {
    let mut out = key_prefix(fid, store.primary_postfix());
    out.extend_from_slice(&ts_hash.to_bytes());
    out
}

/// Prefix shared by every primary row for `(fid, store)`; used for range
/// scans (`getAllMessagesByFid`, quota sweeps).
pub fn primary_prefix(fid: Fid, store: StoreKind) -> Vec<u8> {
    key_prefix(fid, store.primary_postfix())
}

/// `[User] ‖ fid ‖ postfix|0x80 ‖ body-key ‖ tsHash(24)` — the canonical,
/// fixed-width body-key secondary index used to detect LWW conflicts.
pub fn body_key_index(fid: Fid, store: StoreKind, body_key: &[u8], ts_hash: &TsHash) -> Vec<u8> {
    let mut out = key_prefix(fid, store.body_key_postfix());
    out.extend_from_slice(body_key);
    out.extend_from_slice(&ts_hash.to_bytes());
    out
}

/// Prefix identifying all rows for one `(fid, store, body-key)` — exactly
/// zero or one row should ever match, but reads tolerate stray legacy rows
/// (§9) by scanning rather than point-getting.
pub fn body_key_index_prefix(fid: Fid, store: StoreKind, body_key: &[u8]) -> Vec<u8> {
    let mut out = key_prefix(fid, store.body_key_postfix());
    out.extend_from_slice(body_key);
    out
}

/// Legacy (pre-fix) body-key index prefix for link rows: same coordinates
/// but the link-type component is the raw, unpadded UTF-8 bytes instead of
/// zero-padded to 8 bytes (§9 "secondary-index padding bug").
pub fn legacy_link_body_key_index_prefix(fid: Fid, link_type: &str, target_fid: Fid) -> Vec<u8> {
    let mut out = key_prefix(fid, StoreKind::Link.body_key_postfix());
    out.extend_from_slice(link_type.as_bytes());
    out.extend_from_slice(&(target_fid.0 as u32).to_be_bytes());
    out
}

/// `[User] ‖ fid ‖ postfix|0x40 ‖ signer(33) ‖ tsHash(24)` — indexes every
/// message by the key that signed it, for `RevokeBySigner`.
pub fn by_signer_index(fid: Fid, store: StoreKind, signer: &[u8; 33], ts_hash: &TsHash) -> Vec<u8> {
    let mut out = key_prefix(fid, store.by_signer_postfix());
    out.extend_from_slice(signer);
    out.extend_from_slice(&ts_hash.to_bytes());
    out
}

pub fn by_signer_index_prefix(fid: Fid, store: StoreKind, signer: &[u8; 33]) -> Vec<u8> {
    let mut out = key_prefix(fid, store.by_signer_postfix());
    out.extend_from_slice(signer);
    out
}

/// Pads (or truncates) a link-type string to the canonical 8-byte width.
pub fn pad_link_type(link_type: &str) -> [u8; 8] {
    let mut out = [0u8; 8];
    let bytes = link_type.as_bytes();
    let n = bytes.len().min(8);
    out[0..n].copy_from_slice(&bytes[0..n]);
    out
}

/// Pads (or truncates) a username to the canonical 20-byte width.
pub fn pad_username(name: &str) -> [u8; 20] {
    let mut out = [0u8; 20];
    let bytes = name.as_bytes();
    let n = bytes.len().min(20);
    out[0..n].copy_from_slice(&bytes[0..n]);
    out
}

/// `[User] ‖ fid=0 ‖ UsernameProof.body_key_postfix ‖ paddedName(20)` — the
/// one reserved slot tracking which real fid currently owns a name, since a
/// username can only ever be claimed by one fid at a time regardless of how
/// many fids' stores hold a (possibly stale) proof for it. Fid 0 is never a
/// valid registered identity, so this can never collide with a real fid's
/// own rows.
pub fn username_global_owner_key(padded_name: &[u8; 20]) -> Vec<u8> {
    let mut out = key_prefix(Fid(0), StoreKind::UsernameProof.body_key_postfix());
    out.extend_from_slice(padded_name);
    out
}

/// `[OnChainEvent] ‖ fid(4 BE) ‖ type(1) ‖ blockNumber(8 BE) ‖ logIndex(4 BE)`.
pub fn onchain_event_key(
    fid: Fid,
    event_type: hub_types::OnChainEventType,
    block_number: u64,
    log_index: u32,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 4 + 1 + 8 + 4);
    out.push(RootPrefix::OnChainEvent as u8);
    out.extend_from_slice(&(fid.0 as u32).to_be_bytes());
    out.push(event_type as u8);
    out.extend_from_slice(&block_number.to_be_bytes());
    out.extend_from_slice(&log_index.to_be_bytes());
    out
}

pub fn onchain_event_prefix(fid: Fid, event_type: hub_types::OnChainEventType) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 4 + 1);
    out.push(RootPrefix::OnChainEvent as u8);
    out.extend_from_slice(&(fid.0 as u32).to_be_bytes());
    out.push(event_type as u8);
    out
}

/// `[OnChainEvent] ‖ 0xFF ‖ transactionHash(32) ‖ logIndex(4 BE)` — dedup index.
pub fn onchain_event_tx_index(transaction_hash: &[u8; 32], log_index: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 1 + 32 + 4);
    out.push(RootPrefix::OnChainEvent as u8);
    out.push(0xFF);
    out.extend_from_slice(transaction_hash);
    out.extend_from_slice(&log_index.to_be_bytes());
    out
}

/// `[OnChainEvent] ‖ 0xFE ‖ signerKey(32)` — by-signer index for Signer events.
pub fn onchain_signer_index_prefix(key: &[u8; 32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 1 + 32);
    out.push(RootPrefix::OnChainEvent as u8);
    out.push(0xFE);
    out.extend_from_slice(key);
    out
}

/// `[OnChainEvent] ‖ 0xFD ‖ toAddress(20)` — by-address index for IdRegister events.
pub fn onchain_to_address_index_prefix(to: &Hash20) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 1 + 20);
    out.push(RootPrefix::OnChainEvent as u8);
    out.push(0xFD);
    out.extend_from_slice(to);
    out
}

/// `[SyncTrieNode] ‖ prefix-bytes` — a trie node keyed by its SyncId prefix.
pub fn sync_trie_node_key(prefix: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + prefix.len());
    out.push(RootPrefix::SyncTrieNode as u8);
    out.extend_from_slice(prefix);
    out
}

/// `[HubEvent] ‖ id(8 BE)` — the append-only event log.
pub fn hub_event_key(id: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 8);
    out.push(RootPrefix::HubEvent as u8);
    out.extend_from_slice(&id.to_be_bytes());
    out
}

pub fn hub_event_prefix() -> Vec<u8> {
    vec![RootPrefix::HubEvent as u8]
}

/// `[JobQueue] ‖ kind(1) ‖ jobId(8 BE)` — durable revoke/backfill job rows.
pub fn job_queue_key(kind: u8, job_id: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 1 + 8);
    out.push(RootPrefix::JobQueue as u8);
    out.push(kind);
    out.extend_from_slice(&job_id.to_be_bytes());
    out
}

pub fn job_queue_prefix(kind: u8) -> Vec<u8> {
    vec![RootPrefix::JobQueue as u8, kind]
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_types::Fid;

    #[test]
    fn primary_key_starts_with_its_own_prefix() {
        let ts_hash = TsHash::new(100, [9u8; 20]);
        let key = primary_key(Fid(7), StoreKind::Cast, &ts_hash);
        assert!(key.starts_with(&primary_prefix(Fid(7), StoreKind::Cast)));
        assert_eq!(key.len(), 1 + 4 + 1 + TsHash::LEN);
    }

    #[test]
    fn store_kind_roundtrips_through_message_type() {
        assert_eq!(
            StoreKind::from_message_type(MessageType::CastAdd),
            StoreKind::Cast
        );
        assert_eq!(
            StoreKind::from_message_type(MessageType::CastRemove),
            StoreKind::Cast
        );
        assert_eq!(
            StoreKind::from_message_type(MessageType::LinkCompactState),
            StoreKind::Link
        );
    }

    #[test]
    fn link_type_padding_is_zero_right_padded() {
        let padded = pad_link_type("follow");
        assert_eq!(&padded[0..6], b"follow");
        assert_eq!(&padded[6..8], &[0, 0]);
    }

    #[test]
    fn body_key_index_and_by_signer_index_never_collide_with_primary() {
        let ts_hash = TsHash::new(1, [1u8; 20]);
        let primary = primary_key(Fid(1), StoreKind::Link, &ts_hash);
        let body = body_key_index(Fid(1), StoreKind::Link, &[0u8; body_key_width::LINK], &ts_hash);
        let signer = by_signer_index(Fid(1), StoreKind::Link, &[0u8; 33], &ts_hash);
        assert_ne!(primary[2], body[2]);
        assert_ne!(primary[2], signer[2]);
        assert_ne!(body[2], signer[2]);
    }
}
