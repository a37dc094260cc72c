//! Core data model for the Hub state engine (spec §3).
//!
//! All types here are designed for deterministic serialization via postcard:
//! field order is significant for hashing and is never reordered across a
//! release without a domain-separation bump.

use serde::{Deserialize, Serialize};

/// 20-byte fixed-size array: a truncated BLAKE3 digest, or an EVM address.
pub type Hash20 = [u8; 20];
/// 32-byte fixed-size array: an ed25519 public key, or a full-width hash.
pub type Bytes32 = [u8; 32];

/// Farcaster epoch: 2021-01-01T00:00:00Z, expressed in Unix seconds.
///
/// Message timestamps are seconds since this epoch, fitting in 4 bytes for
/// the next ~136 years.
pub const FARCASTER_EPOCH_UNIX_SECONDS: u64 = 1_609_459_200;

/// Identity issued on-chain. Identifies one logical user.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fid(pub u64);

impl Fid {
    pub fn new(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Fid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The network a message or event was produced for. Hubs reject any
/// message whose declared network does not match their own configuration.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum FarcasterNetwork {
    Mainnet = 1,
    Testnet = 2,
    Devnet = 3,
}

// =============================================================================
// TsHash / SyncId — ordering and sync-trie keys
// =============================================================================

/// Composite sort key: Farcaster-epoch seconds (4 bytes BE) ‖ MessageHash (20 bytes).
///
/// This is the primary ordering key for every message and the suffix of
/// every KV row the engine writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TsHash {
    pub timestamp: u32,
    pub hash: Hash20,
}

impl TsHash {
    pub const LEN: usize = 24;

    pub fn new(timestamp: u32, hash: Hash20) -> Self {
        Self { timestamp, hash }
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0..4].copy_from_slice(&self.timestamp.to_be_bytes());
        out[4..24].copy_from_slice(&self.hash);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::LEN {
            return None;
        }
        let timestamp = u32::from_be_bytes(bytes[0..4].try_into().ok()?);
        let hash: Hash20 = bytes[4..24].try_into().ok()?;
        Some(Self { timestamp, hash })
    }
}

/// Type tag embedded in a [`SyncId`], distinguishing messages from on-chain
/// events so the trie can be enumerated and diffed uniformly.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum SyncIdType {
    Message = 1,
    OnChainEvent = 2,
    FnameTransfer = 3,
}

/// Fixed-layout identifier used by the Merkle sync trie (spec §3, §4.5).
///
/// Layout: 10 bytes of TsHash prefix (4-byte timestamp ‖ first 6 hash bytes)
/// ‖ 1-byte type tag ‖ 4-byte fid (BE) ‖ 20-byte full hash = 35 bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SyncId {
    pub ts_hash_prefix: [u8; 10],
    pub type_tag: u8,
    pub fid: u32,
    pub hash: Hash20,
}

impl SyncId {
    pub const LEN: usize = 35;

    pub fn new(ts_hash: &TsHash, kind: SyncIdType, fid: Fid) -> Self {
        let mut prefix = [0u8; 10];
        prefix[0..4].copy_from_slice(&ts_hash.timestamp.to_be_bytes());
        prefix[4..10].copy_from_slice(&ts_hash.hash[0..6]);
        Self {
            ts_hash_prefix: prefix,
            type_tag: kind as u8,
            fid: fid.0 as u32,
            hash: ts_hash.hash,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0..10].copy_from_slice(&self.ts_hash_prefix);
        out[10] = self.type_tag;
        out[11..15].copy_from_slice(&self.fid.to_be_bytes());
        out[15..35].copy_from_slice(&self.hash);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::LEN {
            return None;
        }
        let mut prefix = [0u8; 10];
        prefix.copy_from_slice(&bytes[0..10]);
        let type_tag = bytes[10];
        let fid = u32::from_be_bytes(bytes[11..15].try_into().ok()?);
        let hash: Hash20 = bytes[15..35].try_into().ok()?;
        Some(Self {
            ts_hash_prefix: prefix,
            type_tag,
            fid,
            hash,
        })
    }
}

// =============================================================================
// MESSAGES
// =============================================================================

/// Message family discriminant (spec §3).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum MessageType {
    CastAdd = 1,
    CastRemove = 2,
    ReactionAdd = 3,
    ReactionRemove = 4,
    LinkAdd = 5,
    LinkRemove = 6,
    LinkCompactState = 7,
    VerificationAdd = 8,
    VerificationRemove = 9,
    UserDataAdd = 10,
    UsernameProof = 11,
}

impl MessageType {
    /// ADD variants outrank REMOVE variants at equal (timestamp, hash) per
    /// the LWW tie-break in spec §4.3.
    pub fn is_add(self) -> bool {
        !matches!(
            self,
            MessageType::CastRemove
                | MessageType::ReactionRemove
                | MessageType::LinkRemove
                | MessageType::VerificationRemove
        )
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum HashScheme {
    Blake3 = 1,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum SignatureScheme {
    Ed25519 = 1,
    Eip712 = 2,
}

/// A message signer: either a delegated ed25519 key, or (for the Signer
/// family only) the fid's custody address.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SignerKey {
    Ed25519(Bytes32),
    EthAddress(Hash20),
}

impl SignerKey {
    /// Fixed-width byte form used in by-signer secondary index keys: the
    /// two variants are tagged so neither can collide with the other.
    pub fn to_index_bytes(&self) -> [u8; 33] {
        let mut out = [0u8; 33];
        match self {
            SignerKey::Ed25519(k) => {
                out[0] = 1;
                out[1..33].copy_from_slice(k);
            }
            SignerKey::EthAddress(a) => {
                out[0] = 2;
                out[13..33].copy_from_slice(a);
            }
        }
        out
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum ReactionType {
    Like = 1,
    Recast = 2,
}

/// Target of a cast or reaction: either another cast, or a URL.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageTarget {
    Cast { fid: Fid, hash: Hash20 },
    Url(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CastAddBody {
    pub text: String,
    pub mentions: Vec<Fid>,
    pub mentions_positions: Vec<u32>,
    pub parent: Option<MessageTarget>,
    pub embeds: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CastRemoveBody {
    pub target_hash: Hash20,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionBody {
    pub reaction_type: ReactionType,
    pub target: MessageTarget,
}

/// Link type strings are ASCII and declared-width ≤8 bytes (spec §4.1/§4.2).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkBody {
    pub link_type: String,
    pub target_fid: Fid,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkCompactStateBody {
    pub link_type: String,
    pub target_fids: Vec<Fid>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum VerificationProtocol {
    Ethereum = 0,
    Solana = 1,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationAddBody {
    pub address: Hash20,
    pub claim_signature: Vec<u8>,
    pub block_hash: Bytes32,
    pub protocol: VerificationProtocol,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationRemoveBody {
    pub address: Hash20,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum UserDataType {
    Pfp = 1,
    Display = 2,
    Bio = 3,
    Url = 4,
    Username = 5,
    Location = 6,
    Banner = 7,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserDataAddBody {
    pub data_type: UserDataType,
    pub value: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsernameProofBody {
    pub name: String,
    pub owner: Hash20,
    pub timestamp: u64,
    /// EIP-712 signature over the proof claim, by `owner`.
    pub signature: Vec<u8>,
    pub fid: Fid,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageBody {
    CastAdd(CastAddBody),
    CastRemove(CastRemoveBody),
    ReactionAdd(ReactionBody),
    ReactionRemove(ReactionBody),
    LinkAdd(LinkBody),
    LinkRemove(LinkBody),
    LinkCompactState(LinkCompactStateBody),
    VerificationAdd(VerificationAddBody),
    VerificationRemove(VerificationRemoveBody),
    UserDataAdd(UserDataAddBody),
    UsernameProof(UsernameProofBody),
}

impl MessageBody {
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageBody::CastAdd(_) => MessageType::CastAdd,
            MessageBody::CastRemove(_) => MessageType::CastRemove,
            MessageBody::ReactionAdd(_) => MessageType::ReactionAdd,
            MessageBody::ReactionRemove(_) => MessageType::ReactionRemove,
            MessageBody::LinkAdd(_) => MessageType::LinkAdd,
            MessageBody::LinkRemove(_) => MessageType::LinkRemove,
            MessageBody::LinkCompactState(_) => MessageType::LinkCompactState,
            MessageBody::VerificationAdd(_) => MessageType::VerificationAdd,
            MessageBody::VerificationRemove(_) => MessageType::VerificationRemove,
            MessageBody::UserDataAdd(_) => MessageType::UserDataAdd,
            MessageBody::UsernameProof(_) => MessageType::UsernameProof,
        }
    }
}

/// The envelope that gets canonically encoded and hashed to produce
/// `Message::hash` (spec §3 invariants).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageData {
    pub fid: Fid,
    pub network: FarcasterNetwork,
    /// Seconds since [`FARCASTER_EPOCH_UNIX_SECONDS`].
    pub timestamp: u32,
    pub body: MessageBody,
}

/// A fully signed Hub message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub data: MessageData,
    pub hash: Hash20,
    pub hash_scheme: HashScheme,
    pub signer: SignerKey,
    pub signature: Vec<u8>,
    pub signature_scheme: SignatureScheme,
}

impl Message {
    pub fn fid(&self) -> Fid {
        self.data.fid
    }

    pub fn message_type(&self) -> MessageType {
        self.data.body.message_type()
    }

    pub fn ts_hash(&self) -> TsHash {
        TsHash::new(self.data.timestamp, self.hash)
    }
}

// =============================================================================
// ON-CHAIN EVENTS
// =============================================================================

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum OnChainEventType {
    IdRegister = 1,
    Signer = 2,
    StorageRent = 3,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum IdRegisterEventType {
    Register = 1,
    Transfer = 2,
    ChangeRecovery = 3,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdRegisterEventBody {
    pub event_type: IdRegisterEventType,
    pub to: Hash20,
    pub from: Option<Hash20>,
    pub recovery_address: Hash20,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum SignerEventType {
    Add = 1,
    Remove = 2,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignerEventBody {
    pub event_type: SignerEventType,
    pub key: Bytes32,
    pub key_type: u32,
    pub metadata: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageRentEventBody {
    pub payer: Hash20,
    pub units: u32,
    /// Unix seconds at which this allotment's units stop counting toward quota.
    pub expiry: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum OnChainEventBody {
    IdRegister(IdRegisterEventBody),
    Signer(SignerEventBody),
    StorageRent(StorageRentEventBody),
}

impl OnChainEventBody {
    pub fn event_type(&self) -> OnChainEventType {
        match self {
            OnChainEventBody::IdRegister(_) => OnChainEventType::IdRegister,
            OnChainEventBody::Signer(_) => OnChainEventType::Signer,
            OnChainEventBody::StorageRent(_) => OnChainEventType::StorageRent,
        }
    }
}

/// An event ingested from the chain watcher (spec §3). Strictly ordered per
/// fid by `(block_number, log_index)`; immutable once accepted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OnChainEvent {
    pub fid: Fid,
    pub block_number: u64,
    pub block_hash: Bytes32,
    pub transaction_hash: Bytes32,
    pub log_index: u32,
    pub body: OnChainEventBody,
}

impl OnChainEvent {
    pub fn event_type(&self) -> OnChainEventType {
        self.body.event_type()
    }
}

// =============================================================================
// HUB EVENTS (spec §6 event stream)
// =============================================================================

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum HubEventBody {
    MergeMessage {
        message: Box<Message>,
        deleted: Vec<Message>,
    },
    PruneMessage {
        message: Box<Message>,
    },
    RevokeMessage {
        message: Box<Message>,
    },
    MergeOnChainEvent {
        event: Box<OnChainEvent>,
    },
    MergeUsernameProof {
        message: Box<Message>,
        deleted: Option<Box<Message>>,
    },
}

/// Ordered by monotonically increasing `id`, assigned by the event handler
/// as each mutation commits (spec §5 ordering guarantees).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HubEvent {
    pub id: u64,
    pub body: HubEventBody,
}
