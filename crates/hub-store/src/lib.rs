//! hub-store - CRDT message stores, on-chain event ingestion, and the
//! Merkle sync trie behind a Farcaster-style hub's state engine.
//!
//! This crate provides:
//! - Typed last-write-wins stores for casts, reactions, links,
//!   verifications, user data, and username proofs
//! - On-chain event ingestion (id registration, signer changes, storage
//!   rent) with signer-revocation cascades
//! - Storage-unit accounting and quota-based pruning
//! - A path-compressed Merkle trie for peer reconciliation
//! - [`Engine`], the single entry point enforcing cross-store rules

pub mod config;
pub mod engine;
pub mod event_log;
pub mod job_queue;
pub mod key_codec;
pub mod metrics;
pub mod onchain_store;
pub mod storage;
pub mod storage_cache;
pub mod stores;
pub mod sync_trie;
pub mod validator;

pub use config::Config;
pub use engine::Engine;
pub use event_log::EventLog;
pub use key_codec::{RootPrefix, StoreKind};
pub use metrics::Metrics;
pub use storage::Storage;
