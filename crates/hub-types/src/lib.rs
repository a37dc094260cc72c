//! Core data model, canonical encoding, and cryptographic primitives for
//! the Hub state engine.
//!
//! This crate has no storage or networking dependencies: it defines the
//! wire-shaped types (`Message`, `OnChainEvent`, `HubEvent`, `SyncId`), the
//! canonical byte encoding used for hashing and signing, and the hash/
//! signature primitives built on top of it. `hub-store` builds the engine
//! on these types; `hub-net` builds the wire framing on them.

pub mod canonical;
pub mod crypto;
pub mod error;
pub mod types;

pub use canonical::canonical_bytes;
pub use error::{ErrorKind, HubError, Result};
pub use types::*;
