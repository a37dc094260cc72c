//! Canonical encoding for hashing and signing.
//!
//! All hashed/signed objects use postcard serialization: field order is
//! Rust struct field order, and nothing here is normalized after the fact —
//! producers are expected to construct already-normalized values.

use crate::error::{HubError, Result};
use serde::Serialize;

/// Serialize a value to canonical bytes using postcard.
///
/// This is the normative encoding for all hashing and signing operations;
/// any reimplementation must produce identical bytes for identical values.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    postcard::to_allocvec(value)
        .map_err(|e| HubError::parse_failure(format!("canonical encoding failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;

    #[test]
    fn canonical_bytes_deterministic() {
        let body = CastAddBody {
            text: "gm".into(),
            mentions: vec![Fid(1)],
            mentions_positions: vec![0],
            parent: None,
            embeds: vec![],
        };
        let b1 = canonical_bytes(&body).unwrap();
        let b2 = canonical_bytes(&body).unwrap();
        assert_eq!(b1, b2);
    }

    #[test]
    fn canonical_bytes_differ_on_content() {
        let a = CastRemoveBody { target_hash: [1u8; 20] };
        let b = CastRemoveBody { target_hash: [2u8; 20] };
        assert_ne!(canonical_bytes(&a).unwrap(), canonical_bytes(&b).unwrap());
    }
}
