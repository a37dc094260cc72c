//! In-memory quota counters (spec §4.7).
//!
//! The only soft state in the engine: everything here is derivable from a
//! full sweep of the KV primary-row keyspace and the `StorageRent` event
//! stream, and is rebuilt unconditionally on start. Updates after start
//! are applied transactionally alongside the KV commit that caused them,
//! but the cache itself is never the source of truth.

use crate::key_codec::{self, StoreKind};
use crate::storage::Storage;
use hub_types::{Fid, OnChainEventBody, OnChainEventType, Result, TsHash};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Every fid gets this many storage units even with no on-chain
/// `StorageRent` events, matching the base allotment a freshly registered
/// identity is owed.
pub const FREE_STORAGE_UNITS: u32 = 1;

/// Default per-store message limit for a single storage unit.
pub fn default_store_limit(store: StoreKind) -> u32 {
    match store {
        StoreKind::Cast => 2_000,
        StoreKind::Reaction => 2_500,
        StoreKind::Link => 2_500,
        StoreKind::Verification => 50,
        StoreKind::UserData => 50,
        StoreKind::UsernameProof => 5,
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct CountEntry {
    count: u32,
    earliest: Option<TsHash>,
}

#[derive(Clone, Copy, Debug)]
struct RentAllotment {
    units: u32,
    expiry: u32,
}

pub struct StorageCache {
    counts: RwLock<HashMap<(u64, StoreKind), CountEntry>>,
    rent: RwLock<HashMap<u64, Vec<RentAllotment>>>,
}

impl StorageCache {
    /// Rebuild the cache from scratch by sweeping every primary row and
    /// every `StorageRent` event in `storage`.
    pub fn rebuild(storage: &Storage) -> Result<Self> {
        let cache = Self {
            counts: RwLock::new(HashMap::new()),
            rent: RwLock::new(HashMap::new()),
        };
        cache.rebuild_counts(storage)?;
        cache.rebuild_rent(storage)?;
        Ok(cache)
    }

    fn rebuild_counts(&self, storage: &Storage) -> Result<()> {
        let mut counts = self.counts.write();
        counts.clear();
        for store in StoreKind::all() {
            let prefix = vec![key_codec::RootPrefix::User as u8];
            for row in storage.scan_prefix(&prefix) {
                let (key, _) = row.map_err(|e| hub_types::HubError::storage_failure(e))?;
                if key.len() < 6 || key[5] != (store as u8) {
                    continue;
                }
                let fid = u32::from_be_bytes(key[1..5].try_into().unwrap()) as u64;
                let ts_hash = TsHash::from_bytes(&key[6..]);
                let entry = counts.entry((fid, store)).or_default();
                entry.count += 1;
                if let Some(ts_hash) = ts_hash {
                    entry.earliest = Some(match entry.earliest {
                        Some(current) if current <= ts_hash => current,
                        _ => ts_hash,
                    });
                }
            }
        }
        Ok(())
    }

    fn rebuild_rent(&self, storage: &Storage) -> Result<()> {
        let mut rent = self.rent.write();
        rent.clear();
        let prefix = vec![key_codec::RootPrefix::OnChainEvent as u8];
        for row in storage.scan_prefix(&prefix) {
            let (key, value) = row.map_err(|e| hub_types::HubError::storage_failure(e))?;
            // Primary event rows are exactly 18 bytes; secondary indices
            // (tx/signer/to-address) are longer or tagged with a 0xFD-0xFF
            // marker byte, so this also excludes them.
            if key.len() != 18 || key[5] != OnChainEventType::StorageRent as u8 {
                continue;
            }
            let event: hub_types::OnChainEvent = postcard::from_bytes(&value)
                .map_err(|e| hub_types::HubError::parse_failure(e.to_string()))?;
            if let OnChainEventBody::StorageRent(body) = event.body {
                rent.entry(event.fid.0).or_default().push(RentAllotment {
                    units: body.units,
                    expiry: body.expiry,
                });
            }
        }
        Ok(())
    }

    pub fn record_merge(&self, fid: Fid, store: StoreKind, ts_hash: TsHash) {
        let mut counts = self.counts.write();
        let entry = counts.entry((fid.0, store)).or_default();
        entry.count += 1;
        entry.earliest = Some(match entry.earliest {
            Some(current) if current <= ts_hash => current,
            _ => ts_hash,
        });
    }

    pub fn record_removal(&self, fid: Fid, store: StoreKind) {
        let mut counts = self.counts.write();
        if let Some(entry) = counts.get_mut(&(fid.0, store)) {
            entry.count = entry.count.saturating_sub(1);
        }
    }

    /// Recompute the earliest `TsHash` for `(fid, store)` from a fresh scan.
    /// Called after a prune/revoke removes the cached earliest row.
    pub fn refresh_earliest(&self, fid: Fid, store: StoreKind, storage: &Storage) -> Result<()> {
        let prefix = key_codec::primary_prefix(fid, store);
        let earliest = storage
            .scan_prefix(&prefix)
            .next()
            .transpose()
            .map_err(hub_types::HubError::storage_failure)?
            .and_then(|(key, _)| TsHash::from_bytes(&key[prefix.len()..]));
        let mut counts = self.counts.write();
        let entry = counts.entry((fid.0, store)).or_default();
        entry.earliest = earliest;
        Ok(())
    }

    pub fn count(&self, fid: Fid, store: StoreKind) -> u32 {
        self.counts
            .read()
            .get(&(fid.0, store))
            .map(|e| e.count)
            .unwrap_or(0)
    }

    pub fn earliest(&self, fid: Fid, store: StoreKind) -> Option<TsHash> {
        self.counts.read().get(&(fid.0, store)).and_then(|e| e.earliest)
    }

    pub fn add_rent(&self, fid: Fid, units: u32, expiry: u32) {
        self.rent
            .write()
            .entry(fid.0)
            .or_default()
            .push(RentAllotment { units, expiry });
    }

    /// Total non-expired storage units for `fid` as of `now`.
    pub fn units(&self, fid: Fid, now: u32) -> u32 {
        let purchased: u32 = self
            .rent
            .read()
            .get(&fid.0)
            .map(|allotments| {
                allotments
                    .iter()
                    .filter(|a| a.expiry > now)
                    .map(|a| a.units)
                    .sum()
            })
            .unwrap_or(0);
        purchased + FREE_STORAGE_UNITS
    }

    /// The effective message limit for `(fid, store)` at `now`.
    pub fn limit(&self, fid: Fid, store: StoreKind, now: u32) -> u32 {
        default_store_limit(store) * self.units(fid, now)
    }

    pub fn is_full(&self, fid: Fid, store: StoreKind, now: u32) -> bool {
        self.count(fid, store) >= self.limit(fid, store, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fresh_cache_reports_zero_counts_and_free_tier_units() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let cache = StorageCache::rebuild(&storage).unwrap();

        assert_eq!(cache.count(Fid(1), StoreKind::Cast), 0);
        assert_eq!(cache.units(Fid(1), 0), FREE_STORAGE_UNITS);
        assert_eq!(
            cache.limit(Fid(1), StoreKind::Cast, 0),
            default_store_limit(StoreKind::Cast)
        );
    }

    #[test]
    fn record_merge_and_removal_track_count() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let cache = StorageCache::rebuild(&storage).unwrap();

        let ts_hash = TsHash::new(10, [1u8; 20]);
        cache.record_merge(Fid(1), StoreKind::Cast, ts_hash);
        assert_eq!(cache.count(Fid(1), StoreKind::Cast), 1);
        assert_eq!(cache.earliest(Fid(1), StoreKind::Cast), Some(ts_hash));

        cache.record_removal(Fid(1), StoreKind::Cast);
        assert_eq!(cache.count(Fid(1), StoreKind::Cast), 0);
    }

    #[test]
    fn expired_rent_does_not_count_toward_units() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let cache = StorageCache::rebuild(&storage).unwrap();

        cache.add_rent(Fid(1), 5, 100);
        assert_eq!(cache.units(Fid(1), 50), 5 + FREE_STORAGE_UNITS);
        assert_eq!(cache.units(Fid(1), 200), FREE_STORAGE_UNITS);
    }
}
