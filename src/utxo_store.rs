//! Keyed UTXO lookup backed by a shard index and a spatial index.

use std::collections::HashMap;

use crate::error::ChainError;
use crate::spatial_index::SpatialIndex;
use crate::utxo::Utxo;

/// In-memory implementation of the UTXO storage collaborator described in
/// the core's external interfaces: `get_utxo`, `add_utxo`, `remove_utxo`,
/// plus shard and spatial queries used by validation and wallets alike.
pub struct UtxoStore {
    by_id: HashMap<String, Utxo>,
    by_shard: HashMap<u32, Vec<String>>,
    spatial: SpatialIndex,
}

impl UtxoStore {
    pub fn new(spatial_grid_size: f64) -> Self {
        UtxoStore {
            by_id: HashMap::new(),
            by_shard: HashMap::new(),
            spatial: SpatialIndex::new(spatial_grid_size),
        }
    }

    pub fn get_utxo(&self, id: &str) -> Option<&Utxo> {
        self.by_id.get(id)
    }

    /// Rejects duplicate ids. A failure leaves the store unchanged: the
    /// duplicate check happens before any sub-index is touched.
    pub fn add_utxo(&mut self, utxo: Utxo) -> Result<(), ChainError> {
        let id = utxo.id().to_string();
        if self.by_id.contains_key(&id) {
            return Err(ChainError::DuplicateUtxo(id));
        }
        let shard = utxo.shard_affinity();
        let point = utxo.coordinate.cartesian();

        self.by_id.insert(id.clone(), utxo);
        self.by_shard.entry(shard).or_default().push(id.clone());
        self.spatial.insert(id, point);
        Ok(())
    }

    /// Rejects unknown ids.
    pub fn remove_utxo(&mut self, id: &str) -> Result<Utxo, ChainError> {
        let utxo = self
            .by_id
            .remove(id)
            .ok_or_else(|| ChainError::UnknownUtxo(id.to_string()))?;

        let shard = utxo.shard_affinity();
        if let Some(ids) = self.by_shard.get_mut(&shard) {
            ids.retain(|existing| existing != id);
            if ids.is_empty() {
                self.by_shard.remove(&shard);
            }
        }
        // The spatial index was populated at insertion time alongside by_id,
        // so removal here cannot fail with UnknownUtxo under normal use.
        let _ = self.spatial.remove(id);
        Ok(utxo)
    }

    pub fn utxos_by_shard(&self, shard_id: u32) -> Vec<&Utxo> {
        self.by_shard
            .get(&shard_id)
            .map(|ids| ids.iter().filter_map(|id| self.by_id.get(id)).collect())
            .unwrap_or_default()
    }

    /// Spatial neighbors of `id`, excluding `id` itself.
    pub fn spatial_neighbors(&self, id: &str, radius: f64) -> Vec<&Utxo> {
        let Some(utxo) = self.by_id.get(id) else {
            return Vec::new();
        };
        let center = utxo.coordinate.cartesian();
        self.spatial
            .query_range(center, radius)
            .into_iter()
            .filter(|candidate| candidate != id)
            .filter_map(|candidate| self.by_id.get(&candidate))
            .collect()
    }

    pub fn total_balance(&self) -> f64 {
        self.by_id.values().map(|u| u.amount).sum()
    }

    pub fn balance_by_shard(&self, shard_id: u32) -> f64 {
        self.utxos_by_shard(shard_id).iter().map(|u| u.amount).sum()
    }

    pub fn all_utxos(&self) -> impl Iterator<Item = &Utxo> {
        self.by_id.values()
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_shard.clear();
        self.spatial.clear();
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinate::Coordinate;
    use crate::utxo::Script;

    fn utxo(owner: &str, shard: u8, amount: f64) -> Utxo {
        let coord = Coordinate::new(1, vec![shard]).unwrap();
        Utxo::new(owner.into(), amount, coord, 0, Script::CheckSig, None, None).unwrap()
    }

    #[test]
    fn add_then_get() {
        let mut store = UtxoStore::new(0.1);
        let u = utxo("alice", 0, 10.0);
        let id = u.id().to_string();
        store.add_utxo(u).unwrap();
        assert!(store.get_utxo(&id).is_some());
    }

    #[test]
    fn rejects_duplicate_add() {
        let mut store = UtxoStore::new(0.1);
        let u = utxo("alice", 0, 10.0);
        store.add_utxo(u.clone()).unwrap();
        assert!(store.add_utxo(u).is_err());
    }

    #[test]
    fn rejects_unknown_remove() {
        let mut store = UtxoStore::new(0.1);
        assert!(store.remove_utxo("nope").is_err());
    }

    #[test]
    fn shard_index_tracks_membership() {
        let mut store = UtxoStore::new(0.1);
        store.add_utxo(utxo("alice", 1, 5.0)).unwrap();
        store.add_utxo(utxo("bob", 2, 7.0)).unwrap();
        assert_eq!(store.utxos_by_shard(1).len(), 1);
        assert_eq!(store.balance_by_shard(2), 7.0);
    }

    #[test]
    fn total_balance_sums_all_utxos() {
        let mut store = UtxoStore::new(0.1);
        store.add_utxo(utxo("alice", 0, 3.0)).unwrap();
        store.add_utxo(utxo("bob", 1, 4.0)).unwrap();
        assert_eq!(store.total_balance(), 7.0);
    }
}
