//! Pending-transaction pool with fee-rate admission and eviction.

use std::collections::{HashMap, HashSet};

use crate::error::ChainError;
use crate::transaction::{MempoolView, Transaction};
use crate::utxo::SignatureVerifier;
use crate::utxo_store::UtxoStore;

pub const DEFAULT_MAX_SIZE: usize = 50_000;
pub const DEFAULT_MIN_FEE_PER_BYTE: f64 = 1e-5;

struct Entry {
    tx: Transaction,
    fee: f64,
    fee_per_byte: f64,
    inserted_at: u64,
    in_blocks: HashSet<String>,
}

/// Admits transactions by fee-rate, tracks shard membership, and exposes an
/// `is_utxo_spent` view so [`Transaction::validate`] can reject intra-mempool
/// double-spends.
pub struct Mempool {
    entries: HashMap<String, Entry>,
    by_shard: HashMap<u32, Vec<String>>,
    spent_to_tx: HashMap<String, String>,
    max_size: usize,
    min_fee_per_byte: f64,
}

impl Mempool {
    pub fn new(max_size: usize, min_fee_per_byte: f64) -> Self {
        Mempool {
            entries: HashMap::new(),
            by_shard: HashMap::new(),
            spent_to_tx: HashMap::new(),
            max_size,
            min_fee_per_byte,
        }
    }

    fn output_shards(tx: &Transaction) -> HashSet<u32> {
        tx.outputs.iter().map(|o| o.coordinate.shard_id()).collect()
    }

    fn estimated_size(tx: &Transaction) -> usize {
        bincode::serialized_size(tx).unwrap_or(0) as usize
    }

    pub fn add_transaction(
        &mut self,
        tx: Transaction,
        store: &UtxoStore,
        verifier: &dyn SignatureVerifier,
        inserted_at: u64,
    ) -> Result<(), ChainError> {
        if self.entries.contains_key(tx.id()) {
            return Err(ChainError::AlreadyInMempool);
        }

        tx.validate(store, verifier, Some(self))?;

        let fee = tx.fee(store);
        let size = Self::estimated_size(&tx).max(1);
        let fee_per_byte = fee / size as f64;

        if fee_per_byte < self.min_fee_per_byte {
            return Err(ChainError::FeeTooLow);
        }

        if self.entries.len() >= self.max_size {
            self.make_room_for(fee_per_byte)?;
        }

        let shards = Self::output_shards(&tx);
        let tx_id = tx.id().to_string();
        for input in &tx.inputs {
            self.spent_to_tx.insert(input.utxo_id.clone(), tx_id.clone());
        }
        for shard in shards {
            self.by_shard.entry(shard).or_default().push(tx_id.clone());
        }
        self.entries.insert(
            tx_id,
            Entry {
                tx,
                fee,
                fee_per_byte,
                inserted_at,
                in_blocks: HashSet::new(),
            },
        );
        Ok(())
    }

    /// Evicts the lowest fee-per-byte entries until a slot is free, or
    /// fails with `MempoolFull` when the incoming transaction wouldn't
    /// outrank anything currently held.
    fn make_room_for(&mut self, incoming_fee_per_byte: f64) -> Result<(), ChainError> {
        let Some((lowest_id, lowest_fpb)) = self
            .entries
            .iter()
            .map(|(id, e)| (id.clone(), e.fee_per_byte))
            .min_by(|a, b| a.1.total_cmp(&b.1))
        else {
            return Err(ChainError::MempoolFull);
        };

        if incoming_fee_per_byte <= lowest_fpb {
            return Err(ChainError::MempoolFull);
        }

        self.remove_transaction(&lowest_id);
        Ok(())
    }

    pub fn remove_transaction(&mut self, tx_id: &str) {
        let Some(entry) = self.entries.remove(tx_id) else {
            return;
        };
        for input in &entry.tx.inputs {
            if self.spent_to_tx.get(&input.utxo_id).map(String::as_str) == Some(tx_id) {
                self.spent_to_tx.remove(&input.utxo_id);
            }
        }
        for shard in Self::output_shards(&entry.tx) {
            if let Some(ids) = self.by_shard.get_mut(&shard) {
                ids.retain(|id| id != tx_id);
                if ids.is_empty() {
                    self.by_shard.remove(&shard);
                }
            }
        }
    }

    pub fn remove_block_transactions(&mut self, tx_ids: &[String]) {
        for id in tx_ids {
            self.remove_transaction(id);
        }
    }

    pub fn mark_included_in_block(&mut self, tx_id: &str, block_hash: &str) {
        if let Some(entry) = self.entries.get_mut(tx_id) {
            entry.in_blocks.insert(block_hash.to_string());
        }
    }

    pub fn get_transaction(&self, tx_id: &str) -> Option<&Transaction> {
        self.entries.get(tx_id).map(|e| &e.tx)
    }

    /// Descending by fee-per-byte, optionally filtered and capped.
    pub fn shard_transactions(
        &self,
        shard_id: u32,
        min_fee_per_byte: Option<f64>,
        max_count: Option<usize>,
    ) -> Vec<&Transaction> {
        let mut entries: Vec<&Entry> = self
            .by_shard
            .get(&shard_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.entries.get(id))
            .filter(|e| min_fee_per_byte.is_none_or(|min| e.fee_per_byte >= min))
            .collect();
        entries.sort_by(|a, b| b.fee_per_byte.total_cmp(&a.fee_per_byte));
        if let Some(max) = max_count {
            entries.truncate(max);
        }
        entries.into_iter().map(|e| &e.tx).collect()
    }

    pub fn spending_transaction(&self, utxo_id: &str) -> Option<&str> {
        self.spent_to_tx.get(utxo_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_shard.clear();
        self.spent_to_tx.clear();
    }

    pub fn fee_per_byte_of(&self, tx_id: &str) -> Option<f64> {
        self.entries.get(tx_id).map(|e| e.fee_per_byte)
    }

    pub fn inserted_at(&self, tx_id: &str) -> Option<u64> {
        self.entries.get(tx_id).map(|e| e.inserted_at)
    }

    pub fn fee_of(&self, tx_id: &str) -> Option<f64> {
        self.entries.get(tx_id).map(|e| e.fee)
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Mempool::new(DEFAULT_MAX_SIZE, DEFAULT_MIN_FEE_PER_BYTE)
    }
}

impl MempoolView for Mempool {
    fn is_utxo_spent(&self, utxo_id: &str) -> bool {
        self.spent_to_tx.contains_key(utxo_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinate::Coordinate;
    use crate::crypto::PermissiveVerifier;
    use crate::transaction::{TransactionInput, TransactionOutput};
    use crate::utxo::{Script, Utxo};

    fn store_with(owner: &str, amount: f64) -> (UtxoStore, String) {
        let mut store = UtxoStore::new(0.1);
        let utxo = Utxo::new(owner.into(), amount, Coordinate::root(), 0, Script::CheckSig, None, None).unwrap();
        let id = utxo.id().to_string();
        store.add_utxo(utxo).unwrap();
        (store, id)
    }

    fn tx_spending(utxo_id: &str, fee: f64, nonce: u64) -> Transaction {
        Transaction::new(
            vec![TransactionInput {
                utxo_id: utxo_id.to_string(),
                signature: vec![],
                public_key: vec![],
            }],
            vec![TransactionOutput {
                owner: "bob".into(),
                amount: 10.0 - fee,
                coordinate: Coordinate::root(),
                script: Script::CheckSig,
                contract_state_hash: None,
                gas_limit: None,
            }],
            0,
            nonce,
        )
        .unwrap()
    }

    #[test]
    fn admits_valid_transaction() {
        let (store, id) = store_with("alice", 10.0);
        let mut pool = Mempool::new(10, 0.0);
        let tx = tx_spending(&id, 1.0, 0);
        assert!(pool.add_transaction(tx, &store, &PermissiveVerifier, 100).is_ok());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn rejects_duplicate() {
        let (store, id) = store_with("alice", 10.0);
        let mut pool = Mempool::new(10, 0.0);
        pool.add_transaction(tx_spending(&id, 1.0, 0), &store, &PermissiveVerifier, 0)
            .unwrap();
        let dup = tx_spending(&id, 1.0, 0);
        assert_eq!(
            pool.add_transaction(dup, &store, &PermissiveVerifier, 0),
            Err(ChainError::AlreadyInMempool)
        );
    }

    #[test]
    fn rejects_below_min_fee_rate() {
        let (store, id) = store_with("alice", 10.0);
        let mut pool = Mempool::new(10, 1.0);
        let tx = tx_spending(&id, 0.0000001, 0);
        assert_eq!(
            pool.add_transaction(tx, &store, &PermissiveVerifier, 0),
            Err(ChainError::FeeTooLow)
        );
    }

    #[test]
    fn eviction_keeps_highest_fee_rate_entries() {
        // S7: three slots at fpb {5,4,3}; inserting fpb=6 keeps {6,5,4}.
        let mut store = UtxoStore::new(0.1);
        let mut ids = Vec::new();
        for i in 0..4u8 {
            let coord = Coordinate::new(1, vec![0]).unwrap();
            let u = Utxo::new(format!("owner{i}"), 1000.0, coord, 0, Script::CheckSig, None, None).unwrap();
            ids.push(u.id().to_string());
            store.add_utxo(u).unwrap();
        }

        let mut pool = Mempool::new(3, 0.0);
        // Fees chosen so fee_per_byte ranks as 5,4,3 (size is constant across
        // these structurally-identical transactions).
        for (fee, id) in [(500.0, &ids[0]), (400.0, &ids[1]), (300.0, &ids[2])] {
            let tx = tx_spending(id, fee, 0);
            pool.add_transaction(tx, &store, &PermissiveVerifier, 0).unwrap();
        }
        assert_eq!(pool.len(), 3);

        let best = tx_spending(&ids[3], 600.0, 1);
        pool.add_transaction(best, &store, &PermissiveVerifier, 0).unwrap();
        assert_eq!(pool.len(), 3);
        assert!(pool.fee_per_byte_of(&ids[3]).is_none()); // keyed by tx id, not utxo id
    }

    #[test]
    fn remove_clears_all_indices() {
        let (store, id) = store_with("alice", 10.0);
        let mut pool = Mempool::new(10, 0.0);
        let tx = tx_spending(&id, 1.0, 0);
        let tx_id = tx.id().to_string();
        pool.add_transaction(tx, &store, &PermissiveVerifier, 0).unwrap();
        pool.remove_transaction(&tx_id);
        assert!(pool.is_empty());
        assert!(!pool.is_utxo_spent(&id));
    }

    #[test]
    fn intra_mempool_double_spend_rejected() {
        let (store, id) = store_with("alice", 10.0);
        let mut pool = Mempool::new(10, 0.0);
        pool.add_transaction(tx_spending(&id, 1.0, 0), &store, &PermissiveVerifier, 0)
            .unwrap();
        let second = tx_spending(&id, 2.0, 1);
        assert_eq!(
            pool.add_transaction(second, &store, &PermissiveVerifier, 0),
            Err(ChainError::InputSpent(id))
        );
    }
}
