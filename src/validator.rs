//! Applies and reverts blocks against a [`UtxoStore`], tracking exactly what
//! changed so `revert_block` can be a true inverse of `apply_block`.

use std::collections::{HashMap, HashSet};

use crate::block::Block;
use crate::consensus::ShardConsensus;
use crate::error::ChainError;
use crate::mempool::Mempool;
use crate::transaction::Transaction;
use crate::utxo::{SignatureVerifier, Utxo};
use crate::utxo_store::UtxoStore;

/// Everything `apply_block` changed, recorded so it can be undone exactly.
/// Unlike a naive "remember the ids" approach, `spent_utxos` holds the full
/// removed [`Utxo`] objects — the store no longer has them once applied, so
/// reverting by id alone cannot reconstruct them.
#[derive(Default)]
pub struct ValidationContext {
    pub spent_utxos: HashMap<String, Utxo>,
    pub created_utxos: HashSet<String>,
    pub cross_shard_deps: HashMap<u32, HashSet<String>>,
}

impl ValidationContext {
    pub fn new() -> Self {
        ValidationContext::default()
    }

    fn mark_spent(&mut self, utxo_id: &str, utxo: Utxo) -> Result<(), ChainError> {
        if self.spent_utxos.contains_key(utxo_id) {
            return Err(ChainError::InputSpent(utxo_id.to_string()));
        }
        self.spent_utxos.insert(utxo_id.to_string(), utxo);
        Ok(())
    }
}

pub struct BlockValidator;

impl BlockValidator {
    /// Full block validation: consensus rules, structural verification,
    /// then per-transaction validation with intra-block double-spend
    /// detection and cross-shard dependency tracking.
    pub fn validate_block(
        consensus: &ShardConsensus,
        block: &Block,
        prev: Option<&Block>,
        store: &UtxoStore,
        verifier: &dyn SignatureVerifier,
        now: u64,
    ) -> Result<ValidationContext, ChainError> {
        let prev_timestamp = prev.map(|b| b.header.timestamp);
        consensus.validate_block(block, prev_timestamp, now)?;
        block.verify(prev, Some(store), verifier)?;

        let mut context = ValidationContext::new();
        for tx in &block.transactions {
            Self::validate_transaction(tx, store, verifier, &mut context)?;
        }
        Self::validate_cross_shard_state(block, &context)?;

        Ok(context)
    }

    fn validate_transaction(
        tx: &Transaction,
        store: &UtxoStore,
        verifier: &dyn SignatureVerifier,
        context: &mut ValidationContext,
    ) -> Result<(), ChainError> {
        tx.validate(store, verifier, None)?;

        for input in &tx.inputs {
            if context.spent_utxos.contains_key(&input.utxo_id) {
                return Err(ChainError::InputSpent(input.utxo_id.clone()));
            }
            let utxo = store
                .get_utxo(&input.utxo_id)
                .ok_or_else(|| ChainError::InputMissing(input.utxo_id.clone()))?
                .clone();
            context.mark_spent(&input.utxo_id, utxo)?;
        }

        for index in 0..tx.outputs.len() {
            context.created_utxos.insert(tx.output_utxo_key(index));
        }

        if tx.is_cross_shard() {
            let shards: HashSet<u32> = tx.outputs.iter().map(|o| o.coordinate.shard_id()).collect();
            for shard in shards {
                context.cross_shard_deps.entry(shard).or_default().insert(tx.id().to_string());
            }
        }

        Ok(())
    }

    /// Every cross-shard dependency recorded during transaction validation
    /// must be backed by a verifying proof already attached to the block.
    fn validate_cross_shard_state(block: &Block, context: &ValidationContext) -> Result<(), ChainError> {
        for deps in context.cross_shard_deps.values() {
            for tx_id in deps {
                if !block.cross_shard_proofs.contains_key(tx_id) {
                    return Err(ChainError::ProofInvalid(format!(
                        "cross-shard dependency {tx_id} has no attached proof"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Removes spent UTXOs, executes each transaction to produce its new
    /// UTXOs, and drops the block's transactions from `mempool`.
    pub fn apply_block(
        block: &Block,
        store: &mut UtxoStore,
        mempool: &mut Mempool,
        verifier: &dyn SignatureVerifier,
    ) -> Result<ValidationContext, ChainError> {
        let mut context = ValidationContext::new();

        for tx in &block.transactions {
            for input in &tx.inputs {
                let utxo = store.remove_utxo(&input.utxo_id)?;
                context.mark_spent(&input.utxo_id, utxo)?;
            }

            let new_utxos = tx.execute(store, verifier, block.header.height)?;
            for (index, utxo) in new_utxos.into_iter().enumerate() {
                context.created_utxos.insert(tx.output_utxo_key(index));
                store.add_utxo(utxo)?;
            }

            if tx.is_cross_shard() {
                let shards: HashSet<u32> = tx.outputs.iter().map(|o| o.coordinate.shard_id()).collect();
                for shard in shards {
                    context.cross_shard_deps.entry(shard).or_default().insert(tx.id().to_string());
                }
            }
        }

        let tx_ids: Vec<String> = block.transactions.iter().map(|tx| tx.id().to_string()).collect();
        mempool.remove_block_transactions(&tx_ids);

        Ok(context)
    }

    /// Removes every UTXO `apply_block` created and reinstates every UTXO it
    /// spent, using the objects captured in `context` rather than trying to
    /// re-fetch them from `store` (by the time revert runs, the store no
    /// longer has them).
    pub fn revert_block(
        block: &Block,
        store: &mut UtxoStore,
        mempool: &mut Mempool,
        context: ValidationContext,
    ) -> Result<(), ChainError> {
        for tx in block.transactions.iter().rev() {
            for index in (0..tx.outputs.len()).rev() {
                let key = tx.output_utxo_key(index);
                if context.created_utxos.contains(&key) {
                    store.remove_utxo(&key)?;
                }
            }
            for input in tx.inputs.iter().rev() {
                if let Some(utxo) = context.spent_utxos.get(&input.utxo_id) {
                    store.add_utxo(utxo.clone())?;
                }
            }
        }

        for tx in &block.transactions {
            // Returning reverted transactions to the mempool is the caller's
            // call (whether they're still valid against the reverted state
            // depends on what else is in flight); this validator only
            // restores UTXO-set state. Block reorganization logic decides
            // whether to re-admit them.
            let _ = mempool;
            let _ = tx;
        }

        Ok(())
    }
}
