//! Blocks: a mined header, its transactions, and the cross-shard proofs
//! backing any cross-shard transactions it carries.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::coordinate::Coordinate;
use crate::error::ChainError;
use crate::merkle_mesh::{MeshLeaf, MerkleMesh};
use crate::proof::CrossShardProof;
use crate::transaction::Transaction;
use crate::utxo::SignatureVerifier;
use crate::utxo_store::UtxoStore;

fn zero_hash() -> String {
    "0".repeat(64)
}

/// Current Unix timestamp in seconds, for callers that don't already have a
/// block time in hand (e.g. a miner stamping a fresh candidate).
pub fn now_timestamp() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_hash: String,
    pub merkle_mesh_root: String,
    pub timestamp: u64,
    pub difficulty: u32,
    pub nonce: u64,
    pub height: u64,
    pub coordinate: Coordinate,
    /// Shard id -> `"mesh_root|block_hash"` of that shard's referenced block.
    pub cross_shard_refs: HashMap<u32, String>,
}

impl BlockHeader {
    pub fn new(
        version: u32,
        prev_hash: String,
        timestamp: u64,
        difficulty: u32,
        height: u64,
        coordinate: Coordinate,
        cross_shard_refs: HashMap<u32, String>,
    ) -> Self {
        BlockHeader {
            version,
            prev_hash,
            merkle_mesh_root: zero_hash(),
            timestamp,
            difficulty,
            nonce: 0,
            height,
            coordinate,
            cross_shard_refs,
        }
    }

    /// SHA-256 over the pipe-joined header fields, cross-shard refs appended
    /// in ascending shard-id order so two validators hash identical headers
    /// regardless of map iteration order.
    fn digest_input(&self) -> String {
        let mut data = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.version,
            self.prev_hash,
            self.merkle_mesh_root,
            self.timestamp,
            self.difficulty,
            self.nonce,
            self.height,
            self.coordinate.hash(),
        );
        let mut shards: Vec<&u32> = self.cross_shard_refs.keys().collect();
        shards.sort();
        for shard_id in shards {
            data.push_str(&format!("|{}:{}", shard_id, self.cross_shard_refs[shard_id]));
        }
        data
    }

    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.digest_input().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Upper bound a header hash must fall under for difficulty `difficulty`:
/// `2^(256 - difficulty) - 1`, expressed as 32 big-endian bytes so it can be
/// compared directly against a decoded hash digest.
pub fn difficulty_target(difficulty: u32) -> [u8; 32] {
    let difficulty = difficulty.min(256);
    let mut target = [0xFFu8; 32];
    let leading_zero_bytes = (difficulty / 8) as usize;
    let partial_bits = difficulty % 8;

    for byte in target.iter_mut().take(leading_zero_bytes.min(32)) {
        *byte = 0;
    }
    if leading_zero_bytes < 32 && partial_bits > 0 {
        target[leading_zero_bytes] = 0xFF >> partial_bits;
    }
    target
}

pub fn meets_difficulty(hash_hex: &str, difficulty: u32) -> bool {
    let Ok(bytes) = hex::decode(hash_hex) else {
        return false;
    };
    if bytes.len() != 32 {
        return false;
    }
    let target = difficulty_target(difficulty);
    bytes.as_slice() <= target.as_slice()
}

#[derive(Clone)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub cross_shard_proofs: HashMap<String, CrossShardProof>,
    pub block_hash: Option<String>,
}

impl Block {
    pub fn new(
        version: u32,
        prev_hash: String,
        timestamp: u64,
        difficulty: u32,
        height: u64,
        coordinate: Coordinate,
        cross_shard_refs: HashMap<u32, String>,
    ) -> Self {
        Block {
            header: BlockHeader::new(version, prev_hash, timestamp, difficulty, height, coordinate, cross_shard_refs),
            transactions: Vec::new(),
            cross_shard_proofs: HashMap::new(),
            block_hash: None,
        }
    }

    /// Adds `tx`. Cross-shard transactions must carry a `proof` that
    /// verifies against the header's `cross_shard_refs`; non-cross-shard
    /// transactions must not carry one.
    pub fn add_transaction(&mut self, tx: Transaction, proof: Option<CrossShardProof>) -> Result<(), ChainError> {
        if tx.is_cross_shard() && proof.is_none() {
            return Err(ChainError::ProofInvalid(format!(
                "cross-shard transaction {} requires a proof",
                tx.id()
            )));
        }
        if !tx.is_cross_shard() && proof.is_some() {
            return Err(ChainError::ProofInvalid(format!(
                "non-cross-shard transaction {} cannot carry a proof",
                tx.id()
            )));
        }

        if let Some(proof) = proof {
            let mut mesh_roots = HashMap::new();
            let mut block_hashes = HashMap::new();
            for (shard_id, reference) in &self.header.cross_shard_refs {
                let Some((root, hash)) = reference.split_once('|') else {
                    return Err(ChainError::InvalidCrossRef(reference.clone()));
                };
                mesh_roots.insert(*shard_id, root.to_string());
                block_hashes.insert(*shard_id, hash.to_string());
            }

            proof
                .verify(&mesh_roots, &block_hashes)
                .map_err(ChainError::ProofInvalid)?;
            self.cross_shard_proofs.insert(tx.id().to_string(), proof);
        }

        self.transactions.push(tx);
        Ok(())
    }

    fn build_merkle_mesh(&self) -> MerkleMesh {
        let leaves: Vec<MeshLeaf> = self
            .transactions
            .iter()
            .map(|tx| MeshLeaf {
                tx_hash: tx.id().to_string(),
                shard_id: tx
                    .outputs
                    .first()
                    .map(|o| o.coordinate.shard_id())
                    .unwrap_or_else(|| self.header.coordinate.shard_id()),
            })
            .collect();
        MerkleMesh::build(&leaves)
    }

    /// Builds the mesh, then searches nonces `0..max_nonce` for one whose
    /// header hash clears `header.difficulty`.
    pub fn mine(&mut self, max_nonce: u64) -> bool {
        let mesh = self.build_merkle_mesh();
        self.header.merkle_mesh_root = mesh.root_hash().map(str::to_string).unwrap_or_else(zero_hash);

        for nonce in 0..max_nonce {
            self.header.nonce = nonce;
            let hash = self.header.compute_hash();
            if meets_difficulty(&hash, self.header.difficulty) {
                self.block_hash = Some(hash);
                return true;
            }
        }
        false
    }

    /// Full structural verification: PoW, header linkage against `prev`
    /// (when given), per-transaction validation against `store` (when
    /// given), cross-shard proof presence, and mesh-root agreement.
    pub fn verify(
        &self,
        prev: Option<&Block>,
        store: Option<&UtxoStore>,
        verifier: &dyn SignatureVerifier,
    ) -> Result<(), ChainError> {
        let block_hash = self
            .block_hash
            .as_ref()
            .ok_or_else(|| ChainError::ConsensusViolation("block not mined".into()))?;

        if !meets_difficulty(block_hash, self.header.difficulty) {
            return Err(ChainError::ConsensusViolation("invalid proof-of-work".into()));
        }

        if let Some(prev) = prev {
            let prev_hash = prev
                .block_hash
                .as_ref()
                .ok_or_else(|| ChainError::ConsensusViolation("previous block not mined".into()))?;
            if &self.header.prev_hash != prev_hash {
                return Err(ChainError::ConsensusViolation("invalid previous block hash".into()));
            }
            if self.header.height != prev.header.height + 1 {
                return Err(ChainError::ConsensusViolation("invalid block height".into()));
            }
            if self.header.timestamp <= prev.header.timestamp {
                return Err(ChainError::ConsensusViolation("invalid timestamp".into()));
            }
        }

        if let Some(store) = store {
            for tx in &self.transactions {
                tx.validate(store, verifier, None)
                    .map_err(|e| ChainError::ConsensusViolation(format!("invalid transaction: {e}")))?;
            }
        }

        for tx in &self.transactions {
            if tx.is_cross_shard() && !self.cross_shard_proofs.contains_key(tx.id()) {
                return Err(ChainError::ProofInvalid(format!(
                    "missing cross-shard proof for {}",
                    tx.id()
                )));
            }
        }

        let mesh = self.build_merkle_mesh();
        let root = mesh
            .root_hash()
            .ok_or_else(|| ChainError::ConsensusViolation("failed to build merkle mesh".into()))?;
        if root != self.header.merkle_mesh_root {
            return Err(ChainError::ConsensusViolation("invalid merkle mesh root".into()));
        }

        Ok(())
    }

    pub fn shard_id(&self) -> u32 {
        self.header.coordinate.shard_id()
    }

    pub fn cross_shard_transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter().filter(|tx| tx.is_cross_shard())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinate::Coordinate;

    #[test]
    fn difficulty_zero_accepts_anything() {
        assert!(meets_difficulty(&"f".repeat(64), 0));
    }

    #[test]
    fn difficulty_target_byte_boundary() {
        let target = difficulty_target(8);
        assert_eq!(target[0], 0x00);
        assert_eq!(target[1], 0xFF);
    }

    #[test]
    fn difficulty_target_partial_bits() {
        let target = difficulty_target(4);
        assert_eq!(target[0], 0x0F);
    }

    #[test]
    fn mine_finds_nonce_for_low_difficulty() {
        let mut block = Block::new(1, zero_hash(), 1000, 1, 1, Coordinate::root(), HashMap::new());
        assert!(block.mine(1_000_000));
        assert!(block.block_hash.is_some());
        assert!(meets_difficulty(block.block_hash.as_ref().unwrap(), 1));
    }

    #[test]
    fn verify_rejects_unmined_block() {
        let block = Block::new(1, zero_hash(), 1000, 1, 1, Coordinate::root(), HashMap::new());
        struct NoopVerifier;
        impl SignatureVerifier for NoopVerifier {
            fn verify(&self, _: &str, _: &[u8], _: &[u8], _: &str) -> bool {
                true
            }
        }
        assert!(block.verify(None, None, &NoopVerifier).is_err());
    }

    #[test]
    fn verify_checks_height_and_timestamp_against_prev() {
        let mut genesis = Block::new(1, zero_hash(), 1000, 0, 0, Coordinate::root(), HashMap::new());
        genesis.mine(1_000_000);

        let mut bad = Block::new(1, genesis.block_hash.clone().unwrap(), 999, 0, 5, Coordinate::root(), HashMap::new());
        bad.mine(1_000_000);

        struct NoopVerifier;
        impl SignatureVerifier for NoopVerifier {
            fn verify(&self, _: &str, _: &[u8], _: &[u8], _: &str) -> bool {
                true
            }
        }
        assert!(bad.verify(Some(&genesis), None, &NoopVerifier).is_err());
    }

    #[test]
    fn empty_block_mesh_root_is_zero_hash() {
        let mut block = Block::new(1, zero_hash(), 1000, 0, 1, Coordinate::root(), HashMap::new());
        block.mine(1_000_000);
        assert_eq!(block.header.merkle_mesh_root, zero_hash());
    }

    #[test]
    fn rejects_non_cross_shard_tx_with_proof() {
        use crate::transaction::{TransactionInput, TransactionOutput};
        use crate::utxo::Script;

        let mut block = Block::new(1, zero_hash(), 1000, 0, 1, Coordinate::root(), HashMap::new());
        let tx = Transaction::new(
            vec![TransactionInput {
                utxo_id: "x".into(),
                signature: vec![],
                public_key: vec![],
            }],
            vec![TransactionOutput {
                owner: "a".into(),
                amount: 1.0,
                coordinate: Coordinate::root(),
                script: Script::CheckSig,
                contract_state_hash: None,
                gas_limit: None,
            }],
            0,
            0,
        )
        .unwrap();
        let proof = CrossShardProof::new("x", 0, Default::default());
        assert!(block.add_transaction(tx, Some(proof)).is_err());
    }
}
