//! Merkle Mesh: a binary Merkle tree over transaction ids, augmented with
//! cross-shard tagging so a verifier can tell, from the root alone, which
//! shards a block's transaction set touches.

use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};

/// One proof step: the sibling hash to combine with, whether it sits to the
/// left of the accumulated hash, and the shard id if the sibling was tagged
/// cross-shard toward the caller's `target_shard`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProofStep {
    pub sibling_hash: String,
    pub is_left: bool,
    pub shard_id: Option<u32>,
}

#[derive(Debug, Clone)]
struct MeshNode {
    hash: String,
    shard_id: Option<u32>,
    cross_shard: bool,
}

/// Leaf-level transaction entry: its id plus the shard it resolves to.
#[derive(Debug, Clone)]
pub struct MeshLeaf {
    pub tx_hash: String,
    pub shard_id: u32,
}

/// A built mesh. Unlike the reference tree walk, every level is retained in
/// full (not just hashes) so cross-shard tags generated during `build` stay
/// available to `get_proof` at every height, not only the level directly
/// above the leaves.
pub struct MerkleMesh {
    levels: Vec<Vec<MeshNode>>,
    leaf_index: HashMap<String, usize>,
    cross_refs: HashMap<u32, HashSet<String>>,
}

pub fn hash_pair(left: &str, right: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{left}|{right}").as_bytes());
    hex::encode(hasher.finalize())
}

impl MerkleMesh {
    /// Builds the mesh from `leaves` in order. Empty input yields an empty
    /// mesh (`root_hash` is `None`).
    pub fn build(leaves: &[MeshLeaf]) -> Self {
        if leaves.is_empty() {
            return MerkleMesh {
                levels: Vec::new(),
                leaf_index: HashMap::new(),
                cross_refs: HashMap::new(),
            };
        }

        let mut leaf_index = HashMap::new();
        let leaf_level: Vec<MeshNode> = leaves
            .iter()
            .enumerate()
            .map(|(i, leaf)| {
                leaf_index.insert(leaf.tx_hash.clone(), i);
                MeshNode {
                    hash: leaf.tx_hash.clone(),
                    shard_id: Some(leaf.shard_id),
                    cross_shard: false,
                }
            })
            .collect();

        let mut levels = vec![leaf_level];
        let mut cross_refs: HashMap<u32, HashSet<String>> = HashMap::new();

        while levels.last().unwrap().len() > 1 {
            let current = levels.last().unwrap();
            let mut next = Vec::with_capacity(current.len().div_ceil(2));

            for chunk_start in (0..current.len()).step_by(2) {
                let left = &current[chunk_start];
                let right = current
                    .get(chunk_start + 1)
                    .unwrap_or(&current[chunk_start]);

                let parent_hash = hash_pair(&left.hash, &right.hash);
                let mut parent = MeshNode {
                    hash: parent_hash,
                    shard_id: left.shard_id,
                    cross_shard: false,
                };

                if let (Some(l), Some(r)) = (left.shard_id, right.shard_id) {
                    if l != r {
                        parent.cross_shard = true;
                        parent.shard_id = Some(r);
                        cross_refs.entry(r).or_default().insert(parent.hash.clone());
                    }
                } else {
                    parent.shard_id = None;
                }

                next.push(parent);
            }

            levels.push(next);
        }

        MerkleMesh {
            levels,
            leaf_index,
            cross_refs,
        }
    }

    pub fn root_hash(&self) -> Option<&str> {
        self.levels.last().and_then(|lvl| lvl.first()).map(|n| n.hash.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Proof path from `tx_hash`'s leaf to the root. `target_shard`, when
    /// given, annotates proof steps whose sibling was tagged cross-shard
    /// toward that shard; all other steps carry `shard_id: None`.
    pub fn get_proof(&self, tx_hash: &str, target_shard: Option<u32>) -> Option<Vec<ProofStep>> {
        if self.levels.is_empty() {
            return None;
        }
        let mut idx = *self.leaf_index.get(tx_hash)?;
        let mut proof = Vec::new();

        for level in &self.levels[..self.levels.len() - 1] {
            let is_left = idx % 2 == 0;
            let sibling_idx = if is_left {
                if idx + 1 < level.len() {
                    idx + 1
                } else {
                    idx
                }
            } else {
                idx - 1
            };
            let sibling = &level[sibling_idx];

            let shard_id = if sibling.cross_shard && sibling.shard_id == target_shard {
                sibling.shard_id
            } else {
                None
            };

            proof.push(ProofStep {
                sibling_hash: sibling.hash.clone(),
                is_left: !is_left,
                shard_id,
            });

            idx /= 2;
        }

        Some(proof)
    }

    /// An empty proof verifies only when `tx_hash` already equals the root
    /// (the single-leaf mesh case); any other mismatch between an empty
    /// proof and a non-trivial mesh fails.
    pub fn verify_proof(tx_hash: &str, proof: &[ProofStep], root_hash: &str) -> bool {
        if proof.is_empty() {
            return tx_hash == root_hash;
        }

        let mut current = tx_hash.to_string();
        for step in proof {
            current = if step.is_left {
                hash_pair(&step.sibling_hash, &current)
            } else {
                hash_pair(&current, &step.sibling_hash)
            };
        }
        current == root_hash
    }

    pub fn cross_shard_refs(&self, shard_id: u32) -> HashSet<String> {
        self.cross_refs.get(&shard_id).cloned().unwrap_or_default()
    }

    pub fn cross_shard_shards(&self) -> Vec<u32> {
        self.cross_refs.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(hash: &str, shard: u32) -> MeshLeaf {
        MeshLeaf {
            tx_hash: hash.to_string(),
            shard_id: shard,
        }
    }

    #[test]
    fn single_leaf_root_is_its_own_hash() {
        let mesh = MerkleMesh::build(&[leaf("abc", 0)]);
        assert_eq!(mesh.root_hash(), Some("abc"));
    }

    #[test]
    fn single_leaf_empty_proof_verifies() {
        let mesh = MerkleMesh::build(&[leaf("abc", 0)]);
        let root = mesh.root_hash().unwrap().to_string();
        let proof = mesh.get_proof("abc", None).unwrap();
        assert!(proof.is_empty());
        assert!(MerkleMesh::verify_proof("abc", &proof, &root));
    }

    #[test]
    fn empty_proof_against_nontrivial_root_fails() {
        assert!(!MerkleMesh::verify_proof("abc", &[], "not-abc"));
    }

    #[test]
    fn two_leaf_proof_round_trips() {
        let mesh = MerkleMesh::build(&[leaf("a", 0), leaf("b", 0)]);
        let root = mesh.root_hash().unwrap().to_string();
        assert_eq!(root, hash_pair("a", "b"));

        let proof_a = mesh.get_proof("a", None).unwrap();
        assert!(MerkleMesh::verify_proof("a", &proof_a, &root));

        let proof_b = mesh.get_proof("b", None).unwrap();
        assert!(MerkleMesh::verify_proof("b", &proof_b, &root));
    }

    #[test]
    fn odd_leaf_count_duplicates_last() {
        let mesh = MerkleMesh::build(&[leaf("a", 0), leaf("b", 0), leaf("c", 0)]);
        let root = mesh.root_hash().unwrap().to_string();
        let proof_c = mesh.get_proof("c", None).unwrap();
        assert!(MerkleMesh::verify_proof("c", &proof_c, &root));
    }

    #[test]
    fn cross_shard_pairing_is_tagged() {
        let mesh = MerkleMesh::build(&[leaf("a", 1), leaf("b", 2)]);
        assert!(mesh.cross_shard_shards().contains(&2));
        let refs = mesh.cross_shard_refs(2);
        assert_eq!(refs.len(), 1);
    }

    #[test]
    fn same_shard_pairing_is_not_tagged() {
        let mesh = MerkleMesh::build(&[leaf("a", 1), leaf("b", 1)]);
        assert!(mesh.cross_shard_shards().is_empty());
    }

    #[test]
    fn unknown_tx_hash_has_no_proof() {
        let mesh = MerkleMesh::build(&[leaf("a", 0)]);
        assert!(mesh.get_proof("nonexistent", None).is_none());
    }

    #[test]
    fn proof_survives_above_first_level() {
        // Four leaves split across two shards at the leaf pairing; the tag
        // produced there must still be visible when walking a proof for a
        // transaction two levels below it.
        let mesh = MerkleMesh::build(&[leaf("a", 1), leaf("b", 1), leaf("c", 2), leaf("d", 2)]);
        let root = mesh.root_hash().unwrap().to_string();
        let proof = mesh.get_proof("a", Some(2)).unwrap();
        assert!(MerkleMesh::verify_proof("a", &proof, &root));
        assert!(proof.iter().any(|step| step.shard_id == Some(2)));
    }
}
