//! Per-shard consensus rules: coordinate legality, proof-of-work, timestamp
//! bounds, cross-reference consistency, and difficulty adjustment.

use crate::block::{meets_difficulty, Block};
use crate::error::ChainError;

pub const TARGET_BLOCK_TIME_SECS: u64 = 600;
pub const DIFFICULTY_ADJUSTMENT_WINDOW: usize = 2016;
pub const MAX_DIFFICULTY_CHANGE: f64 = 4.0;
pub const INITIAL_DIFFICULTY: u32 = 16;
pub const MAX_TIMESTAMP_DRIFT_SECS: u64 = 7200;

/// Tracks the recent `(height, timestamp)` history for one shard and derives
/// the next block's required difficulty from it.
pub struct ShardConsensus {
    shard_id: u32,
    recent_blocks: Vec<(u64, u64)>,
    window: usize,
    last_difficulty: u32,
}

impl ShardConsensus {
    pub fn new(shard_id: u32) -> Self {
        ShardConsensus {
            shard_id,
            recent_blocks: Vec::new(),
            window: DIFFICULTY_ADJUSTMENT_WINDOW,
            last_difficulty: INITIAL_DIFFICULTY,
        }
    }

    /// Records a block's `(height, timestamp)` for the sliding window and
    /// remembers its difficulty as the basis for the next retarget.
    pub fn record_block(&mut self, height: u64, timestamp: u64, difficulty: u32) {
        self.recent_blocks.push((height, timestamp));
        if self.recent_blocks.len() > self.window {
            self.recent_blocks.remove(0);
        }
        self.last_difficulty = difficulty;
    }

    pub fn reset_difficulty(&mut self) {
        self.recent_blocks.clear();
        self.last_difficulty = INITIAL_DIFFICULTY;
    }

    /// Same as [`ShardConsensus::new`] but with a caller-chosen window,
    /// so tests can exercise a full-window retarget without 2016 blocks.
    #[cfg(test)]
    fn with_window(shard_id: u32, window: usize) -> Self {
        ShardConsensus {
            shard_id,
            recent_blocks: Vec::new(),
            window,
            last_difficulty: INITIAL_DIFFICULTY,
        }
    }

    /// `ceil(log2(shard_id + 1))`, matching the minimum number of path
    /// digits needed to encode a shard's binary expansion.
    fn min_depth_for_shard(shard_id: u32) -> u32 {
        let mut bits = 0u32;
        let mut n = shard_id + 1;
        while n > 1 {
            n = n.div_ceil(2);
            bits += 1;
        }
        bits.max(1)
    }

    fn validate_coordinate(&self, block: &Block) -> Result<(), ChainError> {
        let coord = &block.header.coordinate;
        if coord.shard_id() != self.shard_id {
            return Err(ChainError::InvalidCoordinate(format!(
                "block shard {} does not match consensus shard {}",
                coord.shard_id(),
                self.shard_id
            )));
        }

        let min_depth = Self::min_depth_for_shard(self.shard_id);
        if coord.depth() < min_depth {
            return Err(ChainError::InvalidCoordinate(format!(
                "coordinate depth {} below minimum {min_depth} for shard {}",
                coord.depth(),
                self.shard_id
            )));
        }

        let expected_digits = shard_path_digits(self.shard_id, min_depth);
        let actual_prefix = &coord.path()[..min_depth as usize];
        if actual_prefix != expected_digits.as_slice() {
            return Err(ChainError::InvalidCoordinate(format!(
                "coordinate path prefix does not encode shard {}",
                self.shard_id
            )));
        }

        Ok(())
    }

    fn validate_pow(&self, block: &Block) -> Result<(), ChainError> {
        let hash = block
            .block_hash
            .as_ref()
            .ok_or_else(|| ChainError::ConsensusViolation("block not mined".into()))?;
        if !meets_difficulty(hash, block.header.difficulty) {
            return Err(ChainError::ConsensusViolation("invalid proof-of-work".into()));
        }
        Ok(())
    }

    fn validate_cross_refs(&self, block: &Block) -> Result<(), ChainError> {
        for reference in block.header.cross_shard_refs.values() {
            if reference.split_once('|').is_none() {
                return Err(ChainError::InvalidCrossRef(reference.clone()));
            }
        }
        Ok(())
    }

    pub fn min_timestamp(&self, prev_timestamp: u64) -> u64 {
        prev_timestamp
    }

    pub fn max_timestamp(&self, now: u64) -> u64 {
        now + MAX_TIMESTAMP_DRIFT_SECS
    }

    /// Full per-block check order: shard match and coordinate legality,
    /// expected difficulty, timestamp bounds, cross-reference format, PoW.
    pub fn validate_block(&self, block: &Block, prev_timestamp: Option<u64>, now: u64) -> Result<(), ChainError> {
        self.validate_coordinate(block)?;

        let expected_difficulty = self.next_difficulty();
        if block.header.difficulty != expected_difficulty {
            return Err(ChainError::ConsensusViolation(format!(
                "expected difficulty {expected_difficulty}, got {}",
                block.header.difficulty
            )));
        }

        if let Some(prev_ts) = prev_timestamp {
            if block.header.timestamp < self.min_timestamp(prev_ts) {
                return Err(ChainError::ConsensusViolation("timestamp before previous block".into()));
            }
        }
        if block.header.timestamp > self.max_timestamp(now) {
            return Err(ChainError::ConsensusViolation("timestamp too far in the future".into()));
        }

        self.validate_cross_refs(block)?;
        self.validate_pow(block)?;
        Ok(())
    }

    /// Sliding-window difficulty retarget: average block time over the
    /// window drives a clamped multiplicative adjustment toward
    /// `TARGET_BLOCK_TIME_SECS`, never dropping below `INITIAL_DIFFICULTY`.
    pub fn next_difficulty(&self) -> u32 {
        if self.recent_blocks.len() < self.window {
            return self.last_difficulty;
        }

        let window = &self.recent_blocks[self.recent_blocks.len().saturating_sub(self.window)..];
        let first = window.first().unwrap();
        let last = window.last().unwrap();
        let time_span = last.1.saturating_sub(first.1);
        let intervals = (window.len() - 1) as u64;
        let avg_block_time = if intervals == 0 { TARGET_BLOCK_TIME_SECS } else { time_span / intervals };

        if avg_block_time == 0 {
            return ((self.last_difficulty as f64) * MAX_DIFFICULTY_CHANGE) as u32;
        }

        let adjustment = (TARGET_BLOCK_TIME_SECS as f64 / avg_block_time as f64)
            .clamp(1.0 / MAX_DIFFICULTY_CHANGE, MAX_DIFFICULTY_CHANGE);

        let new_difficulty = (self.last_difficulty as f64 * adjustment) as u32;
        new_difficulty.max(INITIAL_DIFFICULTY)
    }

    /// A retarget is legal only at window boundaries; difficulty must stay
    /// fixed on every other height.
    pub fn validate_difficulty_transition(&self, height: u64, prev_difficulty: u32, new_difficulty: u32) -> Result<(), ChainError> {
        let is_retarget_height = height % self.window as u64 == 0;
        if !is_retarget_height && new_difficulty != prev_difficulty {
            return Err(ChainError::ConsensusViolation(
                "difficulty changed outside of an adjustment window boundary".into(),
            ));
        }
        Ok(())
    }
}

/// The first `depth` binary digits of `shard_id`, most-significant first.
fn shard_path_digits(shard_id: u32, depth: u32) -> Vec<u8> {
    (0..depth)
        .map(|i| {
            let shift = depth - 1 - i;
            ((shard_id >> shift) & 1) as u8
        })
        .collect()
}
