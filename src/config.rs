//! Runtime configuration, loaded from TOML with defaults for every field.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub target_block_time_secs: u64,
    pub difficulty_adjustment_window: usize,
    pub max_difficulty_change: f64,
    pub initial_difficulty: u32,
    pub max_timestamp_drift_secs: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig {
            target_block_time_secs: crate::consensus::TARGET_BLOCK_TIME_SECS,
            difficulty_adjustment_window: crate::consensus::DIFFICULTY_ADJUSTMENT_WINDOW,
            max_difficulty_change: crate::consensus::MAX_DIFFICULTY_CHANGE,
            initial_difficulty: crate::consensus::INITIAL_DIFFICULTY,
            max_timestamp_drift_secs: crate::consensus::MAX_TIMESTAMP_DRIFT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    pub max_size: usize,
    pub min_fee_per_byte: f64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        MempoolConfig {
            max_size: crate::mempool::DEFAULT_MAX_SIZE,
            min_fee_per_byte: crate::mempool::DEFAULT_MIN_FEE_PER_BYTE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    pub grid_size: f64,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        SpatialConfig { grid_size: 0.1 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub consensus: ConsensusConfig,
    pub mempool: MempoolConfig,
    pub spatial: SpatialConfig,
}

impl Config {
    pub fn load(path: &str) -> Result<Self, crate::error::ChainError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| crate::error::ChainError::Collaborator(format!("reading config {path}: {e}")))?;
        toml::from_str(&contents)
            .map_err(|e| crate::error::ChainError::Collaborator(format!("parsing config {path}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_module_constants() {
        let config = Config::default();
        assert_eq!(config.consensus.initial_difficulty, crate::consensus::INITIAL_DIFFICULTY);
        assert_eq!(config.mempool.max_size, crate::mempool::DEFAULT_MAX_SIZE);
        assert_eq!(config.spatial.grid_size, 0.1);
    }

    #[test]
    fn partial_toml_fills_remaining_fields_from_defaults() {
        let partial = "[mempool]\nmax_size = 10\n";
        let config: Config = toml::from_str(partial).unwrap();
        assert_eq!(config.mempool.max_size, 10);
        assert_eq!(config.consensus.initial_difficulty, crate::consensus::INITIAL_DIFFICULTY);
    }
}
