//! Error types for the fractal chain core.

use thiserror::Error;

/// Errors produced by the coordinate, UTXO, transaction, mempool, block,
/// consensus, validator and chain-engine layers.
///
/// Construction-time and validation-time failures are always reported
/// through this type rather than panicking; see the module-level docs on
/// [`crate::validator`] for the policy on partial mutation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("input UTXO {0} not found")]
    InputMissing(String),

    #[error("input UTXO {0} already spent in mempool")]
    InputSpent(String),

    #[error("invalid signature for UTXO {0}")]
    BadSignature(String),

    #[error("transaction outputs exceed inputs")]
    Overspend,

    #[error("bad script: {0}")]
    BadScript(String),

    #[error("cross-shard proof invalid: {0}")]
    ProofInvalid(String),

    #[error("block parent unknown: {0}")]
    MissingParent(String),

    #[error("consensus violation: {0}")]
    ConsensusViolation(String),

    #[error("invalid cross-shard reference: {0}")]
    InvalidCrossRef(String),

    #[error("duplicate UTXO: {0}")]
    DuplicateUtxo(String),

    #[error("unknown UTXO: {0}")]
    UnknownUtxo(String),

    #[error("mempool is full")]
    MempoolFull,

    #[error("fee per byte too low")]
    FeeTooLow,

    #[error("transaction already in mempool")]
    AlreadyInMempool,

    #[error("collaborator error: {0}")]
    Collaborator(String),
}
