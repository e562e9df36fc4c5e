use thiserror::Error;
use vex_crypto::CryptoError;
use vex_storage::StateError;

/// Errors that can occur in consensus operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConsensusError {
    #[error("No active validator with positive stake")]
    NoActiveValidator,

    #[error("Invalid index: expected {expected}, got {actual}")]
    InvalidIndex { expected: u64, actual: u64 },

    #[error("Previous hash mismatch at block {0}")]
    InvalidPreviousHash(u64),

    #[error("Hash mismatch at block {0}")]
    HashMismatch(u64),

    #[error("Invalid block signature at block {index}: {reason}")]
    InvalidSignature { index: u64, reason: CryptoError },

    #[error("Invalid transaction {tx}: {reason}")]
    InvalidTransaction { tx: String, reason: String },

    #[error("Reward transaction outside genesis at block {0}")]
    RewardOutsideGenesis(u64),

    #[error("Invalid genesis block: {0}")]
    InvalidGenesis(String),

    #[error("Empty chain")]
    EmptyChain,

    #[error("Validator not found: {0}")]
    ValidatorNotFound(String),

    #[error("State error: {0}")]
    State(#[from] StateError),
}
