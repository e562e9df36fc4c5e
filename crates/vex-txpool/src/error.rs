use thiserror::Error;
use vex_storage::StorageError;

/// Errors that can occur in the transaction pool.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PoolError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Transaction already exists: {0}")]
    DuplicateTransaction(String),

    #[error("Transaction pool full: {0} entries")]
    PoolFull(usize),

    #[error("Insufficient balance: have {have}, want {want}")]
    InsufficientBalance { have: u128, want: u128 },

    #[error("Unexpected nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: u64, got: u64 },

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Reward transactions are not accepted")]
    RewardNotAllowed,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
