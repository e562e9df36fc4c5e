use thiserror::Error;
use vex_consensus::ConsensusError;
use vex_crypto::CryptoError;
use vex_storage::{StateError, StorageError};
use vex_txpool::PoolError;
use vex_vm::VmError;

/// Errors that can occur in ledger operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u128, available: u128 },

    #[error("Insufficient stake: required {required}, available {available}")]
    InsufficientStake { required: u128, available: u128 },

    #[error("Nonce conflict: expected {expected}, got {got}")]
    NonceConflict { expected: u64, got: u64 },

    #[error("Out of gas: used {used}, limit {limit}")]
    OutOfGas { used: u64, limit: u64 },

    #[error("No active validator")]
    NoActiveValidator,

    #[error("Not the selected validator: selected {selected}, caller {caller}")]
    NotSelectedValidator { selected: String, caller: String },

    #[error("Contract execution failed: {0}")]
    ContractFailed(String),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Consensus error: {0}")]
    Consensus(ConsensusError),

    #[error("Transaction pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Network error: {0}")]
    Network(String),
}

impl CoreError {
    /// Whether the error came from the storage layer rather than from
    /// validating a block or transaction.
    pub fn is_persistence(&self) -> bool {
        matches!(self, CoreError::Persistence(_))
    }
}

impl From<StorageError> for CoreError {
    fn from(e: StorageError) -> Self {
        CoreError::Persistence(e.to_string())
    }
}

impl From<StateError> for CoreError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::InsufficientFunds {
                required,
                available,
            } => CoreError::InsufficientFunds {
                required,
                available,
            },
            StateError::InsufficientStake {
                required,
                available,
            } => CoreError::InsufficientStake {
                required,
                available,
            },
            StateError::NonceConflict { expected, got } => CoreError::NonceConflict { expected, got },
            StateError::Storage(e) => e.into(),
            other => CoreError::InvalidBlock(other.to_string()),
        }
    }
}

impl From<VmError> for CoreError {
    fn from(e: VmError) -> Self {
        match e {
            VmError::OutOfGas { used, limit } => CoreError::OutOfGas { used, limit },
            VmError::InsufficientBalance {
                required,
                available,
            } => CoreError::InsufficientFunds {
                required,
                available,
            },
            VmError::State(e) => e.into(),
            other => CoreError::ContractFailed(other.to_string()),
        }
    }
}

impl From<ConsensusError> for CoreError {
    fn from(e: ConsensusError) -> Self {
        match e {
            ConsensusError::NoActiveValidator => CoreError::NoActiveValidator,
            ConsensusError::InvalidSignature { index, reason } => {
                CoreError::InvalidSignature(format!("block {}: {}", index, reason))
            }
            ConsensusError::State(e) => e.into(),
            other => CoreError::Consensus(other),
        }
    }
}

impl From<CryptoError> for CoreError {
    fn from(e: CryptoError) -> Self {
        CoreError::InvalidSignature(e.to_string())
    }
}
