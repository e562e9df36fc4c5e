use vex_types::Amount;

/// Storage error
#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    Io(String),
    Serialization(String),
    NotFound(String),
    InvalidColumnFamily(String),
    Database(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Io(s) => write!(f, "IO error: {}", s),
            StorageError::Serialization(s) => write!(f, "Serialization error: {}", s),
            StorageError::NotFound(s) => write!(f, "Not found: {}", s),
            StorageError::InvalidColumnFamily(s) => write!(f, "Invalid column family: {}", s),
            StorageError::Database(s) => write!(f, "Database error: {}", s),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Errors raised by state transitions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StateError {
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Amount, available: Amount },

    #[error("Insufficient stake: required {required}, available {available}")]
    InsufficientStake { required: Amount, available: Amount },

    #[error("Nonce conflict: expected {expected}, got {got}")]
    NonceConflict { expected: u64, got: u64 },

    #[error("Unknown validator: {0}")]
    UnknownValidator(String),

    #[error("Balance overflow for {0}")]
    Overflow(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
