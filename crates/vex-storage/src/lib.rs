//! VEX Storage - Persistent storage on RocksDB.
//!
//! - [`Database`]: RocksDB column families with atomic batches
//! - [`StateStore`]: accounts, validators, contracts and contract storage
//! - [`BlockStore`]: blocks with hash and transaction indexes

pub mod block_store;
pub mod db;
pub mod error;
pub mod state;

pub use block_store::BlockStore;
pub use db::{ColumnFamily, Database, DatabaseConfig, WriteBatch};
pub use error::{StateError, StorageError};
pub use state::{ContractStorage, StateStore, WorldState};
