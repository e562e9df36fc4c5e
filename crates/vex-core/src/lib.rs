//! VEX Core - Ledger state machine.
//!
//! Ties the state store, consensus engine, VM and transaction pool together:
//! genesis creation, local block production, external block ingestion and
//! fork choice.

pub mod apply;
pub mod collaborator;
pub mod error;
pub mod genesis;
pub mod ledger;

pub use apply::{apply_block, apply_transaction, replay, reward_validator};
pub use collaborator::{KeyProvider, NetworkCollaborator, NetworkError};
pub use error::CoreError;
pub use genesis::{build_genesis, GenesisConfig, DEFAULT_GENESIS_STAKE};
pub use ledger::{
    Ledger, LedgerConfig, LedgerPhase, DEFAULT_BASE_REWARD, DEFAULT_MAX_BLOCK_TRANSACTIONS,
};
