//! VEX Types - Core type definitions for the VEX ledger.
//!
//! This crate provides the fundamental types used throughout the ledger:
//! - Addresses (20-byte, Bech32m encoded)
//! - Hashes (32-byte, blake3 digests)
//! - Transactions and blocks, with their wire shapes
//! - Accounts, validators and contracts

pub mod account;
pub mod address;
pub mod block;
pub mod error;
pub mod hash;
pub mod signature;
pub mod transaction;

mod serialization;

pub use account::{Account, Contract, Validator};
pub use address::Address;
pub use block::{Block, DEFAULT_DIFFICULTY};
pub use error::TypesError;
pub use hash::Hash;
pub use serialization::{BlockWire, TransactionWire, GENESIS_PREVIOUS_HASH};
pub use signature::{Ed25519PublicKey, Ed25519Signature};
pub use transaction::{
    CallArgs, Transaction, TxKind, DEFAULT_GAS_LIMIT, DEFAULT_GAS_PRICE, MINT_ADDRESS,
};

/// Token amount in base units.
pub type Amount = u128;

/// Base units per VEX.
pub const VEX: Amount = 1_000_000_000_000_000_000;

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        now_millis, Account, Address, Amount, Block, CallArgs, Contract, Ed25519PublicKey,
        Ed25519Signature, Hash, Transaction, TxKind, TypesError, Validator, VEX,
    };
}
