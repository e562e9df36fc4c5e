//! VEX Crypto - ed25519 signing for the VEX ledger.
//!
//! This crate provides:
//! - Ed25519 keypairs (seed import/export)
//! - Transaction and block signing over their content hashes
//! - Signature verification with sender/validator binding

pub mod ed25519;
pub mod error;

pub use ed25519::{verify, verify_block, verify_transaction, Keypair};
pub use error::CryptoError;
