//! Interfaces the ledger consumes from the node: the network layer and the
//! holder of the validator signing key.

use thiserror::Error;
use vex_crypto::{CryptoError, Keypair};
use vex_types::{Address, Block, Ed25519PublicKey, Transaction};

#[derive(Debug, Error, Clone, PartialEq)]
#[error("{0}")]
pub struct NetworkError(pub String);

/// Outbound gossip and inbound synchronisation.
///
/// Broadcasts are fire-and-forget from the ledger's point of view: an error
/// only queues the payload for a later retry.
pub trait NetworkCollaborator: Send + Sync {
    fn broadcast_block(&self, block: &Block) -> Result<(), NetworkError>;

    fn broadcast_transaction(&self, tx: &Transaction) -> Result<(), NetworkError>;

    /// The best chain a peer offers, empty if none.
    fn sync_blockchain(&self) -> Result<Vec<Block>, NetworkError>;

    /// Transactions pending at peers.
    fn sync_mempool(&self) -> Result<Vec<Transaction>, NetworkError>;
}

/// Supplies the local validator's public key and signs blocks with it.
pub trait KeyProvider: Send + Sync {
    fn public_key(&self) -> Ed25519PublicKey;

    fn address(&self) -> Address {
        self.public_key().to_address()
    }

    fn sign_block(&self, block: &mut Block) -> Result<(), CryptoError>;
}

impl KeyProvider for Keypair {
    fn public_key(&self) -> Ed25519PublicKey {
        Keypair::public_key(self)
    }

    fn sign_block(&self, block: &mut Block) -> Result<(), CryptoError> {
        Keypair::sign_block(self, block)
    }
}
