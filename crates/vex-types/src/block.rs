use crate::address::Address;
use crate::hash::Hash;
use crate::signature::{Ed25519PublicKey, Ed25519Signature};
use crate::transaction::Transaction;
use crate::Amount;
use std::fmt;

/// Legacy proof-of-work difficulty, kept for hash and weight derivation.
pub const DEFAULT_DIFFICULTY: u64 = 4;

/// A block of the chain.
///
/// `hash` covers index, timestamp, transactions digest, previous hash,
/// validator and stake. The signature is the validator's ed25519 signature
/// over the hash bytes; `validator_key` makes it self-certifying.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    /// Height, strictly sequential from 0
    pub index: u64,
    /// Unix milliseconds
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
    /// Parent hash, `Hash::ZERO` for genesis
    pub previous_hash: Hash,
    /// blake3 over the concatenated transaction hashes
    pub transactions_hash: Hash,
    pub nonce: u64,
    pub difficulty: u64,
    pub validator: Address,
    pub validator_key: Ed25519PublicKey,
    /// Stake backing the signature at production time
    pub stake_amount: Amount,
    pub signature: Option<Ed25519Signature>,
    pub hash: Hash,
}

impl Block {
    /// Create an unsigned block. The validator address is derived from the key.
    pub fn new(
        index: u64,
        previous_hash: Hash,
        transactions: Vec<Transaction>,
        validator_key: Ed25519PublicKey,
        stake_amount: Amount,
        timestamp: u64,
    ) -> Self {
        let mut block = Self {
            index,
            timestamp,
            transactions_hash: Self::transactions_digest(&transactions),
            transactions,
            previous_hash,
            nonce: 0,
            difficulty: DEFAULT_DIFFICULTY,
            validator: validator_key.to_address(),
            validator_key,
            stake_amount,
            signature: None,
            hash: Hash::ZERO,
        };
        block.hash = block.calculate_hash();
        block
    }

    /// Digest over the ordered transaction hashes.
    pub fn transactions_digest(transactions: &[Transaction]) -> Hash {
        let mut hasher = blake3::Hasher::new();
        for tx in transactions {
            hasher.update(tx.tx_hash.as_bytes());
        }
        Hash::from_bytes(*hasher.finalize().as_bytes())
    }

    /// Recompute the block hash from the hashed field set.
    pub fn calculate_hash(&self) -> Hash {
        let mut data = Vec::with_capacity(8 + 8 + 32 + 32 + 20 + 16 + 16);
        data.extend_from_slice(&self.index.to_le_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(self.transactions_hash.as_bytes());
        data.extend_from_slice(self.previous_hash.as_bytes());
        data.extend_from_slice(self.validator.as_bytes());
        data.extend_from_slice(&self.stake_amount.to_le_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        data.extend_from_slice(&self.difficulty.to_le_bytes());
        Hash::compute(&data)
    }

    /// True if both the stored digest and the stored hash match the contents.
    pub fn hash_matches(&self) -> bool {
        self.transactions_hash == Self::transactions_digest(&self.transactions)
            && self.hash == self.calculate_hash()
    }

    /// Index 0 with the sentinel previous hash.
    pub fn is_genesis_shape(&self) -> bool {
        self.index == 0 && self.previous_hash.is_zero()
    }

    /// Fork-choice weight of this block.
    pub fn weight(&self) -> u128 {
        self.stake_amount.saturating_add(self.difficulty as u128)
    }

    /// Sum of the fees of the included transactions.
    pub fn total_fees(&self) -> Amount {
        self.transactions
            .iter()
            .fold(0, |acc: Amount, tx| acc.saturating_add(tx.fee))
    }

    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block #{} {{ hash: {}, txs: {}, validator: {:x} }}",
            self.index,
            self.hash,
            self.transactions.len(),
            self.validator
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> Ed25519PublicKey {
        Ed25519PublicKey::from_bytes([3u8; 32])
    }

    fn tx(nonce: u64) -> Transaction {
        Transaction::transfer(
            Address::from_bytes([1u8; 20]),
            Address::from_bytes([2u8; 20]),
            10,
            nonce,
        )
        .with_timestamp(1_000)
    }

    #[test]
    fn test_block_creation() {
        let block = Block::new(1, Hash::compute(b"parent"), vec![tx(1)], key(), 500, 42);
        assert_eq!(block.validator, key().to_address());
        assert_eq!(block.difficulty, DEFAULT_DIFFICULTY);
        assert!(block.hash_matches());
        assert!(!block.is_genesis_shape());
        assert_eq!(block.weight(), 504);
    }

    #[test]
    fn test_empty_block_digest() {
        assert_eq!(Block::transactions_digest(&[]), Hash::compute(b""));
    }

    #[test]
    fn test_digest_depends_on_order() {
        let a = Block::transactions_digest(&[tx(1), tx(2)]);
        let b = Block::transactions_digest(&[tx(2), tx(1)]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampering_breaks_hash() {
        let mut block = Block::new(0, Hash::ZERO, vec![tx(1)], key(), 1, 7);
        assert!(block.is_genesis_shape());

        block.transactions.push(tx(2));
        assert!(!block.hash_matches());

        let mut block = Block::new(0, Hash::ZERO, vec![], key(), 1, 7);
        block.stake_amount = 2;
        assert!(!block.hash_matches());
    }

    #[test]
    fn test_total_fees() {
        let block = Block::new(
            1,
            Hash::ZERO,
            vec![tx(1).with_fee(3), tx(2).with_fee(4)],
            key(),
            1,
            0,
        );
        assert_eq!(block.total_fees(), 7);
    }
}
