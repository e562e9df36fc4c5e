//! Genesis block construction.

use crate::error::CoreError;
use vex_crypto::Keypair;
use vex_types::{Address, Amount, Block, Hash, Transaction, VEX};

/// Stake minted to the genesis validator by default.
pub const DEFAULT_GENESIS_STAKE: Amount = 1_000_000 * VEX;

/// Genesis parameters.
#[derive(Debug, Clone)]
pub struct GenesisConfig {
    /// Initial balances
    pub alloc: Vec<(Address, Amount)>,
    /// Stake minted to and locked by the genesis validator
    pub stake: Amount,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            alloc: Vec::new(),
            stake: DEFAULT_GENESIS_STAKE,
        }
    }
}

/// Build and sign block 0.
///
/// It holds one reward per allocation, a reward minting the bootstrap stake
/// to the validator and the validator's signed stake of that amount.
pub fn build_genesis(key: &Keypair, config: &GenesisConfig, timestamp: u64) -> Result<Block, CoreError> {
    let mut transactions: Vec<Transaction> = config
        .alloc
        .iter()
        .map(|(address, amount)| Transaction::reward(*address, *amount).with_timestamp(timestamp))
        .collect();

    transactions.push(Transaction::reward(key.address(), config.stake).with_timestamp(timestamp));

    let mut stake = Transaction::stake(key.address(), config.stake, 1).with_timestamp(timestamp);
    key.sign_transaction(&mut stake)?;
    transactions.push(stake);

    let mut block = Block::new(0, Hash::ZERO, transactions, key.public_key(), config.stake, timestamp);
    key.sign_block(&mut block)?;
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::replay;
    use vex_types::TxKind;

    #[test]
    fn test_genesis_shape() {
        let key = Keypair::generate();
        let alice = Address::from_bytes([1u8; 20]);
        let config = GenesisConfig {
            alloc: vec![(alice, 500)],
            stake: 1_000,
        };
        let genesis = build_genesis(&key, &config, 42).unwrap();

        assert!(genesis.is_genesis_shape());
        assert!(genesis.hash_matches());
        vex_crypto::verify_block(&genesis).unwrap();
        assert_eq!(genesis.validator, key.address());
        assert_eq!(genesis.stake_amount, 1_000);

        let kinds: Vec<&str> = genesis.transactions.iter().map(|t| t.kind.contract_type()).collect();
        assert_eq!(kinds, vec!["REWARD", "REWARD", "STAKE"]);
        assert!(matches!(genesis.transactions[2].kind, TxKind::Stake));
    }

    #[test]
    fn test_genesis_state() {
        let key = Keypair::generate();
        let alice = Address::from_bytes([1u8; 20]);
        let config = GenesisConfig {
            alloc: vec![(alice, 500)],
            stake: 1_000,
        };
        let genesis = build_genesis(&key, &config, 42).unwrap();
        let world = replay(&[genesis], 2).unwrap();

        assert_eq!(world.balance(&alice), 500);
        assert_eq!(world.balance(&key.address()), 0);
        assert_eq!(world.stake_of(&key.address()), 1_000);
        assert_eq!(world.nonce(&key.address()), 1);
        assert_eq!(world.validator(&key.address()).unwrap().last_active, 42);
    }
}
