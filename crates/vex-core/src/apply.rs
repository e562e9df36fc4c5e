//! State transitions for transactions and blocks.
//!
//! Everything here works on a working copy of [`WorldState`]; the caller
//! decides whether to commit it, so a failure anywhere leaves the live state
//! alone.

use crate::error::CoreError;
use vex_consensus::{stake_in, unstake_in};
use vex_storage::WorldState;
use vex_types::{Address, Amount, Block, Contract, Transaction, TxKind};
use vex_vm::{ContractVM, ExecutionResult};

/// Apply one transaction.
///
/// Rewards only credit the recipient. Every other kind checks the sender's
/// nonce, pays the fee and bumps the nonce. Contract kinds return the VM
/// result; a failed execution is an error.
pub fn apply_transaction(
    world: &mut WorldState,
    tx: &Transaction,
    block_number: u64,
    timestamp: u64,
) -> Result<Option<ExecutionResult>, CoreError> {
    if matches!(tx.kind, TxKind::Reward) {
        world.credit(&tx.recipient, tx.amount)?;
        return Ok(None);
    }

    world.check_nonce(&tx.sender, tx.nonce)?;

    let mut execution = None;
    match &tx.kind {
        TxKind::Normal => {
            world.debit(&tx.sender, tx.total_cost())?;
            world.credit(&tx.recipient, tx.amount)?;
        }
        TxKind::Stake => {
            let public_key = tx
                .public_key
                .ok_or_else(|| CoreError::InvalidSignature(format!("stake {} carries no key", tx.tx_hash)))?;
            world.debit(&tx.sender, tx.fee)?;
            stake_in(world, public_key, tx.amount, timestamp)?;
        }
        TxKind::Unstake => {
            world.debit(&tx.sender, tx.fee)?;
            unstake_in(world, &tx.sender, tx.amount)?;
        }
        TxKind::Create { .. } | TxKind::Call { .. } => {
            let target = match &tx.kind {
                TxKind::Call {
                    contract_address, ..
                } => *contract_address,
                _ => Contract::derive_address(&tx.sender, &tx.tx_hash),
            };
            world.debit(&tx.sender, tx.total_cost())?;
            world.credit(&target, tx.amount)?;

            let result = ContractVM::execute_in(world, tx, block_number, timestamp);
            if !result.success {
                return Err(match result.error {
                    Some(e) => e.into(),
                    None => CoreError::ContractFailed(format!("{} failed", tx.tx_hash)),
                });
            }
            execution = Some(result);
        }
        TxKind::Reward => {}
    }

    world.increment_nonce(&tx.sender);
    Ok(execution)
}

/// Credit the producer and refresh its activity.
pub fn reward_validator(
    world: &mut WorldState,
    validator: &Address,
    reward: Amount,
    timestamp: u64,
) -> Result<(), CoreError> {
    world.credit(validator, reward)?;
    world.touch_validator(validator, timestamp)?;
    Ok(())
}

/// Apply every transaction of `block`, then the block reward for non-genesis
/// blocks. Non-genesis blocks need a validator with positive stake.
pub fn apply_block(world: &mut WorldState, block: &Block, base_reward: Amount) -> Result<(), CoreError> {
    if block.index > 0 {
        let stake = world.stake_of(&block.validator);
        if stake == 0 {
            return Err(CoreError::InsufficientStake {
                required: 1,
                available: 0,
            });
        }
    }

    for tx in &block.transactions {
        apply_transaction(world, tx, block.index, block.timestamp)?;
    }

    if block.index > 0 {
        let reward = base_reward.saturating_add(block.total_fees());
        reward_validator(world, &block.validator, reward, block.timestamp)?;
    }
    Ok(())
}

/// World state produced by a chain from an empty start.
pub fn replay(chain: &[Block], base_reward: Amount) -> Result<WorldState, CoreError> {
    let mut world = WorldState::default();
    for block in chain {
        apply_block(&mut world, block, base_reward)?;
    }
    Ok(world)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vex_crypto::Keypair;
    use vex_types::{Hash, VEX};

    fn signed(kp: &Keypair, mut tx: Transaction) -> Transaction {
        kp.sign_transaction(&mut tx).unwrap();
        tx
    }

    fn other() -> Address {
        Address::from_bytes([9u8; 20])
    }

    #[test]
    fn test_normal_transfer() {
        let kp = Keypair::generate();
        let mut world = WorldState::default();
        world.set_balance(&kp.address(), 100);

        let tx = signed(&kp, Transaction::transfer(kp.address(), other(), 30, 1).with_fee(5));
        assert!(apply_transaction(&mut world, &tx, 1, 1).unwrap().is_none());
        assert_eq!(world.balance(&kp.address()), 65);
        assert_eq!(world.balance(&other()), 30);
        assert_eq!(world.nonce(&kp.address()), 1);
    }

    #[test]
    fn test_nonce_and_balance_failures() {
        let kp = Keypair::generate();
        let mut world = WorldState::default();
        world.set_balance(&kp.address(), 10);

        let tx = signed(&kp, Transaction::transfer(kp.address(), other(), 1, 2));
        assert_eq!(
            apply_transaction(&mut world, &tx, 1, 1),
            Err(CoreError::NonceConflict { expected: 1, got: 2 })
        );

        let tx = signed(&kp, Transaction::transfer(kp.address(), other(), 11, 1));
        assert!(matches!(
            apply_transaction(&mut world, &tx, 1, 1),
            Err(CoreError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_reward_skips_nonce() {
        let mut world = WorldState::default();
        let tx = Transaction::reward(other(), 7);
        apply_transaction(&mut world, &tx, 0, 0).unwrap();
        apply_transaction(&mut world, &tx, 0, 0).unwrap();
        assert_eq!(world.balance(&other()), 14);
    }

    #[test]
    fn test_stake_and_unstake() {
        let kp = Keypair::generate();
        let mut world = WorldState::default();
        world.set_balance(&kp.address(), 100);

        let stake = signed(&kp, Transaction::stake(kp.address(), 60, 1).with_fee(1));
        apply_transaction(&mut world, &stake, 1, 50).unwrap();
        assert_eq!(world.balance(&kp.address()), 39);
        assert_eq!(world.stake_of(&kp.address()), 60);
        assert_eq!(world.validator(&kp.address()).unwrap().last_active, 50);

        let too_much = signed(&kp, Transaction::unstake(kp.address(), 61, 2));
        assert!(matches!(
            apply_transaction(&mut world, &too_much, 2, 60),
            Err(CoreError::InsufficientStake { .. })
        ));

        let unstake = signed(&kp, Transaction::unstake(kp.address(), 20, 2));
        apply_transaction(&mut world, &unstake, 2, 60).unwrap();
        assert_eq!(world.balance(&kp.address()), 59);
        assert_eq!(world.stake_of(&kp.address()), 40);
    }

    #[test]
    fn test_contract_failure_is_an_error() {
        let kp = Keypair::generate();
        let mut world = WorldState::default();
        world.set_balance(&kp.address(), 100);

        let revert = signed(&kp, Transaction::create(kp.address(), "REVERT nope", 1));
        assert!(matches!(
            apply_transaction(&mut world, &revert, 1, 1),
            Err(CoreError::ContractFailed(_))
        ));

        let starved = signed(
            &kp,
            Transaction::create(kp.address(), "SSTORE x 1", 1).with_gas(100, 1),
        );
        assert!(matches!(
            apply_transaction(&mut world, &starved, 1, 1),
            Err(CoreError::OutOfGas { .. })
        ));
    }

    #[test]
    fn test_contract_deploy_and_call() {
        let kp = Keypair::generate();
        let mut world = WorldState::default();
        world.set_balance(&kp.address(), 100);

        let deploy = signed(&kp, Transaction::create(kp.address(), "SSTORE counter 1", 1));
        let result = apply_transaction(&mut world, &deploy, 1, 1).unwrap().unwrap();
        let contract = result.contract_address.unwrap();
        assert_eq!(contract, Contract::derive_address(&kp.address(), &deploy.tx_hash));
        assert_eq!(world.contract_storage(&contract).get("counter"), Some(&1));

        let call = signed(
            &kp,
            Transaction::call(kp.address(), contract, "bump", Default::default(), 2).with_amount(10),
        );
        apply_transaction(&mut world, &call, 2, 2).unwrap();
        assert_eq!(world.balance(&contract), 10);
        assert_eq!(world.balance(&kp.address()), 90);
        assert_eq!(world.nonce(&kp.address()), 2);
    }

    #[test]
    fn test_apply_block_rewards_validator() {
        let kp = Keypair::generate();
        let mut world = WorldState::default();
        world.set_balance(&kp.address(), 100);
        vex_consensus::stake_in(&mut world, kp.public_key(), 50, 0).unwrap();

        let tx = signed(&kp, Transaction::transfer(kp.address(), other(), 10, 1).with_fee(3));
        let mut block = Block::new(1, Hash::ZERO, vec![tx], kp.public_key(), 50, 99);
        kp.sign_block(&mut block).unwrap();

        apply_block(&mut world, &block, 2 * VEX).unwrap();
        assert_eq!(world.balance(&kp.address()), 50 - 13 + 2 * VEX + 3);
        assert_eq!(world.validator(&kp.address()).unwrap().last_active, 99);
    }

    #[test]
    fn test_apply_block_needs_stake() {
        let kp = Keypair::generate();
        let mut world = WorldState::default();
        let block = Block::new(1, Hash::ZERO, vec![], kp.public_key(), 0, 1);
        assert!(matches!(
            apply_block(&mut world, &block, 1),
            Err(CoreError::InsufficientStake { .. })
        ));
    }
}
