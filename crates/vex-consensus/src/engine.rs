//! Stake-weighted validator selection and chain validation.

use crate::error::ConsensusError;
use crate::validator::ValidatorRegistry;
use rand::Rng;
use vex_types::{Amount, Block, Transaction, TxKind, Validator};

/// Proof-of-stake consensus engine.
#[derive(Clone)]
pub struct ConsensusEngine {
    registry: ValidatorRegistry,
}

impl ConsensusEngine {
    pub fn new(registry: ValidatorRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }

    /// Pick the next block producer from the active set.
    pub fn select_validator(&self, now: u64) -> Result<Validator, ConsensusError> {
        self.select_validator_with(&mut rand::thread_rng(), now)
    }

    pub fn select_validator_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        now: u64,
    ) -> Result<Validator, ConsensusError> {
        let active = self.registry.active_validators(now);
        let selected = select_from(&active, rng)?;
        tracing::debug!(
            validator = %selected.address,
            stake = selected.stake,
            candidates = active.len(),
            "Validator selected"
        );
        Ok(selected)
    }

    /// Hash and signature of a single transaction. Reward transactions carry
    /// no signature.
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<(), ConsensusError> {
        verify_transaction(tx)
    }

    /// Validate `block` as the successor of `previous`.
    ///
    /// Checks run in order and stop at the first failure: index, previous
    /// hash, hash, signature, transactions.
    pub fn is_valid(&self, block: &Block, previous: &Block) -> Result<(), ConsensusError> {
        let expected = previous.index + 1;
        if block.index != expected {
            return Err(ConsensusError::InvalidIndex {
                expected,
                actual: block.index,
            });
        }
        if block.previous_hash != previous.hash {
            return Err(ConsensusError::InvalidPreviousHash(block.index));
        }
        check_sealed(block)?;
        for tx in &block.transactions {
            if matches!(tx.kind, TxKind::Reward) {
                return Err(ConsensusError::RewardOutsideGenesis(block.index));
            }
            verify_transaction(tx)?;
        }
        Ok(())
    }

    /// Genesis shape, hash, signature and transactions of block 0.
    pub fn validate_genesis(&self, block: &Block) -> Result<(), ConsensusError> {
        if !block.is_genesis_shape() {
            return Err(ConsensusError::InvalidGenesis(format!(
                "index {} with previous hash {}",
                block.index, block.previous_hash
            )));
        }
        check_sealed(block)?;
        for tx in &block.transactions {
            verify_transaction(tx)?;
        }
        Ok(())
    }

    /// Structural validity of a whole chain, from genesis through every
    /// adjacent pair. State effects are not replayed here.
    pub fn is_chain_valid(&self, chain: &[Block]) -> Result<(), ConsensusError> {
        let genesis = chain.first().ok_or(ConsensusError::EmptyChain)?;
        self.validate_genesis(genesis)?;
        for pair in chain.windows(2) {
            self.is_valid(&pair[1], &pair[0])?;
        }
        Ok(())
    }
}

/// Weighted draw over `validators` in order: a uniform point in
/// `[0, total_stake)` lands on the first validator whose cumulative stake
/// exceeds it.
pub fn select_from<R: Rng + ?Sized>(
    validators: &[Validator],
    rng: &mut R,
) -> Result<Validator, ConsensusError> {
    let total = validators
        .iter()
        .fold(0, |acc: Amount, v| acc.saturating_add(v.stake));
    if total == 0 {
        return Err(ConsensusError::NoActiveValidator);
    }

    let point = rng.gen_range(0..total);
    let mut cumulative: Amount = 0;
    for validator in validators {
        cumulative = cumulative.saturating_add(validator.stake);
        if cumulative > point {
            return Ok(validator.clone());
        }
    }
    Err(ConsensusError::NoActiveValidator)
}

/// Sum of block weights.
pub fn cumulative_weight(chain: &[Block]) -> u128 {
    chain
        .iter()
        .fold(0, |acc: u128, block| acc.saturating_add(block.weight()))
}

fn check_sealed(block: &Block) -> Result<(), ConsensusError> {
    if !block.hash_matches() {
        return Err(ConsensusError::HashMismatch(block.index));
    }
    vex_crypto::verify_block(block).map_err(|reason| ConsensusError::InvalidSignature {
        index: block.index,
        reason,
    })
}

fn verify_transaction(tx: &Transaction) -> Result<(), ConsensusError> {
    if !tx.hash_matches() {
        return Err(ConsensusError::InvalidTransaction {
            tx: tx.tx_hash.to_string(),
            reason: "hash mismatch".into(),
        });
    }
    if tx.kind.requires_signature() {
        vex_crypto::verify_transaction(tx).map_err(|e| ConsensusError::InvalidTransaction {
            tx: tx.tx_hash.to_string(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}
