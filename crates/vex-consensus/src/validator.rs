//! Validator registry and stake management.
//!
//! Both are thin views over the [`StateStore`]; validator records live with
//! the rest of the world state so they roll back together.

use std::sync::Arc;

use vex_storage::{StateError, StateStore, WorldState};
use vex_types::{Address, Amount, Ed25519PublicKey, Validator};

/// Default activity window: 24 hours.
pub const DEFAULT_ACTIVITY_WINDOW_MS: u64 = 24 * 60 * 60 * 1000;

/// Share of stake removed by a slash, in percent.
pub const SLASH_RATE_PERCENT: u128 = 5;

/// Registered validators and their activity.
#[derive(Clone)]
pub struct ValidatorRegistry {
    state: Arc<StateStore>,
    activity_window_ms: u64,
}

impl ValidatorRegistry {
    pub fn new(state: Arc<StateStore>, activity_window_ms: u64) -> Self {
        Self {
            state,
            activity_window_ms,
        }
    }

    pub fn activity_window_ms(&self) -> u64 {
        self.activity_window_ms
    }

    /// Register or refresh a validator.
    pub fn register(&self, public_key: Ed25519PublicKey, now: u64) -> Result<Validator, StateError> {
        let validator = self.state.register_validator(public_key, now)?;
        tracing::debug!(validator = %validator.address, stake = validator.stake, "Validator registered");
        Ok(validator)
    }

    /// Validators with positive stake seen within the activity window, in
    /// registration order.
    pub fn active_validators(&self, now: u64) -> Vec<Validator> {
        self.state
            .read(|w| active_in(w, now, self.activity_window_ms))
    }

    pub fn total_active_stake(&self, now: u64) -> Amount {
        self.active_validators(now)
            .iter()
            .fold(0, |acc: Amount, v| acc.saturating_add(v.stake))
    }

    pub fn public_key(&self, address: &Address) -> Option<Ed25519PublicKey> {
        self.state.validator(address).map(|v| v.public_key)
    }

    pub fn stake(&self, address: &Address) -> Amount {
        self.state.read(|w| w.stake_of(address))
    }

    pub fn validator(&self, address: &Address) -> Option<Validator> {
        self.state.validator(address)
    }

    pub fn all(&self) -> Vec<Validator> {
        self.state.validators()
    }

    /// Refresh `last_active`.
    pub fn touch(&self, address: &Address, now: u64) -> Result<(), StateError> {
        self.state.touch_validator(address, now)
    }
}

/// Active validators of a world state.
pub fn active_in(world: &WorldState, now: u64, window_ms: u64) -> Vec<Validator> {
    world
        .validators
        .iter()
        .filter(|v| v.is_active(now, window_ms))
        .cloned()
        .collect()
}

/// Lock `amount` of the key owner's balance as stake, registering it.
pub fn stake_in(
    world: &mut WorldState,
    public_key: Ed25519PublicKey,
    amount: Amount,
    now: u64,
) -> Result<(), StateError> {
    let address = public_key.to_address();
    world.debit(&address, amount)?;
    world.register_validator(public_key, now);
    world.add_stake(&address, amount)
}

/// Release `amount` of stake back into the balance.
pub fn unstake_in(world: &mut WorldState, address: &Address, amount: Amount) -> Result<(), StateError> {
    world.remove_stake(address, amount)?;
    world.credit(address, amount)
}

/// Staking operations over the state store.
pub struct StakeManager {
    state: Arc<StateStore>,
}

impl StakeManager {
    pub fn new(state: Arc<StateStore>) -> Self {
        Self { state }
    }

    pub fn stake(&self, public_key: Ed25519PublicKey, amount: Amount, now: u64) -> Result<(), StateError> {
        self.state.update(|w| stake_in(w, public_key, amount, now))?;
        tracing::info!(validator = %public_key.to_address(), amount, "Stake locked");
        Ok(())
    }

    /// Fails with `InsufficientStake` unless stake ≥ amount.
    pub fn unstake(&self, address: &Address, amount: Amount) -> Result<(), StateError> {
        self.state.update(|w| unstake_in(w, address, amount))?;
        tracing::info!(validator = %address, amount, "Stake released");
        Ok(())
    }

    /// Remove [`SLASH_RATE_PERCENT`] of the validator's stake. Returns the penalty.
    pub fn slash(&self, address: &Address, reason: &str) -> Result<Amount, StateError> {
        let penalty = self.state.update(|w| {
            let stake = w.stake_of(address);
            let penalty = slash_penalty(stake);
            w.remove_stake(address, penalty)?;
            Ok::<_, StateError>(penalty)
        })?;
        tracing::warn!(validator = %address, penalty, reason, "Validator slashed");
        Ok(penalty)
    }
}

/// [`SLASH_RATE_PERCENT`] of `stake`, rounded down. Never overflows.
pub fn slash_penalty(stake: Amount) -> Amount {
    stake / 100 * SLASH_RATE_PERCENT + stake % 100 * SLASH_RATE_PERCENT / 100
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vex_storage::Database;

    fn key(b: u8) -> Ed25519PublicKey {
        Ed25519PublicKey::from_bytes([b; 32])
    }

    fn store(temp: &TempDir) -> Arc<StateStore> {
        Arc::new(StateStore::open(Arc::new(Database::open(temp.path()).unwrap())).unwrap())
    }

    #[test]
    fn test_active_validators_filters_stake_and_activity() {
        let temp = TempDir::new().unwrap();
        let state = store(&temp);
        let registry = ValidatorRegistry::new(state.clone(), 1_000);

        registry.register(key(1), 100).unwrap();
        registry.register(key(2), 100).unwrap();
        registry.register(key(3), 5_000).unwrap();
        state.add_stake(&key(1).to_address(), 10).unwrap();
        state.add_stake(&key(3).to_address(), 30).unwrap();

        let active: Vec<Address> = registry
            .active_validators(1_000)
            .iter()
            .map(|v| v.address)
            .collect();
        // key(2) has no stake
        assert_eq!(active, vec![key(1).to_address(), key(3).to_address()]);

        let later: Vec<Address> = registry
            .active_validators(5_500)
            .iter()
            .map(|v| v.address)
            .collect();
        assert_eq!(later, vec![key(3).to_address()]);
        assert_eq!(registry.total_active_stake(5_500), 30);

        registry.touch(&key(1).to_address(), 5_500).unwrap();
        assert_eq!(registry.active_validators(5_500).len(), 2);
    }

    #[test]
    fn test_registry_lookups() {
        let temp = TempDir::new().unwrap();
        let registry = ValidatorRegistry::new(store(&temp), DEFAULT_ACTIVITY_WINDOW_MS);
        registry.register(key(4), 0).unwrap();

        assert_eq!(registry.public_key(&key(4).to_address()), Some(key(4)));
        assert_eq!(registry.stake(&key(4).to_address()), 0);
        assert!(registry.public_key(&key(5).to_address()).is_none());
        assert_eq!(registry.all().len(), 1);
    }

    #[test]
    fn test_stake_and_unstake() {
        let temp = TempDir::new().unwrap();
        let state = store(&temp);
        let manager = StakeManager::new(state.clone());
        let address = key(1).to_address();

        assert!(matches!(
            manager.stake(key(1), 10, 0),
            Err(StateError::InsufficientFunds { .. })
        ));
        assert!(state.validators().is_empty());

        state.update_balance(&address, 100).unwrap();
        manager.stake(key(1), 60, 0).unwrap();
        assert_eq!(state.get_balance(&address), 40);
        assert_eq!(state.validator(&address).unwrap().stake, 60);

        assert!(matches!(
            manager.unstake(&address, 61),
            Err(StateError::InsufficientStake { .. })
        ));
        manager.unstake(&address, 20).unwrap();
        assert_eq!(state.get_balance(&address), 60);
        assert_eq!(state.validator(&address).unwrap().stake, 40);
    }

    #[test]
    fn test_slash_removes_five_percent() {
        let temp = TempDir::new().unwrap();
        let state = store(&temp);
        let manager = StakeManager::new(state.clone());
        let address = key(1).to_address();
        state.update_balance(&address, 1_000).unwrap();
        manager.stake(key(1), 1_000, 0).unwrap();

        assert_eq!(manager.slash(&address, "double sign").unwrap(), 50);
        assert_eq!(state.validator(&address).unwrap().stake, 950);
    }

    #[test]
    fn test_slash_penalty_rounds_down() {
        assert_eq!(slash_penalty(0), 0);
        assert_eq!(slash_penalty(19), 0);
        assert_eq!(slash_penalty(20), 1);
        assert_eq!(slash_penalty(1_039), 51);
    }

    #[test]
    fn test_slash_huge_stake_does_not_overflow() {
        let temp = TempDir::new().unwrap();
        let state = store(&temp);
        let manager = StakeManager::new(state.clone());
        let address = key(1).to_address();
        state.register_validator(key(1), 0).unwrap();
        state.add_stake(&address, u128::MAX).unwrap();

        let penalty = manager.slash(&address, "double sign").unwrap();
        assert_eq!(penalty, u128::MAX / 20);
        assert_eq!(state.validator(&address).unwrap().stake, u128::MAX - u128::MAX / 20);
    }
}
