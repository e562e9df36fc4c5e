//! Account, validator and contract state.

use crate::db::{ColumnFamily, Database, WriteBatch};
use crate::error::{StateError, StorageError};
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use vex_types::{Account, Address, Amount, Contract, Ed25519PublicKey, Validator};

/// Persistent key-value storage of one contract.
pub type ContractStorage = BTreeMap<String, i128>;

/// The complete in-memory world state.
///
/// Mutation helpers never touch disk; [`StateStore::update`] persists the
/// difference after a closure over a working copy succeeds.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorldState {
    pub accounts: BTreeMap<Address, Account>,
    /// Registration order is the selection walk order
    pub validators: Vec<Validator>,
    pub contracts: BTreeMap<Address, Contract>,
    pub storage: BTreeMap<Address, ContractStorage>,
}

impl WorldState {
    pub fn balance(&self, address: &Address) -> Amount {
        self.accounts.get(address).map(|a| a.balance).unwrap_or(0)
    }

    pub fn nonce(&self, address: &Address) -> u64 {
        self.accounts.get(address).map(|a| a.nonce).unwrap_or(0)
    }

    pub fn account(&self, address: &Address) -> Option<&Account> {
        self.accounts.get(address)
    }

    /// Fetch or implicitly create an account.
    pub fn account_mut(&mut self, address: &Address) -> &mut Account {
        self.accounts
            .entry(*address)
            .or_insert_with(|| Account::new(*address))
    }

    pub fn set_balance(&mut self, address: &Address, balance: Amount) {
        self.account_mut(address).balance = balance;
    }

    pub fn credit(&mut self, address: &Address, amount: Amount) -> Result<(), StateError> {
        let account = self.account_mut(address);
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or_else(|| StateError::Overflow(address.to_string()))?;
        Ok(())
    }

    pub fn debit(&mut self, address: &Address, amount: Amount) -> Result<(), StateError> {
        let available = self.balance(address);
        if available < amount {
            return Err(StateError::InsufficientFunds {
                required: amount,
                available,
            });
        }
        self.account_mut(address).balance = available - amount;
        Ok(())
    }

    /// Move `amount` between two accounts.
    pub fn transfer(&mut self, from: &Address, to: &Address, amount: Amount) -> Result<(), StateError> {
        self.debit(from, amount)?;
        self.credit(to, amount)
    }

    /// Fails unless `nonce` is exactly the account's next nonce.
    pub fn check_nonce(&self, address: &Address, nonce: u64) -> Result<(), StateError> {
        let expected = self.nonce(address) + 1;
        if nonce != expected {
            return Err(StateError::NonceConflict {
                expected,
                got: nonce,
            });
        }
        Ok(())
    }

    pub fn increment_nonce(&mut self, address: &Address) {
        self.account_mut(address).nonce += 1;
    }

    pub fn validator(&self, address: &Address) -> Option<&Validator> {
        self.validators.iter().find(|v| &v.address == address)
    }

    fn validator_mut(&mut self, address: &Address) -> Option<&mut Validator> {
        self.validators.iter_mut().find(|v| &v.address == address)
    }

    /// Register a validator or refresh an existing one. Stake is kept.
    pub fn register_validator(&mut self, public_key: Ed25519PublicKey, now: u64) -> &mut Validator {
        let address = public_key.to_address();
        match self.validators.iter().position(|v| v.address == address) {
            Some(i) => {
                let validator = &mut self.validators[i];
                validator.public_key = public_key;
                validator.last_active = now;
                validator
            }
            None => {
                self.validators.push(Validator::new(public_key, 0, now));
                let last = self.validators.len() - 1;
                &mut self.validators[last]
            }
        }
    }

    pub fn stake_of(&self, address: &Address) -> Amount {
        self.validator(address).map(|v| v.stake).unwrap_or(0)
    }

    pub fn add_stake(&mut self, address: &Address, amount: Amount) -> Result<(), StateError> {
        let validator = self
            .validator_mut(address)
            .ok_or_else(|| StateError::UnknownValidator(address.to_string()))?;
        validator.stake = validator
            .stake
            .checked_add(amount)
            .ok_or_else(|| StateError::Overflow(address.to_string()))?;
        Ok(())
    }

    pub fn remove_stake(&mut self, address: &Address, amount: Amount) -> Result<(), StateError> {
        let available = self.stake_of(address);
        if available < amount {
            return Err(StateError::InsufficientStake {
                required: amount,
                available,
            });
        }
        if let Some(validator) = self.validator_mut(address) {
            validator.stake = available - amount;
        }
        Ok(())
    }

    pub fn touch_validator(&mut self, address: &Address, now: u64) -> Result<(), StateError> {
        let validator = self
            .validator_mut(address)
            .ok_or_else(|| StateError::UnknownValidator(address.to_string()))?;
        validator.last_active = now;
        Ok(())
    }

    pub fn contract(&self, address: &Address) -> Option<&Contract> {
        self.contracts.get(address)
    }

    pub fn insert_contract(&mut self, contract: Contract) {
        self.contracts.insert(contract.address, contract);
    }

    /// Storage map of a contract, empty when absent.
    pub fn contract_storage(&self, address: &Address) -> ContractStorage {
        self.storage.get(address).cloned().unwrap_or_default()
    }

    pub fn set_contract_storage(&mut self, address: &Address, storage: ContractStorage) {
        self.storage.insert(*address, storage);
    }

    /// Keep system accounts only.
    pub fn clear_non_system(&mut self) {
        self.accounts.retain(|address, _| address.is_system());
        self.validators.clear();
        self.contracts.clear();
        self.storage.clear();
    }
}

/// Durable state store over a [`Database`].
///
/// Reads are served from memory. Writers are serialized by the write lock,
/// which is held across the disk write so that disk and memory never diverge.
pub struct StateStore {
    db: Arc<Database>,
    inner: RwLock<WorldState>,
}

impl StateStore {
    /// Open the store and load every state column.
    pub fn open(db: Arc<Database>) -> Result<Self, StorageError> {
        let world = load_world(&db)?;
        tracing::info!(
            accounts = world.accounts.len(),
            validators = world.validators.len(),
            contracts = world.contracts.len(),
            "State loaded"
        );
        Ok(Self {
            db,
            inner: RwLock::new(world),
        })
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Run a read-only closure against the current state.
    pub fn read<T>(&self, f: impl FnOnce(&WorldState) -> T) -> T {
        f(&self.inner.read())
    }

    /// Apply `f` to a working copy and commit it if `f` succeeds.
    ///
    /// The changed records are written in one batch. On closure error or
    /// write failure the live state is untouched.
    pub fn update<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut WorldState) -> Result<T, E>,
        E: From<StateError>,
    {
        let mut live = self.inner.write();
        let mut working = live.clone();
        let value = f(&mut working)?;

        let batch = diff(&live, &working).map_err(StateError::from)?;
        self.db.write_batch(batch).map_err(StateError::from)?;
        *live = working;
        Ok(value)
    }

    /// Replace the live state with `working`, writing its difference and
    /// `extra` in a single batch.
    ///
    /// Memory only changes once the batch is on disk, so a failed write
    /// leaves both untouched.
    pub fn commit(&self, working: WorldState, extra: WriteBatch) -> Result<(), StateError> {
        let mut live = self.inner.write();
        let mut batch = diff(&live, &working)?;
        batch.append(extra);
        self.db.write_batch(batch)?;
        *live = working;
        Ok(())
    }

    /// Copy of the whole state for rollback.
    pub fn snapshot(&self) -> WorldState {
        self.inner.read().clone()
    }

    /// Replace the whole state with `snapshot`, persisting the difference.
    pub fn restore(&self, snapshot: WorldState) -> Result<(), StateError> {
        self.update(|world| {
            *world = snapshot;
            Ok(())
        })
    }

    /// Wipe every non-system account, validator and contract.
    pub fn reset(&self) -> Result<(), StateError> {
        tracing::warn!("Resetting world state");
        self.update(|world| {
            world.clear_non_system();
            Ok(())
        })
    }

    pub fn get_balance(&self, address: &Address) -> Amount {
        self.read(|w| w.balance(address))
    }

    pub fn update_balance(&self, address: &Address, balance: Amount) -> Result<(), StateError> {
        self.update(|w| {
            w.set_balance(address, balance);
            Ok(())
        })
    }

    pub fn get_nonce(&self, address: &Address) -> u64 {
        self.read(|w| w.nonce(address))
    }

    pub fn increment_nonce(&self, address: &Address) -> Result<(), StateError> {
        self.update(|w| {
            w.increment_nonce(address);
            Ok(())
        })
    }

    pub fn get_account(&self, address: &Address) -> Option<Account> {
        self.read(|w| w.account(address).cloned())
    }

    /// Create an account with an initial balance, or return the existing one.
    pub fn create_account(&self, address: &Address, balance: Amount) -> Result<Account, StateError> {
        self.update(|w| {
            if let Some(existing) = w.account(address) {
                return Ok(existing.clone());
            }
            let account = Account::with_balance(*address, balance);
            w.accounts.insert(*address, account.clone());
            Ok(account)
        })
    }

    pub fn load_contract_code(&self, address: &Address) -> Option<String> {
        self.read(|w| w.contract(address).map(|c| c.code.clone()))
    }

    pub fn load_contract(&self, address: &Address) -> Option<Contract> {
        self.read(|w| w.contract(address).cloned())
    }

    pub fn save_contract(&self, contract: Contract) -> Result<(), StateError> {
        self.update(|w| {
            w.insert_contract(contract);
            Ok(())
        })
    }

    pub fn load_storage(&self, address: &Address) -> ContractStorage {
        self.read(|w| w.contract_storage(address))
    }

    pub fn save_storage(&self, address: &Address, storage: ContractStorage) -> Result<(), StateError> {
        self.update(|w| {
            w.set_contract_storage(address, storage);
            Ok(())
        })
    }

    pub fn register_validator(&self, public_key: Ed25519PublicKey, now: u64) -> Result<Validator, StateError> {
        self.update(|w| Ok(w.register_validator(public_key, now).clone()))
    }

    pub fn validator(&self, address: &Address) -> Option<Validator> {
        self.read(|w| w.validator(address).cloned())
    }

    pub fn validators(&self) -> Vec<Validator> {
        self.read(|w| w.validators.clone())
    }

    pub fn add_stake(&self, address: &Address, amount: Amount) -> Result<(), StateError> {
        self.update(|w| w.add_stake(address, amount))
    }

    pub fn remove_stake(&self, address: &Address, amount: Amount) -> Result<(), StateError> {
        self.update(|w| w.remove_stake(address, amount))
    }

    pub fn touch_validator(&self, address: &Address, now: u64) -> Result<(), StateError> {
        self.update(|w| w.touch_validator(address, now))
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Emit puts for changed or new entries and deletes for removed ones.
fn diff_map<V: PartialEq + Serialize>(
    batch: &mut WriteBatch,
    column: ColumnFamily,
    before: &BTreeMap<Address, V>,
    after: &BTreeMap<Address, V>,
) -> Result<(), StorageError> {
    for (address, value) in after {
        if before.get(address) != Some(value) {
            batch.put(column, address.as_bytes(), &encode(value)?);
        }
    }
    for address in before.keys() {
        if !after.contains_key(address) {
            batch.delete(column, address.as_bytes());
        }
    }
    Ok(())
}

fn diff(before: &WorldState, after: &WorldState) -> Result<WriteBatch, StorageError> {
    let mut batch = WriteBatch::new();
    diff_map(&mut batch, ColumnFamily::Accounts, &before.accounts, &after.accounts)?;
    diff_map(&mut batch, ColumnFamily::Contracts, &before.contracts, &after.contracts)?;
    diff_map(&mut batch, ColumnFamily::ContractStorage, &before.storage, &after.storage)?;

    // Validators are stored with their position to keep registration order.
    for (position, validator) in after.validators.iter().enumerate() {
        if before.validators.get(position) != Some(validator) {
            batch.put(
                ColumnFamily::Validators,
                validator.address.as_bytes(),
                &encode(&(position as u64, validator))?,
            );
        }
    }
    for validator in &before.validators {
        if after.validator(&validator.address).is_none() {
            batch.delete(ColumnFamily::Validators, validator.address.as_bytes());
        }
    }
    Ok(batch)
}

fn load_map<V: DeserializeOwned>(
    db: &Database,
    column: ColumnFamily,
) -> Result<BTreeMap<Address, V>, StorageError> {
    db.iter_column(column)?
        .into_iter()
        .map(|(key, value)| {
            let address = Address::from_slice(&key)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            Ok((address, decode(&value)?))
        })
        .collect()
}

fn load_world(db: &Database) -> Result<WorldState, StorageError> {
    let mut validators: Vec<(u64, Validator)> = db
        .iter_column(ColumnFamily::Validators)?
        .into_iter()
        .map(|(_, value)| decode(&value))
        .collect::<Result<_, _>>()?;
    validators.sort_by_key(|(position, _)| *position);

    Ok(WorldState {
        accounts: load_map(db, ColumnFamily::Accounts)?,
        validators: validators.into_iter().map(|(_, v)| v).collect(),
        contracts: load_map(db, ColumnFamily::Contracts)?,
        storage: load_map(db, ColumnFamily::ContractStorage)?,
    })
}
