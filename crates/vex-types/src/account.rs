use crate::address::Address;
use crate::hash::Hash;
use crate::signature::Ed25519PublicKey;
use crate::Amount;
use serde::{Deserialize, Serialize};

/// Account state held by the state store.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    /// Balance in base units
    pub balance: Amount,
    /// Last applied nonce, 0 for a fresh account
    pub nonce: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<Ed25519PublicKey>,
}

impl Account {
    /// Create a new empty account
    pub fn new(address: Address) -> Self {
        Self {
            address,
            ..Default::default()
        }
    }

    pub fn with_balance(address: Address, balance: Amount) -> Self {
        Self {
            address,
            balance,
            ..Default::default()
        }
    }

    /// Nonce the next transaction from this account must carry.
    pub fn next_nonce(&self) -> u64 {
        self.nonce + 1
    }
}

/// Registered validator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub address: Address,
    pub public_key: Ed25519PublicKey,
    pub stake: Amount,
    /// Unix milliseconds
    pub last_active: u64,
    pub registered_at: u64,
}

impl Validator {
    pub fn new(public_key: Ed25519PublicKey, stake: Amount, now: u64) -> Self {
        Self {
            address: public_key.to_address(),
            public_key,
            stake,
            last_active: now,
            registered_at: now,
        }
    }

    /// Positive stake and seen within `window_ms` of `now`.
    pub fn is_active(&self, now: u64, window_ms: u64) -> bool {
        self.stake > 0 && now.saturating_sub(self.last_active) <= window_ms
    }
}

/// Deployed contract definition. Storage is kept separately.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub address: Address,
    /// Program source text
    pub code: String,
    pub creator: Address,
    pub created_at: u64,
}

impl Contract {
    /// `blake3(creator ‖ tx_hash)[0..20]`
    pub fn derive_address(creator: &Address, tx_hash: &Hash) -> Address {
        let digest = Hash::compute_multi(&[creator.as_bytes(), tx_hash.as_bytes()]);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest.as_bytes()[..20]);
        Address::from_bytes(bytes)
    }
}
