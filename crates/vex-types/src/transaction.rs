use crate::address::Address;
use crate::hash::Hash;
use crate::signature::{Ed25519PublicKey, Ed25519Signature};
use crate::Amount;
use std::collections::BTreeMap;
use std::fmt;

/// Default gas budget for a transaction.
pub const DEFAULT_GAS_LIMIT: u64 = 1_000_000;

/// Default price per gas unit.
pub const DEFAULT_GAS_PRICE: u64 = 1;

/// Sender used for system-minted transactions.
pub const MINT_ADDRESS: Address = Address::from_bytes([
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1,
]);

/// Arguments passed to a contract call, preloaded into call memory.
pub type CallArgs = BTreeMap<String, i128>;

/// Transaction kind with kind-specific payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxKind {
    /// Value transfer
    Normal,
    /// Contract deployment
    Create { code: String },
    /// Contract invocation
    Call {
        contract_address: Address,
        method: String,
        args: CallArgs,
    },
    /// System mint, no signature
    Reward,
    /// Lock balance as validator stake
    Stake,
    /// Release validator stake back to balance
    Unstake,
}

impl TxKind {
    /// Wire discriminant.
    pub fn contract_type(&self) -> &'static str {
        match self {
            TxKind::Normal => "NORMAL",
            TxKind::Create { .. } => "CREATE",
            TxKind::Call { .. } => "CALL",
            TxKind::Reward => "REWARD",
            TxKind::Stake => "STAKE",
            TxKind::Unstake => "UNSTAKE",
        }
    }

    pub fn is_contract(&self) -> bool {
        matches!(self, TxKind::Create { .. } | TxKind::Call { .. })
    }

    pub fn requires_signature(&self) -> bool {
        !matches!(self, TxKind::Reward)
    }

    fn hash_payload(&self, out: &mut Vec<u8>) {
        put_str(out, self.contract_type());
        match self {
            TxKind::Create { code } => put_str(out, code),
            TxKind::Call {
                contract_address,
                method,
                args,
            } => {
                out.extend_from_slice(contract_address.as_bytes());
                put_str(out, method);
                out.extend_from_slice(&(args.len() as u64).to_le_bytes());
                for (name, value) in args {
                    put_str(out, name);
                    out.extend_from_slice(&value.to_le_bytes());
                }
            }
            TxKind::Normal | TxKind::Reward | TxKind::Stake | TxKind::Unstake => {}
        }
    }
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u64).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// A ledger transaction.
///
/// `tx_hash` covers every field except `public_key` and `signature`. Builders
/// recompute it; code that mutates fields directly must call
/// [`Transaction::refresh_hash`] before signing.
#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    pub sender: Address,
    pub recipient: Address,
    pub amount: Amount,
    pub nonce: u64,
    /// Arbitrary structured payload
    pub data: serde_json::Value,
    /// Unix milliseconds
    pub timestamp: u64,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub fee: Amount,
    pub kind: TxKind,
    /// Signer's public key, set when signed
    pub public_key: Option<Ed25519PublicKey>,
    pub signature: Option<Ed25519Signature>,
    pub tx_hash: Hash,
}

impl Transaction {
    /// Create a new unsigned transaction stamped with the current time.
    pub fn new(sender: Address, recipient: Address, amount: Amount, nonce: u64, kind: TxKind) -> Self {
        let mut tx = Self {
            sender,
            recipient,
            amount,
            nonce,
            data: serde_json::Value::Object(serde_json::Map::new()),
            timestamp: crate::now_millis(),
            gas_limit: DEFAULT_GAS_LIMIT,
            gas_price: DEFAULT_GAS_PRICE,
            fee: 0,
            kind,
            public_key: None,
            signature: None,
            tx_hash: Hash::ZERO,
        };
        tx.refresh_hash();
        tx
    }

    /// Value transfer
    pub fn transfer(sender: Address, recipient: Address, amount: Amount, nonce: u64) -> Self {
        Self::new(sender, recipient, amount, nonce, TxKind::Normal)
    }

    /// Contract deployment
    pub fn create(sender: Address, code: impl Into<String>, nonce: u64) -> Self {
        Self::new(sender, Address::ZERO, 0, nonce, TxKind::Create { code: code.into() })
    }

    /// Contract invocation
    pub fn call(
        sender: Address,
        contract_address: Address,
        method: impl Into<String>,
        args: CallArgs,
        nonce: u64,
    ) -> Self {
        Self::new(
            sender,
            contract_address,
            0,
            nonce,
            TxKind::Call {
                contract_address,
                method: method.into(),
                args,
            },
        )
    }

    /// System-minted credit
    pub fn reward(recipient: Address, amount: Amount) -> Self {
        Self::new(MINT_ADDRESS, recipient, amount, 0, TxKind::Reward)
    }

    /// Stake `amount` of the sender's balance
    pub fn stake(sender: Address, amount: Amount, nonce: u64) -> Self {
        Self::new(sender, sender, amount, nonce, TxKind::Stake)
    }

    /// Unstake `amount` back into the sender's balance
    pub fn unstake(sender: Address, amount: Amount, nonce: u64) -> Self {
        Self::new(sender, sender, amount, nonce, TxKind::Unstake)
    }

    pub fn with_fee(mut self, fee: Amount) -> Self {
        self.fee = fee;
        self.refresh_hash();
        self
    }

    pub fn with_amount(mut self, amount: Amount) -> Self {
        self.amount = amount;
        self.refresh_hash();
        self
    }

    pub fn with_gas(mut self, gas_limit: u64, gas_price: u64) -> Self {
        self.gas_limit = gas_limit;
        self.gas_price = gas_price;
        self.refresh_hash();
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self.refresh_hash();
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self.refresh_hash();
        self
    }

    /// Recompute the content digest from the canonical field set.
    pub fn calculate_hash(&self) -> Hash {
        let mut data = Vec::with_capacity(256);
        data.extend_from_slice(self.sender.as_bytes());
        data.extend_from_slice(self.recipient.as_bytes());
        data.extend_from_slice(&self.amount.to_le_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(&self.fee.to_le_bytes());
        data.extend_from_slice(&self.gas_limit.to_le_bytes());
        data.extend_from_slice(&self.gas_price.to_le_bytes());
        self.kind.hash_payload(&mut data);
        // serde_json maps are sorted, so this rendering is canonical
        put_str(&mut data, &self.data.to_string());
        Hash::compute(&data)
    }

    /// Store the recomputed digest. Clears any existing signature.
    pub fn refresh_hash(&mut self) {
        self.tx_hash = self.calculate_hash();
        self.signature = None;
        self.public_key = None;
    }

    /// True if the stored hash matches the fields.
    pub fn hash_matches(&self) -> bool {
        self.tx_hash == self.calculate_hash()
    }

    /// Amount plus fee, saturating.
    pub fn total_cost(&self) -> Amount {
        self.amount.saturating_add(self.fee)
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some() && self.public_key.is_some()
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transaction {{ kind: {}, hash: {}, sender: {:x}, nonce: {}, amount: {} }}",
            self.kind.contract_type(),
            self.tx_hash,
            self.sender,
            self.nonce,
            self.amount
        )
    }
}
