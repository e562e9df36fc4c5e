//! Serde implementations and wire shapes.
//!
//! Hashes, keys and signatures are lowercase hex without prefix, addresses
//! are Bech32m. Transactions and blocks go through flat wire structs that
//! carry a `contract_type` discriminant and the `"0"` genesis sentinel.

use crate::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

// Hash
impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_hex().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Hash::from_str(&s).map_err(serde::de::Error::custom)
    }
}

// Address
impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Address::from_str(&s).map_err(serde::de::Error::custom)
    }
}

// Ed25519Signature
impl Serialize for Ed25519Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_hex().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Ed25519Signature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_signature(&s).map_err(serde::de::Error::custom)
    }
}

// Ed25519PublicKey
impl Serialize for Ed25519PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_hex().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Ed25519PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(strip_hex_prefix(&s)).map_err(serde::de::Error::custom)?;
        Ed25519PublicKey::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x").unwrap_or(s)
}

fn parse_signature(s: &str) -> Result<Ed25519Signature, TypesError> {
    let bytes = hex::decode(strip_hex_prefix(s))?;
    Ed25519Signature::from_slice(&bytes)
}

/// Genesis parent on the wire.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

fn default_data() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_gas_limit() -> u64 {
    DEFAULT_GAS_LIMIT
}

fn default_gas_price() -> u64 {
    DEFAULT_GAS_PRICE
}

/// Flat wire and persisted shape of a transaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionWire {
    pub tx_hash: Hash,
    pub sender: Address,
    pub recipient: Address,
    pub amount: Amount,
    #[serde(default = "default_data")]
    pub data: serde_json::Value,
    pub timestamp: u64,
    /// Empty for unsigned transactions
    #[serde(default)]
    pub signature: String,
    pub nonce: u64,
    #[serde(default)]
    pub fee: Amount,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    #[serde(default = "default_gas_price")]
    pub gas_price: u64,
    pub contract_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<CallArgs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<Ed25519PublicKey>,
}

impl From<&Transaction> for TransactionWire {
    fn from(tx: &Transaction) -> Self {
        let (contract_address, method, args, code) = match &tx.kind {
            TxKind::Create { code } => (None, None, None, Some(code.clone())),
            TxKind::Call {
                contract_address,
                method,
                args,
            } => (
                Some(*contract_address),
                Some(method.clone()),
                Some(args.clone()),
                None,
            ),
            TxKind::Normal | TxKind::Reward | TxKind::Stake | TxKind::Unstake => {
                (None, None, None, None)
            }
        };

        Self {
            tx_hash: tx.tx_hash,
            sender: tx.sender,
            recipient: tx.recipient,
            amount: tx.amount,
            data: tx.data.clone(),
            timestamp: tx.timestamp,
            signature: tx.signature.map(|s| s.to_hex()).unwrap_or_default(),
            nonce: tx.nonce,
            fee: tx.fee,
            gas_limit: tx.gas_limit,
            gas_price: tx.gas_price,
            contract_type: tx.kind.contract_type().to_string(),
            contract_address,
            method,
            args,
            code,
            public_key: tx.public_key,
        }
    }
}

impl TryFrom<TransactionWire> for Transaction {
    type Error = TypesError;

    fn try_from(wire: TransactionWire) -> Result<Self, Self::Error> {
        let kind = match wire.contract_type.as_str() {
            "NORMAL" => TxKind::Normal,
            "CREATE" => TxKind::Create {
                code: wire.code.ok_or(TypesError::MissingField {
                    kind: "CREATE",
                    field: "code",
                })?,
            },
            "CALL" => TxKind::Call {
                contract_address: wire.contract_address.ok_or(TypesError::MissingField {
                    kind: "CALL",
                    field: "contract_address",
                })?,
                method: wire.method.unwrap_or_default(),
                args: wire.args.unwrap_or_default(),
            },
            "REWARD" => TxKind::Reward,
            "STAKE" => TxKind::Stake,
            "UNSTAKE" => TxKind::Unstake,
            other => return Err(TypesError::UnknownTransactionKind(other.to_string())),
        };

        let signature = if wire.signature.is_empty() {
            None
        } else {
            Some(parse_signature(&wire.signature)?)
        };

        // The stored hash is kept as-is so validation can detect tampering.
        Ok(Transaction {
            sender: wire.sender,
            recipient: wire.recipient,
            amount: wire.amount,
            nonce: wire.nonce,
            data: wire.data,
            timestamp: wire.timestamp,
            gas_limit: wire.gas_limit,
            gas_price: wire.gas_price,
            fee: wire.fee,
            kind,
            public_key: wire.public_key,
            signature,
            tx_hash: wire.tx_hash,
        })
    }
}

impl Serialize for Transaction {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        TransactionWire::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Transaction {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = TransactionWire::deserialize(deserializer)?;
        Transaction::try_from(wire).map_err(serde::de::Error::custom)
    }
}

/// Flat wire and persisted shape of a block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockWire {
    pub index: u64,
    pub timestamp: u64,
    /// Hex parent hash, `"0"` for genesis
    pub previous_hash: String,
    pub hash: Hash,
    pub nonce: u64,
    pub difficulty: u64,
    pub validator: Address,
    pub validator_key: Ed25519PublicKey,
    pub stake_amount: Amount,
    /// Empty for unsigned blocks
    #[serde(default)]
    pub signature: String,
    pub transactions: Vec<Transaction>,
}

impl From<&Block> for BlockWire {
    fn from(block: &Block) -> Self {
        let previous_hash = if block.previous_hash.is_zero() {
            GENESIS_PREVIOUS_HASH.to_string()
        } else {
            block.previous_hash.to_hex()
        };

        Self {
            index: block.index,
            timestamp: block.timestamp,
            previous_hash,
            hash: block.hash,
            nonce: block.nonce,
            difficulty: block.difficulty,
            validator: block.validator,
            validator_key: block.validator_key,
            stake_amount: block.stake_amount,
            signature: block.signature.map(|s| s.to_hex()).unwrap_or_default(),
            transactions: block.transactions.clone(),
        }
    }
}

impl TryFrom<BlockWire> for Block {
    type Error = TypesError;

    fn try_from(wire: BlockWire) -> Result<Self, Self::Error> {
        let previous_hash = if wire.previous_hash == GENESIS_PREVIOUS_HASH {
            Hash::ZERO
        } else {
            Hash::from_str(&wire.previous_hash)?
        };

        let signature = if wire.signature.is_empty() {
            None
        } else {
            Some(parse_signature(&wire.signature)?)
        };

        Ok(Block {
            index: wire.index,
            timestamp: wire.timestamp,
            transactions_hash: Block::transactions_digest(&wire.transactions),
            transactions: wire.transactions,
            previous_hash,
            nonce: wire.nonce,
            difficulty: wire.difficulty,
            validator: wire.validator,
            validator_key: wire.validator_key,
            stake_amount: wire.stake_amount,
            signature,
            hash: wire.hash,
        })
    }
}

impl Serialize for Block {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        BlockWire::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Block {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = BlockWire::deserialize(deserializer)?;
        Block::try_from(wire).map_err(serde::de::Error::custom)
    }
}
